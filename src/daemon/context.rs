//! Host context - shared state for the CLI and console handlers
//!
//! HostContext owns every component a run needs: the ledger, the event
//! broadcaster, secret resolution, the loaded capability set and the
//! run manager.

use std::sync::Arc;

use chrono::FixedOffset;
use tokio::sync::{RwLock, broadcast};

use super::recovery::{Recovery, RecoveryAction, RecoveryConfig};
use crate::config::{Config, HostPaths};
use crate::discovery;
use crate::domain::{CancelRequest, CapabilitySummary, DiscoveryPayload, Initiator, RunRequest};
use crate::error::{CaprunError, Result};
use crate::events::{ConsoleEvent, EventBroadcaster};
use crate::id::offset_from_minutes;
use crate::manager::{RunHandle, RunManager, RunManagerConfig};
use crate::runner::ProcessLauncher;
use crate::secrets::{SecretResolution, SecretResolver};
use crate::storage::{RunLedger, TelemetrySink};

/// Shared context for run submission and console requests
pub struct HostContext {
    paths: HostPaths,
    offset: FixedOffset,
    ledger: Arc<RunLedger>,
    events: EventBroadcaster,
    secrets: SecretResolver,
    manager: RunManager,
    /// Last successful discovery
    capabilities: RwLock<Option<DiscoveryPayload>>,
    /// Message of the last failed discovery, cleared on success
    discovery_error: RwLock<Option<String>>,
}

impl HostContext {
    /// Wire every component from configuration
    pub fn new(config: &Config, paths: HostPaths) -> Self {
        let offset = offset_from_minutes(config.clock.utc_offset_minutes);
        let ledger = Arc::new(RunLedger::new(&paths.ledger_file));
        let events = EventBroadcaster::new(config.console.event_channel_capacity);
        let telemetry = match &paths.telemetry_file {
            Some(path) => TelemetrySink::new(path),
            None => TelemetrySink::disabled(),
        };
        let secrets = SecretResolver::load(&paths.secrets_root, &paths.secrets_mapping);

        let launcher = ProcessLauncher::new(
            paths.workspace_root.clone(),
            paths.artifacts_dir.clone(),
            config.clock.timezone.clone(),
            config.runner.cancel_grace(),
        );
        let manager = RunManager::new(
            launcher,
            ledger.clone(),
            telemetry,
            events.clone(),
            RunManagerConfig {
                summary_max_chars: config.runner.summary_max_chars,
                utc_offset: offset,
            },
        );

        Self {
            paths,
            offset,
            ledger,
            events,
            secrets,
            manager,
            capabilities: RwLock::new(None),
            discovery_error: RwLock::new(None),
        }
    }

    pub fn paths(&self) -> &HostPaths {
        &self.paths
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    pub fn manager(&self) -> &RunManager {
        &self.manager
    }

    pub fn secrets(&self) -> &SecretResolver {
        &self.secrets
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// Broadcast an event to all connected observers
    pub fn broadcast(&self, event: ConsoleEvent) {
        self.events.broadcast(event);
    }

    /// Get a receiver for events
    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.events.subscribe()
    }

    /// Mark runs interrupted by a previous crash as failed
    pub async fn recover(&self) -> Result<Vec<RecoveryAction>> {
        let recovery = Recovery::new(
            self.ledger.clone(),
            RecoveryConfig {
                utc_offset: self.offset,
                ..Default::default()
            },
        );
        recovery.recover_all().await
    }

    /// Re-run discovery. Observers get the new set, or an error event.
    pub async fn reload_capabilities(&self) -> Result<DiscoveryPayload> {
        match discovery::discover(&self.paths.workspace_root, &self.paths.manifest_candidates, self.offset).await {
            Ok(payload) => {
                *self.capabilities.write().await = Some(payload.clone());
                *self.discovery_error.write().await = None;
                self.broadcast(ConsoleEvent::Capabilities {
                    payload: payload.clone(),
                });
                Ok(payload)
            }
            Err(e) => {
                log::error!("Capability discovery failed: {}", e);
                *self.discovery_error.write().await = Some(e.to_string());
                self.broadcast(ConsoleEvent::error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Currently loaded capability set
    pub async fn capabilities(&self) -> Option<DiscoveryPayload> {
        self.capabilities.read().await.clone()
    }

    pub async fn discovery_error(&self) -> Option<String> {
        self.discovery_error.read().await.clone()
    }

    /// Look up a loaded capability
    pub async fn capability(&self, id: &str) -> Result<CapabilitySummary> {
        let guard = self.capabilities.read().await;
        let Some(payload) = guard.as_ref() else {
            let reason = self
                .discovery_error
                .read()
                .await
                .clone()
                .unwrap_or_else(|| "capabilities have not been loaded".to_string());
            return Err(CaprunError::Manifest(reason));
        };
        payload
            .find(id)
            .cloned()
            .ok_or_else(|| CaprunError::CapabilityNotFound(id.to_string()))
    }

    /// Resolve secrets and start a run.
    ///
    /// Configuration problems are returned before anything is launched or
    /// recorded.
    pub async fn submit(&self, request: RunRequest, initiator: Initiator) -> Result<RunHandle> {
        let capability_id = request.capability_id.trim();
        if capability_id.is_empty() {
            return Err(CaprunError::InvalidRequest("run needs a capabilityId".to_string()));
        }
        let capability = self.capability(capability_id).await?;
        let secrets = self.secrets.resolve(&capability, &request.env_files).await;
        Ok(self.start(&capability, &request, secrets, initiator).await)
    }

    /// Start a run whose capability and secrets the caller already resolved
    pub async fn start(
        &self,
        capability: &CapabilitySummary,
        request: &RunRequest,
        secrets: SecretResolution,
        initiator: Initiator,
    ) -> RunHandle {
        if !secrets.missing.is_empty() {
            log::warn!(
                "Run of {} is missing secrets: {}",
                capability.id,
                secrets.missing.join(", ")
            );
        }
        self.manager.start(capability, request, secrets, initiator).await
    }

    /// Cancel a run; see [`RunManager::cancel`]
    pub async fn cancel(&self, request: &CancelRequest) -> Result<String> {
        self.manager.cancel(request).await
    }

    /// Cancel everything still running
    pub async fn shutdown(&self) -> usize {
        let cancelled = self.manager.cancel_all().await;
        if cancelled > 0 {
            log::info!("Cancelled {} active run(s) on shutdown", cancelled);
        }
        cancelled
    }
}
