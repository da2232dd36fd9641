//! Run Manager implementation
//!
//! RunManager orchestrates the run lifecycle: launch, output relay,
//! finalization and cancellation. It owns the registry of active runs and
//! is the only writer of run records while the process is up.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::FixedOffset;
use serde_json::{Map, json};
use tokio::sync::{mpsc, oneshot};

use super::registry::{ActiveRun, ActiveRunInfo, Registry, RunTelemetry};
use crate::domain::{
    CancelRequest, CapabilitySummary, Initiator, RunOutcome, RunRecord, RunRequest, RunResult, StreamChannel,
    metadata_keys as keys, summarise, truncate_chars,
};
use crate::error::{CaprunError, Result};
use crate::events::{ConsoleEvent, EventBroadcaster};
use crate::id::{generate_run_id, timestamp_now};
use crate::runner::{ProcessEvent, ProcessLauncher};
use crate::secrets::SecretResolution;
use crate::storage::{RunLedger, TelemetryEvent, TelemetrySink};

/// Configuration for the RunManager
#[derive(Debug, Clone)]
pub struct RunManagerConfig {
    /// Longest output tail kept in a summary, in characters
    pub summary_max_chars: usize,
    /// Offset used for every ledger timestamp
    pub utc_offset: FixedOffset,
}

impl Default for RunManagerConfig {
    fn default() -> Self {
        Self {
            summary_max_chars: 160,
            utc_offset: crate::id::offset_from_minutes(120),
        }
    }
}

/// How a run reached its end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process exited on its own; `None` when killed by a signal
    Exited(Option<i32>),
    /// An operator asked for the run to stop
    Cancelled,
}

/// Caller's view of a started run
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: String,
    pub capability_id: String,
    completion: oneshot::Receiver<RunRecord>,
}

impl RunHandle {
    /// Wait for the terminal record
    pub async fn wait(self) -> Result<RunRecord> {
        self.completion.await.map_err(|_| CaprunError::RunLost(self.run_id))
    }
}

struct Inner {
    launcher: ProcessLauncher,
    ledger: Arc<RunLedger>,
    telemetry: TelemetrySink,
    events: EventBroadcaster,
    config: RunManagerConfig,
    registry: Mutex<Registry>,
}

/// Starts, tracks and finalizes capability runs
#[derive(Clone)]
pub struct RunManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RunManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunManager")
            .field("active", &self.active_runs().len())
            .finish_non_exhaustive()
    }
}

impl RunManager {
    pub fn new(
        launcher: ProcessLauncher,
        ledger: Arc<RunLedger>,
        telemetry: TelemetrySink,
        events: EventBroadcaster,
        config: RunManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                launcher,
                ledger,
                telemetry,
                events,
                config,
                registry: Mutex::new(Registry::new()),
            }),
        }
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.inner.ledger
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.inner.events
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Launch `capability` and start relaying its output.
    ///
    /// Never fails: a capability that cannot be spawned becomes a `failed`
    /// run whose handle is already resolved.
    pub async fn start(
        &self,
        capability: &CapabilitySummary,
        request: &RunRequest,
        secrets: SecretResolution,
        initiator: Initiator,
    ) -> RunHandle {
        let run_id = generate_run_id();
        let started = timestamp_now(self.inner.config.utc_offset);
        let prompt = request.trimmed_prompt();
        let check = request.check && capability.supports_check;
        let launcher = &self.inner.launcher;

        let mut metadata = Map::new();
        metadata.insert(keys::WORKSPACE_ROOT.into(), json!(launcher.workspace_root()));
        metadata.insert(keys::CHECK.into(), json!(check));
        metadata.insert(keys::PROMPT.into(), json!(prompt));
        metadata.insert(keys::PROVENANCE.into(), json!(capability.manifest_path));
        metadata.insert(keys::INITIATOR.into(), json!(initiator.as_str()));
        metadata.insert(keys::SECRETS_REQUESTED.into(), json!(secrets.requested));
        metadata.insert(keys::SECRETS_LOADED.into(), json!(secrets.loaded));
        metadata.insert(keys::SECRETS_MISSING.into(), json!(secrets.missing));

        let mut record = RunRecord::running(
            run_id.clone(),
            capability.id.clone(),
            started,
            Some(relative_path(launcher.workspace_root(), &capability.absolute_entrypoint).display().to_string()),
            metadata,
        );
        let telemetry = RunTelemetry {
            check,
            prompt_provided: prompt.is_some(),
            secrets_loaded: secrets.loaded.clone(),
            secrets_missing: secrets.missing.clone(),
        };

        let spawned = match launcher
            .prepare_payload(capability, prompt, request.check, &run_id, &started)
            .await
        {
            Ok(payload) => {
                record.set_meta(keys::ARTIFACT, json!(payload.output));
                launcher.launch(capability, &secrets.env, &payload)
            }
            Err(e) => Err(e),
        };

        let process = match spawned {
            Ok(process) => process,
            Err(e) => return self.fail_to_spawn(record, telemetry, e).await,
        };

        if let Err(e) = self.inner.ledger.upsert(record.clone()).await {
            log::warn!("Failed to record start of run {}: {}", run_id, e);
        }

        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut registry = self.registry();
            registry.insert(ActiveRun::new(record, process.terminator, telemetry, done_tx));
            self.inner.events.broadcast(ConsoleEvent::ExecutionStarted {
                run_id: run_id.clone(),
                capability_id: capability.id.clone(),
            });
        }
        log::info!("Run {} of {} is running", run_id, capability.id);

        tokio::spawn(self.clone().pump(run_id.clone(), capability.id.clone(), process.events));

        RunHandle {
            run_id,
            capability_id: capability.id.clone(),
            completion: done_rx,
        }
    }

    /// Relay process events until the process exits
    async fn pump(self, run_id: String, capability_id: String, mut events: mpsc::Receiver<ProcessEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::Output { channel, text } => self.append_chunk(&run_id, &capability_id, channel, text),
                ProcessEvent::Exited { code } => {
                    self.finalize(&run_id, Termination::Exited(code)).await;
                    return;
                }
            }
        }
        log::warn!("Process events for run {} ended without an exit", run_id);
        self.finalize(&run_id, Termination::Exited(None)).await;
    }

    /// Record and broadcast one chunk, unless the run already finalized
    fn append_chunk(&self, run_id: &str, capability_id: &str, channel: StreamChannel, text: String) {
        let mut registry = self.registry();
        let Some(run) = registry.get_active_mut(run_id) else {
            log::debug!("Dropping {} chunk for finished run {}", channel, run_id);
            return;
        };
        run.push_chunk(channel, text.clone());
        self.inner.events.broadcast(ConsoleEvent::Execution {
            run_id: run_id.to_string(),
            capability_id: capability_id.to_string(),
            channel,
            text,
        });
    }

    /// Move a run to its terminal state.
    ///
    /// Only the first call for a run does anything; later calls return `false`.
    pub async fn finalize(&self, run_id: &str, termination: Termination) -> bool {
        let claimed = {
            let mut registry = self.registry();
            match registry.claim(run_id) {
                Some(claimed) => claimed,
                None => return false,
            }
        };

        if termination == Termination::Cancelled {
            claimed.terminator.terminate();
        }

        let result = RunResult {
            exit_code: match termination {
                Termination::Exited(code) => code,
                Termination::Cancelled => None,
            },
            stdout: claimed.stdout,
            stderr: claimed.stderr,
        };
        let outcome = match termination {
            Termination::Exited(_) => summarise(&result, self.inner.config.summary_max_chars),
            Termination::Cancelled => RunOutcome::cancelled(),
        };
        let duration = claimed.started_at.elapsed().as_secs_f64();

        let mut record = self.terminal_record(claimed.record, &outcome, &result, duration);
        if termination == Termination::Cancelled {
            record.set_meta(keys::CANCELLED, true);
        }

        self.complete(record, result.exit_code, claimed.telemetry, duration, claimed.done)
            .await;
        self.registry().remove(run_id);
        true
    }

    /// A run that never reached `running`
    async fn fail_to_spawn(&self, record: RunRecord, telemetry: RunTelemetry, error: CaprunError) -> RunHandle {
        let message = error.to_string();
        log::error!("Run {} of {} could not start: {}", record.id, record.capability, message);

        let result = RunResult {
            exit_code: None,
            stdout: Vec::new(),
            stderr: vec![message.clone()],
        };
        let outcome = summarise(&result, self.inner.config.summary_max_chars);
        let mut record = self.terminal_record(record, &outcome, &result, 0.0);
        record.completed = Some(record.started);
        record.set_meta(keys::SPAWN_ERROR, message.clone());

        self.inner.events.broadcast(ConsoleEvent::Error {
            message,
            capability_id: Some(record.capability.clone()),
            run_id: Some(record.id.clone()),
        });

        let (done_tx, done_rx) = oneshot::channel();
        let run_id = record.id.clone();
        let capability_id = record.capability.clone();
        self.complete(record, None, telemetry, 0.0, Some(done_tx)).await;

        RunHandle {
            run_id,
            capability_id,
            completion: done_rx,
        }
    }

    fn terminal_record(&self, mut record: RunRecord, outcome: &RunOutcome, result: &RunResult, duration: f64) -> RunRecord {
        let max = self.inner.config.summary_max_chars;
        let tail = |t: Option<String>| t.map(|t| truncate_chars(&t, max));

        record.status = outcome.status;
        record.summary = outcome.summary.clone();
        record.completed = Some(timestamp_now(self.inner.config.utc_offset));
        record.set_meta(keys::EXIT_CODE, json!(result.exit_code));
        record.set_meta(keys::STDOUT_TAIL, json!(tail(result.stdout_tail())));
        record.set_meta(keys::STDERR_TAIL, json!(tail(result.stderr_tail())));
        record.set_meta(keys::DURATION_SECONDS, json!((duration * 1000.0).round() / 1000.0));
        record
    }

    /// Persist, notify observers and resolve the handle
    async fn complete(
        &self,
        record: RunRecord,
        exit_code: Option<i32>,
        telemetry: RunTelemetry,
        duration: f64,
        done: Option<oneshot::Sender<RunRecord>>,
    ) {
        match self.inner.ledger.upsert(record.clone()).await {
            Ok(true) => {}
            Ok(false) => log::warn!("Ledger kept an existing terminal record for run {}", record.id),
            Err(e) => log::warn!("Failed to record outcome of run {}: {}", record.id, e),
        }

        self.inner.events.broadcast(ConsoleEvent::ExecutionComplete {
            run_id: record.id.clone(),
            capability_id: record.capability.clone(),
            status: record.status,
            exit_code,
            summary: record.summary.clone(),
        });
        log::info!("Run {} of {} finished: {}", record.id, record.capability, record.status);

        let event = TelemetryEvent::from_record(
            &record,
            duration,
            telemetry.check,
            telemetry.secrets_loaded,
            telemetry.secrets_missing,
            telemetry.prompt_provided,
        );
        self.inner.telemetry.record(&event).await;

        if let Some(done) = done {
            let _ = done.send(record);
        }
    }

    /// Cancel by run id, else by capability id (earliest-started match).
    ///
    /// Returns the id of the cancelled run.
    pub async fn cancel(&self, request: &CancelRequest) -> Result<String> {
        if request.is_empty() {
            return Err(CaprunError::InvalidRequest(
                "cancel needs a runId or capabilityId".to_string(),
            ));
        }

        let target = {
            let registry = self.registry();
            let by_run = request
                .run_id
                .as_deref()
                .filter(|id| registry.contains_active(id))
                .map(str::to_string);
            by_run.or_else(|| {
                request
                    .capability_id
                    .as_deref()
                    .and_then(|cap| registry.find_by_capability(cap))
            })
        };

        let Some(run_id) = target else {
            return Err(CaprunError::InvalidRequest(format!(
                "no active run matches {}",
                describe(request)
            )));
        };

        log::info!("Cancelling run {}", run_id);
        if self.finalize(&run_id, Termination::Cancelled).await {
            Ok(run_id)
        } else {
            Err(CaprunError::InvalidRequest(format!("run {} already finished", run_id)))
        }
    }

    /// Cancel every active run, returning how many were cancelled
    pub async fn cancel_all(&self) -> usize {
        let ids: Vec<String> = self.active_runs().into_iter().map(|r| r.run_id).collect();
        let mut cancelled = 0;
        for id in ids {
            if self.finalize(&id, Termination::Cancelled).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn active_runs(&self) -> Vec<ActiveRunInfo> {
        self.registry().active()
    }
}

fn describe(request: &CancelRequest) -> String {
    let mut parts = Vec::new();
    if let Some(id) = request.run_id.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("runId {}", id));
    }
    if let Some(id) = request.capability_id.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("capabilityId {}", id));
    }
    parts.join(" or ")
}

/// `target` relative to `base`, stepping out with `..` where needed
fn relative_path(base: &Path, target: &Path) -> PathBuf {
    let base: Vec<Component> = base.components().collect();
    let target: Vec<Component> = target.components().collect();
    let common = base.iter().zip(&target).take_while(|(a, b)| a == b).count();

    let mut relative = PathBuf::new();
    for _ in common..base.len() {
        relative.push("..");
    }
    for component in &target[common..] {
        relative.push(component);
    }
    relative
}
