//! Console request handlers
//!
//! Each request is delegated to [`HostContext`]. Lifecycle events reach
//! every observer through the broadcaster; only direct replies are returned.
//! A started run is acknowledged with its id so the requester can follow it.

use super::context::HostContext;
use crate::domain::{CancelRequest, Initiator, RunRequest};
use crate::events::ConsoleEvent;
use crate::ipc::{ConsoleRequest, RequestHandler};

/// Greeting sent to every new observer
pub const HELLO_MESSAGE: &str = "caprun console ready";

/// Handle run - start a capability run
pub async fn handle_run(ctx: &HostContext, request: RunRequest) -> Option<ConsoleEvent> {
    let capability_id = request.capability_id.clone();
    match ctx.submit(request, Initiator::Console).await {
        Ok(handle) => {
            log::info!("Console started run {} of {}", handle.run_id, handle.capability_id);
            Some(ConsoleEvent::RunAccepted {
                run_id: handle.run_id,
                capability_id: handle.capability_id,
            })
        }
        Err(e) => Some(ConsoleEvent::Error {
            message: e.to_string(),
            capability_id: Some(capability_id).filter(|id| !id.is_empty()),
            run_id: None,
        }),
    }
}

/// Handle cancel - stop an active run
pub async fn handle_cancel(ctx: &HostContext, request: CancelRequest) -> Option<ConsoleEvent> {
    match ctx.cancel(&request).await {
        Ok(_) => None,
        Err(e) => Some(ConsoleEvent::Error {
            message: e.to_string(),
            capability_id: request.capability_id,
            run_id: request.run_id,
        }),
    }
}

/// Handle reload - outcome is broadcast either way
pub async fn handle_reload(ctx: &HostContext) -> Option<ConsoleEvent> {
    let _ = ctx.reload_capabilities().await;
    None
}

impl RequestHandler for HostContext {
    async fn greeting(&self) -> Vec<ConsoleEvent> {
        let mut frames = vec![ConsoleEvent::Hello {
            message: HELLO_MESSAGE.to_string(),
            capabilities: self.capabilities().await,
        }];
        if let Some(message) = self.discovery_error().await {
            frames.push(ConsoleEvent::error(message));
        }
        frames
    }

    async fn handle(&self, request: ConsoleRequest) -> Option<ConsoleEvent> {
        match request {
            ConsoleRequest::Run {
                capability_id,
                prompt,
                check,
                env_files,
            } => {
                let request = RunRequest {
                    capability_id,
                    prompt,
                    check,
                    env_files,
                };
                handle_run(self, request).await
            }
            ConsoleRequest::Cancel { run_id, capability_id } => {
                handle_cancel(self, CancelRequest { run_id, capability_id }).await
            }
            ConsoleRequest::Reload => handle_reload(self).await,
            ConsoleRequest::Ping => Some(ConsoleEvent::Pong),
        }
    }
}
