//! Run lifecycle events and their fan-out to observers.
//!
//! Delivery is best-effort: an observer that is gone or lagging misses
//! events, nothing is queued for it and nothing is replayed on attach.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::{DiscoveryPayload, RunStatus, StreamChannel};

/// Event sent to console observers.
///
/// Serialized as `{"type": "<kebab-case kind>", ...camelCase fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ConsoleEvent {
    /// Sent once when an observer attaches
    Hello {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capabilities: Option<DiscoveryPayload>,
    },
    /// Capability set was (re)loaded
    Capabilities { payload: DiscoveryPayload },
    /// Direct reply to the observer whose `run` request started this run
    RunAccepted { run_id: String, capability_id: String },
    ExecutionStarted { run_id: String, capability_id: String },
    /// One output chunk
    Execution {
        run_id: String,
        capability_id: String,
        channel: StreamChannel,
        text: String,
    },
    ExecutionComplete {
        run_id: String,
        capability_id: String,
        status: RunStatus,
        exit_code: Option<i32>,
        summary: String,
    },
    /// Out-of-band failure; not necessarily tied to a run
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capability_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
    },
    Pong,
}

impl ConsoleEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ConsoleEvent::Error {
            message: message.into(),
            capability_id: None,
            run_id: None,
        }
    }

    /// Run this event belongs to, if any
    pub fn run_id(&self) -> Option<&str> {
        match self {
            ConsoleEvent::RunAccepted { run_id, .. }
            | ConsoleEvent::ExecutionStarted { run_id, .. }
            | ConsoleEvent::Execution { run_id, .. }
            | ConsoleEvent::ExecutionComplete { run_id, .. } => Some(run_id),
            ConsoleEvent::Error { run_id, .. } => run_id.as_deref(),
            _ => None,
        }
    }

    pub fn is_terminal_for(&self, id: &str) -> bool {
        matches!(self, ConsoleEvent::ExecutionComplete { run_id, .. } if run_id == id)
    }
}

/// Fan-out of [`ConsoleEvent`]s to any number of observers
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<ConsoleEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send to every current observer. Having none is fine.
    pub fn broadcast(&self, event: ConsoleEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("No observers for event");
        }
    }

    /// Attach a new observer; it only sees events sent from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event = ConsoleEvent::ExecutionComplete {
            run_id: "r1".to_string(),
            capability_id: "demo.echo".to_string(),
            status: RunStatus::Succeeded,
            exit_code: Some(0),
            summary: "Run succeeded. Tail: done".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "execution-complete",
                "runId": "r1",
                "capabilityId": "demo.echo",
                "status": "succeeded",
                "exitCode": 0,
                "summary": "Run succeeded. Tail: done"
            })
        );
    }

    #[test]
    fn test_chunk_event_shape() {
        let event = ConsoleEvent::Execution {
            run_id: "r1".to_string(),
            capability_id: "demo.echo".to_string(),
            channel: StreamChannel::Stderr,
            text: "oops".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "execution");
        assert_eq!(value["channel"], "stderr");
    }

    #[test]
    fn test_pong_and_error_shape() {
        assert_eq!(serde_json::to_value(ConsoleEvent::Pong).unwrap(), json!({"type": "pong"}));
        assert_eq!(
            serde_json::to_value(ConsoleEvent::error("boom")).unwrap(),
            json!({"type": "error", "message": "boom"})
        );
    }

    #[test]
    fn test_event_round_trip() {
        let event = ConsoleEvent::ExecutionStarted {
            run_id: "r1".to_string(),
            capability_id: "demo.echo".to_string(),
        };
        let line = serde_json::to_string(&event).unwrap();
        let parsed: ConsoleEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.run_id(), Some("r1"));
    }

    #[tokio::test]
    async fn test_broadcast_without_observers_is_ok() {
        let broadcaster = EventBroadcaster::new(8);
        broadcaster.broadcast(ConsoleEvent::Pong);
    }

    #[tokio::test]
    async fn test_late_observer_gets_no_backlog() {
        let broadcaster = EventBroadcaster::new(8);
        let mut early = broadcaster.subscribe();
        broadcaster.broadcast(ConsoleEvent::error("first"));

        let mut late = broadcaster.subscribe();
        broadcaster.broadcast(ConsoleEvent::error("second"));

        assert_eq!(early.recv().await.unwrap(), ConsoleEvent::error("first"));
        assert_eq!(early.recv().await.unwrap(), ConsoleEvent::error("second"));
        assert_eq!(late.recv().await.unwrap(), ConsoleEvent::error("second"));
        assert!(late.try_recv().is_err());
    }
}
