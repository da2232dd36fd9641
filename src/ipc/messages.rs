//! Console request types.
//!
//! Uses JSON Lines (newline-delimited JSON) over a Unix stream socket.
//! Requests flow from observer to host; the host answers with
//! [`ConsoleEvent`](crate::events::ConsoleEvent) frames.

use serde::{Deserialize, Serialize};

use crate::domain::{CancelRequest, RunRequest};

/// Request sent from an observer to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ConsoleRequest {
    /// Start a run
    Run {
        capability_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        #[serde(default)]
        check: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        env_files: Vec<String>,
    },
    /// Stop a run by id, else the earliest run of a capability
    Cancel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capability_id: Option<String>,
    },
    /// Re-run capability discovery
    Reload,
    Ping,
}

impl ConsoleRequest {
    pub fn method(&self) -> &'static str {
        match self {
            ConsoleRequest::Run { .. } => "run",
            ConsoleRequest::Cancel { .. } => "cancel",
            ConsoleRequest::Reload => "reload",
            ConsoleRequest::Ping => "ping",
        }
    }
}

impl From<RunRequest> for ConsoleRequest {
    fn from(request: RunRequest) -> Self {
        ConsoleRequest::Run {
            capability_id: request.capability_id,
            prompt: request.prompt,
            check: request.check,
            env_files: request.env_files,
        }
    }
}

impl From<CancelRequest> for ConsoleRequest {
    fn from(request: CancelRequest) -> Self {
        ConsoleRequest::Cancel {
            run_id: request.run_id,
            capability_id: request.capability_id,
        }
    }
}
