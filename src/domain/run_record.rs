//! Persisted run records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::id::Timestamp;

/// Well-known metadata keys
pub mod metadata_keys {
    pub const WORKSPACE_ROOT: &str = "workspaceRoot";
    pub const CHECK: &str = "check";
    pub const PROMPT: &str = "prompt";
    pub const PROVENANCE: &str = "provenance";
    pub const INITIATOR: &str = "initiator";
    pub const ARTIFACT: &str = "artifact";
    pub const SECRETS_REQUESTED: &str = "secretsRequested";
    pub const SECRETS_LOADED: &str = "secretsLoaded";
    pub const SECRETS_MISSING: &str = "secretsMissing";
    pub const EXIT_CODE: &str = "exitCode";
    pub const STDOUT_TAIL: &str = "stdoutTail";
    pub const STDERR_TAIL: &str = "stderrTail";
    pub const DURATION_SECONDS: &str = "durationSeconds";
    pub const CANCELLED: &str = "cancelled";
    pub const SPAWN_ERROR: &str = "spawnError";
    pub const AUTO_RECOVERED: &str = "autoRecovered";
}

/// Status of a run. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Check if status is terminal (no further transitions)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" | "canceled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// One ledger entry. Keyed by `id` within the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    /// Capability id (reference, not ownership)
    pub capability: String,
    pub status: RunStatus,
    pub summary: String,
    pub started: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<Timestamp>,
    /// Entrypoint reference for traceability
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
    /// Open key/value bag; see [`metadata_keys`]
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl RunRecord {
    /// Create the initial `running` record for a freshly launched run
    pub fn running(
        id: impl Into<String>,
        capability: impl Into<String>,
        started: Timestamp,
        log_path: Option<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
            status: RunStatus::Running,
            summary: "Run started.".to_string(),
            started,
            completed: None,
            log_path,
            metadata,
        }
    }

    /// True once the recovery sweep has already reclassified this record
    pub fn is_auto_recovered(&self) -> bool {
        self.metadata
            .get(metadata_keys::AUTO_RECOVERED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Exit code recorded at finalization, if any
    pub fn exit_code(&self) -> Option<i64> {
        self.metadata.get(metadata_keys::EXIT_CODE).and_then(Value::as_i64)
    }

    pub fn set_meta(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}
