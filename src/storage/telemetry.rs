//! Append-only JSONL telemetry, one line per finished run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::domain::{RunRecord, RunStatus};
use crate::id::Timestamp;

/// One finished run as seen by telemetry consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub id: String,
    pub capability: String,
    pub status: RunStatus,
    pub started: Timestamp,
    pub completed: Option<Timestamp>,
    pub duration_seconds: f64,
    pub check: bool,
    pub secrets_loaded: Vec<String>,
    pub secrets_missing: Vec<String>,
    pub prompt_provided: bool,
}

impl TelemetryEvent {
    pub fn from_record(
        record: &RunRecord,
        duration_seconds: f64,
        check: bool,
        secrets_loaded: Vec<String>,
        secrets_missing: Vec<String>,
        prompt_provided: bool,
    ) -> Self {
        Self {
            id: record.id.clone(),
            capability: record.capability.clone(),
            status: record.status,
            started: record.started,
            completed: record.completed,
            duration_seconds,
            check,
            secrets_loaded,
            secrets_missing,
            prompt_provided,
        }
    }
}

/// Where telemetry lines go. A disabled sink drops every event.
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    path: Option<PathBuf>,
}

impl TelemetrySink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: Some(path.into()) }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one event. Failures are logged, never returned.
    pub async fn record(&self, event: &TelemetryEvent) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = append_line(path, event).await {
            log::warn!("Failed to write telemetry to {}: {}", path.display(), e);
        }
    }
}

async fn append_line(path: &Path, event: &TelemetryEvent) -> crate::error::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_string(event)?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
