//! Crash recovery for the run ledger
//!
//! A record still marked `running` when the host starts belongs to a process
//! that died with its run in flight. Recovery marks those records failed
//! before any new request is accepted.

use std::sync::Arc;

use chrono::FixedOffset;

use crate::domain::{RunStatus, metadata_keys as keys};
use crate::error::Result;
use crate::id::timestamp_now;
use crate::storage::RunLedger;

/// Summary written on every recovered record
pub const RECOVERED_SUMMARY: &str = "Run auto-marked as failed after interrupted execution.";

/// Result of recovering a single record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Interrupted run rewritten as failed
    MarkedFailed { run_id: String },
    /// Record was already flagged by an earlier sweep
    Skipped { run_id: String },
}

impl RecoveryAction {
    pub fn run_id(&self) -> &str {
        match self {
            Self::MarkedFailed { run_id } | Self::Skipped { run_id } => run_id,
        }
    }
}

/// Configuration for recovery behavior
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub summary: String,
    pub utc_offset: FixedOffset,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            summary: RECOVERED_SUMMARY.to_string(),
            utc_offset: crate::id::offset_from_minutes(120),
        }
    }
}

/// Recovery manager for interrupted runs
pub struct Recovery {
    ledger: Arc<RunLedger>,
    config: RecoveryConfig,
}

impl Recovery {
    pub fn new(ledger: Arc<RunLedger>, config: RecoveryConfig) -> Self {
        Self { ledger, config }
    }

    /// Sweep the ledger once. Safe to repeat: a second sweep changes nothing.
    pub async fn recover_all(&self) -> Result<Vec<RecoveryAction>> {
        let now = timestamp_now(self.config.utc_offset);
        let summary = self.config.summary.clone();
        let mut actions = Vec::new();

        self.ledger
            .mutate(|records| {
                for record in records.iter_mut().filter(|r| r.status == RunStatus::Running) {
                    if record.is_auto_recovered() {
                        actions.push(RecoveryAction::Skipped {
                            run_id: record.id.clone(),
                        });
                        continue;
                    }
                    record.status = RunStatus::Failed;
                    record.completed.get_or_insert(now);
                    record.summary = summary.clone();
                    record.set_meta(keys::AUTO_RECOVERED, true);
                    actions.push(RecoveryAction::MarkedFailed {
                        run_id: record.id.clone(),
                    });
                }
                actions.iter().any(|a| matches!(a, RecoveryAction::MarkedFailed { .. }))
            })
            .await?;

        for action in &actions {
            match action {
                RecoveryAction::MarkedFailed { run_id } => log::warn!("Recovered interrupted run {}", run_id),
                RecoveryAction::Skipped { run_id } => log::debug!("Run {} already recovered", run_id),
            }
        }
        Ok(actions)
    }
}
