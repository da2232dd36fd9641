//! CLI module for caprun - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for launching
//! capabilities, inspecting the run ledger and talking to a running host.

pub mod commands;
pub mod console;
pub mod run;

use colored::*;

use caprun::domain::{RunRecord, RunStatus};
use caprun::id::format_timestamp;

pub use commands::Cli;

pub fn status_colored(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Running => status.as_str().cyan(),
        RunStatus::Succeeded => status.as_str().green(),
        RunStatus::Failed => status.as_str().red(),
        RunStatus::Cancelled => status.as_str().yellow(),
    }
}

/// Ledger records for `runs`: newest first, optionally filtered, at most `limit`
pub fn select_runs(records: Vec<RunRecord>, status: Option<RunStatus>, limit: usize) -> Vec<RunRecord> {
    let mut records: Vec<RunRecord> = records
        .into_iter()
        .filter(|r| status.is_none_or(|s| r.status == s))
        .collect();
    records.sort_by(|a, b| b.started.cmp(&a.started));
    records.truncate(limit);
    records
}

pub fn format_run_line(record: &RunRecord) -> String {
    format!(
        "{}  {:<9}  {}  {}\n    {}",
        format_timestamp(&record.started),
        status_colored(record.status),
        record.capability.bold(),
        record.id.dimmed(),
        record.summary
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use caprun::id::{offset_from_minutes, timestamp_now};
    use serde_json::Map;

    fn record(id: &str, status: RunStatus, seconds: i64) -> RunRecord {
        let mut record = RunRecord::running(id, "demo.echo", timestamp_now(offset_from_minutes(120)), None, Map::new());
        record.started += chrono::Duration::seconds(seconds);
        record.status = status;
        record
    }

    #[test]
    fn test_select_runs_newest_first_filtered() {
        let records = vec![
            record("old", RunStatus::Failed, 0),
            record("mid", RunStatus::Succeeded, 10),
            record("new", RunStatus::Failed, 20),
        ];

        let ids: Vec<String> = select_runs(records.clone(), None, 2).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["new", "mid"]);

        let ids: Vec<String> = select_runs(records, Some(RunStatus::Failed), 10)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
    }
}
