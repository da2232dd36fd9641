//! Process results and the summaries derived from them.

use serde::{Deserialize, Serialize};

use super::run_record::RunStatus;

/// Output channel of a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamChannel {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamChannel::Stdout => f.write_str("stdout"),
            StreamChannel::Stderr => f.write_str("stderr"),
        }
    }
}

/// Everything a finished process left behind.
///
/// `exit_code` is `None` when the process never started or was killed by a signal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    pub exit_code: Option<i32>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_tail(&self) -> Option<String> {
        tail_line(&self.stdout)
    }

    pub fn stderr_tail(&self) -> Option<String> {
        tail_line(&self.stderr)
    }
}

/// Terminal status plus the one-line summary stored in the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub summary: String,
}

impl RunOutcome {
    pub fn cancelled() -> Self {
        Self {
            status: RunStatus::Cancelled,
            summary: "Run cancelled by operator.".to_string(),
        }
    }
}

/// Last nonempty line across the concatenated chunks.
///
/// Chunks carry no line boundaries, so they are joined before splitting.
pub fn tail_line(chunks: &[String]) -> Option<String> {
    let joined = chunks.concat();
    joined
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// First `max` characters of `text` (char-safe)
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Derive the terminal outcome of a process that ran (or failed to start).
pub fn summarise(result: &RunResult, max_chars: usize) -> RunOutcome {
    if result.succeeded() {
        let summary = match result.stdout_tail() {
            Some(tail) => format!("Run succeeded. Tail: {}", truncate_chars(&tail, max_chars)),
            None => "Run succeeded.".to_string(),
        };
        return RunOutcome {
            status: RunStatus::Succeeded,
            summary,
        };
    }

    let code = result.exit_code.unwrap_or(-1);
    let summary = match result.stderr_tail().or_else(|| result.stdout_tail()) {
        Some(tail) => format!("Run failed (exit {}). Tail: {}", code, truncate_chars(&tail, max_chars)),
        None => format!("Run failed (exit {}).", code),
    };
    RunOutcome {
        status: RunStatus::Failed,
        summary,
    }
}
