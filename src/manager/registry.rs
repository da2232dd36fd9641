//! In-memory registry of runs that have not yet been finalized.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::domain::{RunRecord, StreamChannel};
use crate::id::Timestamp;
use crate::runner::Terminator;

/// Inputs remembered for the telemetry line written at finalization
#[derive(Debug, Clone, Default)]
pub struct RunTelemetry {
    pub check: bool,
    pub prompt_provided: bool,
    pub secrets_loaded: Vec<String>,
    pub secrets_missing: Vec<String>,
}

/// One outstanding run. Lives until its single finalization has notified observers.
#[derive(Debug)]
pub struct ActiveRun {
    /// The `running` record as written at start
    pub record: RunRecord,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub started_at: Instant,
    pub completed: bool,
    pub terminator: Terminator,
    pub telemetry: RunTelemetry,
    done: Option<oneshot::Sender<RunRecord>>,
    seq: u64,
}

impl ActiveRun {
    pub fn new(
        record: RunRecord,
        terminator: Terminator,
        telemetry: RunTelemetry,
        done: oneshot::Sender<RunRecord>,
    ) -> Self {
        Self {
            record,
            stdout: Vec::new(),
            stderr: Vec::new(),
            started_at: Instant::now(),
            completed: false,
            terminator,
            telemetry,
            done: Some(done),
            seq: 0,
        }
    }

    /// Append a chunk. Chunks are never reordered or dropped while active.
    pub fn push_chunk(&mut self, channel: StreamChannel, text: String) {
        match channel {
            StreamChannel::Stdout => self.stdout.push(text),
            StreamChannel::Stderr => self.stderr.push(text),
        }
    }
}

/// Everything finalization needs, taken out of the registry in one step
#[derive(Debug)]
pub struct ClaimedRun {
    pub record: RunRecord,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub started_at: Instant,
    pub terminator: Terminator,
    pub telemetry: RunTelemetry,
    pub done: Option<oneshot::Sender<RunRecord>>,
}

/// Summary of an active run for listings
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveRunInfo {
    pub run_id: String,
    pub capability_id: String,
    pub started: Timestamp,
}

/// Run id to [`ActiveRun`]. Callers hold one lock around every access.
#[derive(Debug, Default)]
pub struct Registry {
    runs: HashMap<String, ActiveRun>,
    next_seq: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mut run: ActiveRun) {
        run.seq = self.next_seq;
        self.next_seq += 1;
        self.runs.insert(run.record.id.clone(), run);
    }

    /// Active (not yet completed) run by id
    pub fn get_active_mut(&mut self, run_id: &str) -> Option<&mut ActiveRun> {
        self.runs.get_mut(run_id).filter(|run| !run.completed)
    }

    /// Test-and-set the completion flag; only the first caller gets the data
    pub fn claim(&mut self, run_id: &str) -> Option<ClaimedRun> {
        let run = self.get_active_mut(run_id)?;
        run.completed = true;
        Some(ClaimedRun {
            record: run.record.clone(),
            stdout: std::mem::take(&mut run.stdout),
            stderr: std::mem::take(&mut run.stderr),
            started_at: run.started_at,
            terminator: run.terminator.clone(),
            telemetry: std::mem::take(&mut run.telemetry),
            done: run.done.take(),
        })
    }

    pub fn remove(&mut self, run_id: &str) -> Option<ActiveRun> {
        self.runs.remove(run_id)
    }

    /// Earliest-started active run of a capability
    pub fn find_by_capability(&self, capability_id: &str) -> Option<String> {
        self.runs
            .values()
            .filter(|run| !run.completed && run.record.capability == capability_id)
            .min_by_key(|run| run.seq)
            .map(|run| run.record.id.clone())
    }

    pub fn contains_active(&self, run_id: &str) -> bool {
        self.runs.get(run_id).is_some_and(|run| !run.completed)
    }

    /// Active runs in start order
    pub fn active(&self) -> Vec<ActiveRunInfo> {
        let mut runs: Vec<&ActiveRun> = self.runs.values().filter(|run| !run.completed).collect();
        runs.sort_by_key(|run| run.seq);
        runs.into_iter()
            .map(|run| ActiveRunInfo {
                run_id: run.record.id.clone(),
                capability_id: run.record.capability.clone(),
                started: run.record.started,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
