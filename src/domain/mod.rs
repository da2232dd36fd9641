//! Domain types for caprun
//!
//! This module contains the core domain types:
//! - CapabilitySummary / DiscoveryPayload: what can be launched
//! - RunRecord / RunStatus: one persisted ledger entry per run
//! - RunResult / RunOutcome: captured output and its summary
//! - RunRequest / CancelRequest: what front ends send

pub mod capability;
pub mod outcome;
pub mod request;
pub mod run_record;

pub use capability::{CapabilitySummary, DiscoveryPayload};
pub use outcome::{RunOutcome, RunResult, StreamChannel, summarise, tail_line, truncate_chars};
pub use request::{CancelRequest, Initiator, RunRequest};
pub use run_record::{RunRecord, RunStatus, metadata_keys};
