//! Persistence for caprun: the run ledger and the telemetry sink.

mod ledger;
mod telemetry;

pub use ledger::RunLedger;
pub use telemetry::{TelemetryEvent, TelemetrySink};
