//! Run manager module - tracks runs from launch to terminal state.
//!
//! This module provides:
//! - RunManager for starting, relaying, finalizing and cancelling runs
//! - Registry of active runs with a single-shot completion guard

mod registry;
mod run_manager;

pub use registry::{ActiveRun, ActiveRunInfo, ClaimedRun, Registry, RunTelemetry};
pub use run_manager::{RunHandle, RunManager, RunManagerConfig, Termination};
