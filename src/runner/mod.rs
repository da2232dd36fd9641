//! Process launcher module - spawns capability entrypoints.
//!
//! This module provides:
//! - ProcessLauncher for spawning a capability with its layered environment
//! - CapabilityPayload and the artifact path handed to each run
//! - Utf8Decoder for turning pipe reads into text chunks

mod decode;
mod launcher;
mod payload;

pub use decode::Utf8Decoder;
pub use launcher::{ProcessEvent, ProcessHandle, ProcessLauncher, Terminator};
pub use payload::{CapabilityPayload, PAYLOAD_ENV, WORKSPACE_ROOT_ENV, artifact_path};
