//! Caprun - capability run lifecycle core
//!
//! Caprun discovers automation capabilities from a workspace manifest,
//! launches them as child processes, streams their output to observers and
//! keeps a durable ledger of every run.

pub mod config;
pub mod daemon;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod events;
pub mod id;
pub mod ipc;
pub mod manager;
pub mod runner;
pub mod secrets;
pub mod storage;

#[cfg(test)]
mod testutil;

pub use error::{CaprunError, Result};
