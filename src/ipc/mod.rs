//! IPC Layer - Unix socket console for run observers
//!
//! This module provides:
//! - Request types sent by observers
//! - Unix socket server for the host
//! - Client for CLI observers

pub mod client;
pub mod messages;
pub mod server;

pub use client::{ConsoleClient, ConsoleClientConfig};
pub use messages::ConsoleRequest;
pub use server::{ConsoleServer, ConsoleServerConfig, RequestHandler};
