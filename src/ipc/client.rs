//! Console client for talking to a running host.
//!
//! Provides:
//! - Connection to the host's Unix socket
//! - Request sending
//! - Event streaming, optionally bounded by a timeout

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use crate::domain::RunRequest;
use crate::error::{CaprunError, Result};
use crate::events::ConsoleEvent;
use crate::ipc::messages::ConsoleRequest;

/// Configuration for the console client.
#[derive(Debug, Clone)]
pub struct ConsoleClientConfig {
    /// Path to the host's Unix socket.
    pub socket_path: PathBuf,
    /// How long `recv_timeout` waits for the next frame, in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ConsoleClientConfig {
    fn default() -> Self {
        Self {
            socket_path: crate::config::default_socket_path(),
            request_timeout_ms: 30000,
        }
    }
}

impl ConsoleClientConfig {
    /// Create config with custom socket path.
    pub fn with_socket(path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: path.into(),
            ..Default::default()
        }
    }
}

/// Connected console client.
pub struct ConsoleClient {
    config: ConsoleClientConfig,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl ConsoleClient {
    /// Connect to the host.
    pub async fn connect(config: ConsoleClientConfig) -> Result<Self> {
        let stream = UnixStream::connect(&config.socket_path).await.map_err(|e| {
            CaprunError::Ipc(format!("Failed to connect to {}: {}", config.socket_path.display(), e))
        })?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            config,
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    /// Get socket path.
    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Send one request frame.
    pub async fn send(&mut self, request: &ConsoleRequest) -> Result<()> {
        let mut json = serde_json::to_string(request)?;
        json.push('\n');
        self.writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| CaprunError::Ipc(format!("Failed to write: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| CaprunError::Ipc(format!("Failed to flush: {}", e)))
    }

    /// Next event, or `None` once the host closes the connection.
    ///
    /// Frames that do not parse are skipped.
    pub async fn recv(&mut self) -> Result<Option<ConsoleEvent>> {
        loop {
            let Some(line) = self
                .lines
                .next_line()
                .await
                .map_err(|e| CaprunError::Ipc(format!("Failed to read: {}", e)))?
            else {
                return Ok(None);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ConsoleEvent>(line) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => log::warn!("Ignoring unreadable console frame: {}", e),
            }
        }
    }

    /// Like [`recv`](Self::recv) but gives up after the configured timeout.
    pub async fn recv_timeout(&mut self) -> Result<Option<ConsoleEvent>> {
        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| CaprunError::Ipc("Timed out waiting for the host".into()))?
    }

    /// Skip events until one satisfies `pred`.
    pub async fn recv_until<F>(&mut self, mut pred: F) -> Result<ConsoleEvent>
    where
        F: FnMut(&ConsoleEvent) -> bool,
    {
        loop {
            match self.recv_timeout().await? {
                Some(event) if pred(&event) => return Ok(event),
                Some(_) => continue,
                None => return Err(CaprunError::Ipc("Connection closed by host".into())),
            }
        }
    }

    /// Ask the host to start a run and return its id.
    ///
    /// Broadcasts that arrive before the reply belong to other runs and are
    /// skipped; this run's own events always follow the `run-accepted` frame.
    pub async fn start_run(&mut self, request: RunRequest) -> Result<String> {
        let capability = request.capability_id.clone();
        self.send(&ConsoleRequest::from(request)).await?;

        let reply = self
            .recv_until(|event| match event {
                ConsoleEvent::RunAccepted { .. } => true,
                ConsoleEvent::Error {
                    capability_id, run_id, ..
                } => run_id.is_none() && capability_id.as_deref() == Some(capability.as_str()),
                _ => false,
            })
            .await?;

        match reply {
            ConsoleEvent::RunAccepted { run_id, .. } => Ok(run_id),
            ConsoleEvent::Error { message, .. } => Err(CaprunError::Rejected(message)),
            other => Err(CaprunError::Ipc(format!("Unexpected reply: {:?}", other))),
        }
    }

    /// Send ping and wait for the pong.
    pub async fn ping(&mut self) -> Result<()> {
        self.send(&ConsoleRequest::Ping).await?;
        self.recv_until(|event| matches!(event, ConsoleEvent::Pong)).await?;
        Ok(())
    }
}
