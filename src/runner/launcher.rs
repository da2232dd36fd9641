//! Process launcher: spawns a capability entrypoint and streams its output.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;

use super::decode::Utf8Decoder;
use super::payload::{CapabilityPayload, PAYLOAD_ENV, WORKSPACE_ROOT_ENV, artifact_path};
use crate::domain::{CapabilitySummary, StreamChannel};
use crate::error::{CaprunError, Result};
use crate::id::Timestamp;

const READ_BUFFER_SIZE: usize = 8192;
const EVENT_CHANNEL_CAPACITY: usize = 256;
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Something observed on a running child
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A decoded chunk of output; boundaries carry no meaning
    Output { channel: StreamChannel, text: String },
    /// Child exited. Always the last event. `code` is `None` when killed by a signal.
    Exited { code: Option<i32> },
}

/// Asks the supervisor of a child to terminate it
#[derive(Debug, Clone)]
pub struct Terminator {
    notify: Arc<Notify>,
}

impl Terminator {
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
        }
    }

    /// Request termination. Returns immediately; repeated calls are harmless.
    pub fn terminate(&self) {
        self.notify.notify_one();
    }
}

impl Default for Terminator {
    fn default() -> Self {
        Self::new()
    }
}

/// A spawned child: its event stream and a way to stop it
#[derive(Debug)]
pub struct ProcessHandle {
    pub events: mpsc::Receiver<ProcessEvent>,
    pub terminator: Terminator,
}

/// Spawns capability entrypoints inside the workspace
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    workspace_root: PathBuf,
    artifacts_dir: PathBuf,
    timezone: String,
    cancel_grace: Duration,
}

impl ProcessLauncher {
    pub fn new(workspace_root: PathBuf, artifacts_dir: PathBuf, timezone: impl Into<String>, cancel_grace: Duration) -> Self {
        Self {
            workspace_root,
            artifacts_dir,
            timezone: timezone.into(),
            cancel_grace,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Build the payload for a run, creating the artifacts directory if needed
    pub async fn prepare_payload(
        &self,
        capability: &CapabilitySummary,
        prompt: Option<&str>,
        check: bool,
        run_id: &str,
        started: &Timestamp,
    ) -> Result<CapabilityPayload> {
        tokio::fs::create_dir_all(&self.artifacts_dir).await?;
        let output = artifact_path(&self.artifacts_dir, &capability.id, started, run_id);
        Ok(CapabilityPayload::new(prompt, check, capability.supports_check, output))
    }

    /// Spawn the capability.
    ///
    /// Environment layers, later winning: inherited, `WORKSPACE_ROOT`, `TZ`,
    /// `secrets`, then `CAPABILITY_PAYLOAD`.
    pub fn launch(
        &self,
        capability: &CapabilitySummary,
        secrets: &HashMap<String, String>,
        payload: &CapabilityPayload,
    ) -> Result<ProcessHandle> {
        let entrypoint = capability.absolute_entrypoint.display().to_string();

        let mut cmd = Command::new(&capability.absolute_entrypoint);
        cmd.current_dir(&self.workspace_root)
            .env(WORKSPACE_ROOT_ENV, &self.workspace_root)
            .env("TZ", &self.timezone)
            .envs(secrets)
            .env(PAYLOAD_ENV, payload.to_env_value()?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::debug!("Spawning {} for capability {}", entrypoint, capability.id);
        let mut child = cmd.spawn().map_err(|source| CaprunError::Spawn {
            entrypoint: entrypoint.clone(),
            source,
        })?;

        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let terminator = Terminator::new();

        let supervisor = Supervisor {
            child,
            tx,
            terminate: terminator.notify.clone(),
            grace: self.cancel_grace,
        };
        tokio::spawn(supervisor.run(stdout, stderr));

        log::info!("Started {} (pid {:?}) for capability {}", entrypoint, pid, capability.id);
        Ok(ProcessHandle {
            events: rx,
            terminator,
        })
    }
}

/// Owns the child until it exits
struct Supervisor {
    child: Child,
    tx: mpsc::Sender<ProcessEvent>,
    terminate: Arc<Notify>,
    grace: Duration,
}

/// One output pipe and its decoder
struct Pipe<R> {
    reader: Option<R>,
    decoder: Utf8Decoder,
    channel: StreamChannel,
}

impl<R: AsyncRead + Unpin> Pipe<R> {
    fn new(reader: Option<R>, channel: StreamChannel) -> Self {
        Self {
            reader,
            decoder: Utf8Decoder::new(),
            channel,
        }
    }

    fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.reader.as_mut() {
            Some(reader) => reader.read(buf).await,
            None => std::future::pending().await,
        }
    }

    /// Turn one read result into an event, closing the pipe on EOF or error
    fn handle(&mut self, read: std::io::Result<usize>, buf: &[u8]) -> Option<ProcessEvent> {
        let text = match read {
            Ok(0) => {
                self.reader = None;
                self.decoder.finish()
            }
            Ok(n) => self.decoder.push(&buf[..n]),
            Err(e) => {
                log::warn!("Error reading {}: {}", self.channel, e);
                self.reader = None;
                self.decoder.finish()
            }
        };
        if text.is_empty() {
            None
        } else {
            Some(ProcessEvent::Output {
                channel: self.channel,
                text,
            })
        }
    }
}

impl Supervisor {
    async fn run(mut self, stdout: Option<tokio::process::ChildStdout>, stderr: Option<tokio::process::ChildStderr>) {
        let mut out = Pipe::new(stdout, StreamChannel::Stdout);
        let mut err = Pipe::new(stderr, StreamChannel::Stderr);
        let mut out_buf = vec![0u8; READ_BUFFER_SIZE];
        let mut err_buf = vec![0u8; READ_BUFFER_SIZE];
        let mut terminating = false;
        let mut kill_at: Option<Instant> = None;

        let code = loop {
            let streams_closed = !out.is_open() && !err.is_open();
            let deadline = kill_at;

            tokio::select! {
                read = out.read(&mut out_buf), if out.is_open() => {
                    if let Some(event) = out.handle(read, &out_buf) {
                        let _ = self.tx.send(event).await;
                    }
                }
                read = err.read(&mut err_buf), if err.is_open() => {
                    if let Some(event) = err.handle(read, &err_buf) {
                        let _ = self.tx.send(event).await;
                    }
                }
                // Once terminating, stop waiting for pipes that a surviving
                // grandchild may hold open.
                status = self.child.wait(), if streams_closed || terminating => {
                    break match status {
                        Ok(status) => status.code(),
                        Err(e) => {
                            log::warn!("Failed to wait for child: {}", e);
                            None
                        }
                    };
                }
                _ = self.terminate.notified(), if !terminating => {
                    terminating = true;
                    kill_at = self.begin_termination();
                }
                _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                    kill_at = None;
                    log::info!("Child did not exit within {:?}, killing", self.grace);
                    if let Err(e) = self.child.start_kill() {
                        log::warn!("Failed to kill child: {}", e);
                    }
                }
            }
        };

        // Output written just before exit may still be buffered in the pipes
        let tx = &self.tx;
        let drain = async {
            while out.is_open() || err.is_open() {
                tokio::select! {
                    read = out.read(&mut out_buf), if out.is_open() => {
                        if let Some(event) = out.handle(read, &out_buf) {
                            let _ = tx.send(event).await;
                        }
                    }
                    read = err.read(&mut err_buf), if err.is_open() => {
                        if let Some(event) = err.handle(read, &err_buf) {
                            let _ = tx.send(event).await;
                        }
                    }
                }
            }
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            log::debug!("Output pipes still open after exit, closing them");
        }

        log::debug!("Child exited with {:?}", code);
        let _ = self.tx.send(ProcessEvent::Exited { code }).await;
    }

    /// SIGTERM first, forced kill after the grace period. Returns the kill deadline.
    fn begin_termination(&mut self) -> Option<Instant> {
        if !self.grace.is_zero() && send_sigterm(&self.child) {
            return Some(Instant::now() + self.grace);
        }
        if let Err(e) = self.child.start_kill() {
            log::warn!("Failed to kill child: {}", e);
        }
        None
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return false;
    };
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Failed to send SIGTERM to {}: {}", pid, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}
