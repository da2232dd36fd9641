//! Console server - Unix socket server for observer-host communication
//!
//! Provides:
//! - Unix stream socket listener
//! - Per-observer request handling and direct replies
//! - Forwarding of broadcast lifecycle events

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{RwLock, broadcast};

use crate::error::{CaprunError, Result};
use crate::events::{ConsoleEvent, EventBroadcaster};
use crate::ipc::messages::ConsoleRequest;

/// Configuration for the console server
#[derive(Debug, Clone)]
pub struct ConsoleServerConfig {
    /// Path to the Unix socket
    pub socket_path: PathBuf,
    /// Maximum number of concurrent observers
    pub max_clients: usize,
}

impl Default for ConsoleServerConfig {
    fn default() -> Self {
        Self {
            socket_path: crate::config::default_socket_path(),
            max_clients: 16,
        }
    }
}

impl ConsoleServerConfig {
    /// Create config with custom socket path
    pub fn with_socket_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.socket_path = path.as_ref().to_path_buf();
        self
    }

    /// Set max clients
    pub fn with_max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }
}

/// Handler trait for processing requests
pub trait RequestHandler: Send + Sync {
    /// Frames sent to an observer right after it connects
    fn greeting(&self) -> impl Future<Output = Vec<ConsoleEvent>> + Send;

    /// Handle a request. `Some` is a direct reply to the requester only.
    fn handle(&self, request: ConsoleRequest) -> impl Future<Output = Option<ConsoleEvent>> + Send;
}

/// Connected observer state
#[derive(Debug)]
struct ClientState {
    /// Requests handled for this observer
    requests: u64,
}

/// Console server relaying run events to observers
pub struct ConsoleServer {
    config: ConsoleServerConfig,
    events: EventBroadcaster,
    clients: Arc<RwLock<HashMap<u64, ClientState>>>,
    next_client_id: u64,
}

impl ConsoleServer {
    pub fn new(config: ConsoleServerConfig, events: EventBroadcaster) -> Self {
        Self {
            config,
            events,
            clients: Arc::new(RwLock::new(HashMap::new())),
            next_client_id: 1,
        }
    }

    /// Bind the socket, replacing a stale one
    pub fn bind(&self) -> Result<UnixListener> {
        if self.config.socket_path.exists() {
            std::fs::remove_file(&self.config.socket_path)?;
        }
        if let Some(parent) = self.config.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        UnixListener::bind(&self.config.socket_path)
            .map_err(|e| CaprunError::Ipc(format!("Failed to bind {}: {}", self.config.socket_path.display(), e)))
    }

    /// Accept observers until `shutdown` resolves, then remove the socket
    pub async fn run<H, F>(&mut self, listener: UnixListener, handler: Arc<H>, shutdown: F) -> Result<()>
    where
        H: RequestHandler + 'static,
        F: Future<Output = ()>,
    {
        log::info!("Console listening on {}", self.config.socket_path.display());
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => self.admit(stream, Arc::clone(&handler)).await,
                        Err(e) => log::warn!("Accept error: {}", e),
                    }
                }
                _ = &mut shutdown => break,
            }
        }

        let _ = std::fs::remove_file(&self.config.socket_path);
        log::info!("Console server stopped");
        Ok(())
    }

    async fn admit<H: RequestHandler + 'static>(&mut self, stream: UnixStream, handler: Arc<H>) {
        let client_count = self.clients.read().await.len();
        if client_count >= self.config.max_clients {
            log::warn!("Rejecting observer: {} already connected", client_count);
            return;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;
        self.clients.write().await.insert(client_id, ClientState { requests: 0 });

        // Subscribe before the greeting so nothing falls between the two
        let event_rx = self.events.subscribe();
        let clients = Arc::clone(&self.clients);
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, client_id, handler, Arc::clone(&clients), event_rx).await {
                log::debug!("Observer {} dropped: {}", client_id, e);
            }
            if let Some(state) = clients.write().await.remove(&client_id) {
                log::debug!("Observer {} disconnected after {} request(s)", client_id, state.requests);
            }
        });
    }
}

async fn write_event(writer: &mut OwnedWriteHalf, event: &ConsoleEvent) -> Result<()> {
    let mut json = serde_json::to_string(event)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    Ok(())
}

/// Handle a single observer connection
async fn handle_client<H: RequestHandler>(
    stream: UnixStream,
    client_id: u64,
    handler: Arc<H>,
    clients: Arc<RwLock<HashMap<u64, ClientState>>>,
    mut event_rx: broadcast::Receiver<ConsoleEvent>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    // `next_line` keeps partial input buffered when the other branch wins
    let mut lines = BufReader::new(reader).lines();

    for event in handler.greeting().await {
        write_event(&mut writer, &event).await?;
    }

    loop {
        tokio::select! {
            read_result = lines.next_line() => {
                match read_result {
                    Ok(None) => break, // EOF - observer disconnected
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if !trimmed.is_empty() {
                            let reply = match serde_json::from_str::<ConsoleRequest>(trimmed) {
                                Ok(request) => {
                                    log::debug!("Observer {} sent {}", client_id, request.method());
                                    if let Some(state) = clients.write().await.get_mut(&client_id) {
                                        state.requests += 1;
                                    }
                                    handler.handle(request).await
                                }
                                Err(e) => Some(ConsoleEvent::error(format!("Invalid request: {}", e))),
                            };
                            if let Some(reply) = reply {
                                write_event(&mut writer, &reply).await?;
                            }
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            event_result = event_rx.recv() => {
                match event_result {
                    Ok(event) => write_event(&mut writer, &event).await?,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("Observer {} lagged, skipped {} event(s)", client_id, missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    Ok(())
}
