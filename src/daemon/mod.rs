//! Host core - context, crash recovery and the console service
//!
//! The host is the process that:
//! - Recovers runs interrupted by a previous crash
//! - Discovers capabilities and starts runs on request
//! - Serves console observers until told to stop

pub mod context;
pub mod handlers;
pub mod recovery;

use std::future::Future;
use std::sync::Arc;

pub use context::HostContext;
pub use recovery::{RECOVERED_SUMMARY, Recovery, RecoveryAction, RecoveryConfig};

use crate::error::Result;
use crate::ipc::{ConsoleServer, ConsoleServerConfig};

/// Recover, discover, then serve observers until `shutdown` resolves.
///
/// Active runs are cancelled before returning.
pub async fn serve<F>(ctx: Arc<HostContext>, server_config: ConsoleServerConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let recovered = ctx.recover().await?;
    if !recovered.is_empty() {
        log::info!("Recovery sweep touched {} record(s)", recovered.len());
    }

    // A failed discovery is reported to observers; the console still comes up
    if let Ok(payload) = ctx.reload_capabilities().await {
        log::info!("Loaded {} capabilities", payload.capabilities.len());
    }

    let mut server = ConsoleServer::new(server_config, ctx.events().clone());
    let listener = server.bind()?;
    let result = server.run(listener, Arc::clone(&ctx), shutdown).await;

    ctx.shutdown().await;
    result
}
