//! TCP accept loop

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::network::handshake;
use crate::registry::Registry;

/// Listen for USB/IP clients and run one handler task per connection
pub async fn serve(bind_addr: &str, registry: Arc<Registry>, worker_threads: usize) -> Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!("listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;
        debug!(%peer, "client connected");

        let registry = registry.clone();
        tokio::spawn(async move {
            match handshake::handle_connection(stream, registry, worker_threads).await {
                Ok(()) => debug!(%peer, "connection closed"),
                Err(err) => warn!(%peer, "connection ended with error: {err:#}"),
            }
        });
    }
}
