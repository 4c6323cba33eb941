//! sshproxy - an HTTP proxy that tunnels everything through one SSH session
//!
//! Browsers and tools talk plain HTTP proxy protocol to a local port. Every
//! destination connection is opened as a `direct-tcpip` channel on a single
//! long-lived SSH session, which is re-established transparently when it
//! drops.

pub mod config;
pub mod proxy;
pub mod ssh;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::ProxyConfig;
use proxy::{ProxyError, ProxyServer};

/// Install the global tracing subscriber (`RUST_LOG`, default `info`).
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Connect to the SSH server and serve the proxy until Ctrl-C.
pub async fn run(config: ProxyConfig) -> Result<(), ProxyError> {
    tracing::info!("Starting...");

    let session =
        Arc::new(ssh::open(&config.remote, &config.private_key, config.connect_options()).await?);
    let server = ProxyServer::bind(&config.local_addr, session.clone()).await?;

    tracing::info!("Listen and serve HTTP proxy on {}", server.local_addr()?);
    tracing::info!("Remote SSH server: {}", session.connector().target());
    let stats = server.stats();

    server
        .serve_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    let stats = stats.read().clone();
    tracing::info!(
        "Shutting down: {} connections served ({} still open), {} tunnels, {} SSH reconnects",
        stats.connection_count,
        stats.active_connections,
        stats.tunnels_closed,
        session.reconnect_count()
    );
    session.close().await;
    Ok(())
}
