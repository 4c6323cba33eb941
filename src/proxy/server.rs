//! Proxy listener
//!
//! Accepts client connections on the local address and serves each one as
//! HTTP/1.1 in its own task, with upgrades enabled so CONNECT can turn the
//! connection into a raw tunnel.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::dialer::Dialer;
use super::dispatch::Dispatcher;
use super::error::ProxyError;
use super::tls::TlsOriginator;

/// Proxy statistics
#[derive(Debug, Clone, Default)]
pub struct ProxyStats {
    /// Total client connections accepted
    pub connection_count: u64,
    /// Currently open client connections
    pub active_connections: u64,
    /// CONNECT tunnels that have finished
    pub tunnels_closed: u64,
    /// Tunnel bytes client -> upstream
    pub bytes_sent: u64,
    /// Tunnel bytes upstream -> client
    pub bytes_received: u64,
}

impl ProxyStats {
    pub(crate) fn record_tunnel(&mut self, sent: u64, received: u64) {
        self.tunnels_closed += 1;
        self.bytes_sent += sent;
        self.bytes_received += received;
    }
}

pub type SharedStats = Arc<RwLock<ProxyStats>>;

/// Bound, not yet serving, proxy listener
pub struct ProxyServer<D: ?Sized> {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher<D>>,
    stats: SharedStats,
}

impl<D: Dialer + ?Sized> ProxyServer<D> {
    /// Bind the listen address. Upstream connections go through `dialer`.
    pub async fn bind(addr: &str, dialer: Arc<D>) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::AddrInUse => ProxyError::Bind(format!(
                "Port already in use: {}. Another application may be using this port.",
                addr
            )),
            std::io::ErrorKind::PermissionDenied => ProxyError::Bind(format!(
                "Permission denied binding to {}. Ports below 1024 require elevated privileges.",
                addr
            )),
            std::io::ErrorKind::AddrNotAvailable => ProxyError::Bind(format!(
                "Address not available: {}. The specified address is not valid on this system.",
                addr
            )),
            _ => ProxyError::Bind(format!("Failed to bind proxy to {}: {}", addr, e)),
        })?;

        let tls = TlsOriginator::with_webpki_roots()?;
        let stats: SharedStats = Arc::new(RwLock::new(ProxyStats::default()));
        Ok(Self {
            listener,
            dispatcher: Arc::new(Dispatcher::new(dialer, tls, stats.clone())),
            stats,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to the live statistics
    pub fn stats(&self) -> SharedStats {
        self.stats.clone()
    }

    /// Serve until the process ends.
    pub async fn serve(self) {
        self.serve_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Connections already being served keep running to completion.
    pub async fn serve_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        match self.listener.local_addr() {
            Ok(addr) => info!("HTTP proxy listening on {}", addr),
            Err(e) => warn!("HTTP proxy listening on unknown address: {}", e),
        }

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("HTTP proxy stopped");
                    break;
                }

                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!("Failed to set TCP_NODELAY: {}", e);
                            }
                            debug!("Accepted connection from {}", peer_addr);

                            {
                                let mut s = self.stats.write();
                                s.connection_count += 1;
                                s.active_connections += 1;
                            }

                            let dispatcher = self.dispatcher.clone();
                            let stats = self.stats.clone();

                            tokio::spawn(async move {
                                let service = service_fn(move |req| {
                                    let dispatcher = dispatcher.clone();
                                    async move { Ok::<_, Infallible>(dispatcher.handle(req).await) }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .preserve_header_case(true)
                                    .title_case_headers(true)
                                    .serve_connection(TokioIo::new(stream), service)
                                    .with_upgrades()
                                    .await
                                {
                                    debug!("Connection from {} ended: {}", peer_addr, e);
                                }

                                let active = {
                                    let mut s = stats.write();
                                    s.active_connections = s.active_connections.saturating_sub(1);
                                    s.active_connections
                                };
                                debug!("Connection from {} closed, {} active", peer_addr, active);
                            });
                        }
                        Err(e) => {
                            error!("Proxy accept error: {}", e);
                            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }
    }
}
