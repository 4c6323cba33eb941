//! Dialers
//!
//! The relay never touches sockets directly: it asks a [`Dialer`] for a byte
//! stream to `host:port`. The SSH session manager dials through the remote
//! host, [`TcpDialer`] dials from the local machine.

use std::pin::Pin;

use async_trait::async_trait;
use http::uri::Authority;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::error::ProxyError;
use crate::ssh::{SessionConnector, SessionManager};

/// Bidirectional byte stream to a destination
pub trait Connection: AsyncRead + AsyncWrite + Send {}

impl<T: AsyncRead + AsyncWrite + Send + ?Sized> Connection for T {}

pub type BoxedConnection = Pin<Box<dyn Connection>>;

/// Opens connections to `host:port` destinations
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, addr: &str) -> Result<BoxedConnection, ProxyError>;
}

/// Dials with the local network stack
#[derive(Debug, Clone, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str) -> Result<BoxedConnection, ProxyError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ProxyError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
        debug!("Direct connection to {}", addr);
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl<C: SessionConnector> Dialer for SessionManager<C> {
    async fn dial(&self, addr: &str) -> Result<BoxedConnection, ProxyError> {
        let (host, port) = split_host_port(addr)?;
        Ok(self.open_channel(&host, port).await?)
    }
}

/// Split `host:port` (IPv6 hosts in brackets) into its parts.
pub fn split_host_port(addr: &str) -> Result<(String, u16), ProxyError> {
    let authority: Authority = addr
        .parse()
        .map_err(|_| ProxyError::InvalidRequest(format!("invalid address {}", addr)))?;
    let port = authority
        .port_u16()
        .ok_or_else(|| ProxyError::InvalidRequest(format!("missing port in {}", addr)))?;
    let host = authority
        .host()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    if host.is_empty() {
        return Err(ProxyError::InvalidRequest(format!("missing host in {}", addr)));
    }
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::mock::{MockConnector, REFUSED_HOST};
    use crate::ssh::SshError;

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("example.com:443").unwrap(),
            ("example.com".to_string(), 443)
        );
        assert_eq!(
            split_host_port("[2001:db8::1]:8080").unwrap(),
            ("2001:db8::1".to_string(), 8080)
        );
        assert!(split_host_port("example.com").is_err());
        assert!(split_host_port("not an address").is_err());
    }

    #[tokio::test]
    async fn test_tcp_dialer_refused() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = TcpDialer.dial(&addr).await.err().unwrap();
        assert!(matches!(err, ProxyError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_session_dialer_maps_refusal() {
        let manager = SessionManager::start(MockConnector::default()).await.unwrap();
        let err = manager
            .dial(&format!("{}:443", REFUSED_HOST))
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ProxyError::Session(SshError::ChannelOpenFailed { .. })
        ));
    }
}
