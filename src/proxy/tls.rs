//! TLS origination for `https://` forward requests
//!
//! The client sends a plain proxy request for an https URL; the proxy opens
//! the TLS session to the origin itself, on top of the dialed connection.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;

use super::dialer::BoxedConnection;
use super::error::ProxyError;

/// Client side TLS over dialed connections
#[derive(Clone)]
pub struct TlsOriginator {
    connector: TlsConnector,
}

impl TlsOriginator {
    /// Trust the Mozilla root set shipped in `webpki-roots`.
    pub fn with_webpki_roots() -> Result<Self, ProxyError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_roots(roots)
    }

    pub fn with_roots(roots: RootCertStore) -> Result<Self, ProxyError> {
        let config =
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()
                .map_err(|e| ProxyError::Tls(format!("TLS setup failed: {}", e)))?
                .with_root_certificates(roots)
                .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    /// Run the TLS handshake for `host` over `conn`.
    pub async fn connect(
        &self,
        host: &str,
        conn: BoxedConnection,
    ) -> Result<BoxedConnection, ProxyError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| ProxyError::Tls(format!("invalid server name {}: {}", host, e)))?;

        let stream = self
            .connector
            .connect(server_name, conn)
            .await
            .map_err(|e| ProxyError::Tls(format!("TLS handshake with {} failed: {}", host, e)))?;

        debug!("TLS established with {}", host);
        Ok(Box::pin(stream))
    }
}
