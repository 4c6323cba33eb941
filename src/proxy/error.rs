//! Proxy Error types

use http::StatusCode;
use thiserror::Error;

use crate::ssh::SshError;

#[derive(Error, Debug)]
pub enum ProxyError {
    /// Malformed or non-proxy request
    #[error("Invalid proxy request: {0}")]
    InvalidRequest(String),

    #[error("Dial through SSH failed: {0}")]
    Session(#[from] SshError),

    /// Local dial to the destination failed
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Upstream HTTP error: {0}")]
    Upstream(#[from] hyper::Error),

    #[error("Failed to bind proxy listener: {0}")]
    Bind(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Status returned to the client when this error ends a request
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Session(SshError::ChannelOpenFailed { .. }) => StatusCode::BAD_GATEWAY,
            ProxyError::Session(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Connect { .. }
            | ProxyError::Tls(_)
            | ProxyError::Upstream(_)
            | ProxyError::Io(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Bind(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
