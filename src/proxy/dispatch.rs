//! Proxy dispatcher
//!
//! HTTP proxies see two kinds of requests:
//!
//! - `CONNECT host:port` asks for an opaque byte tunnel (usually HTTPS). The
//!   proxy dials the destination, answers `200 Connection Established` and
//!   from then on only shuffles bytes.
//! - Any other method carries an absolute URL (`GET http://host/path`). The
//!   proxy re-issues it to the destination and copies the response back.
//!   For `https://` URLs the proxy opens the TLS session to the origin.
//!
//! A request with a relative path was sent to the proxy as if it were an
//! origin server; it is rejected.

use std::sync::Arc;

use http::header::{HeaderValue, ACCEPT_ENCODING, CONNECTION, HOST};
use http::uri::{PathAndQuery, Uri};
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use tracing::{info, warn};

use super::dialer::Dialer;
use super::error::ProxyError;
use super::relay::{self, ProxyBody};
use super::server::SharedStats;
use super::tls::TlsOriginator;

/// Non-standard single-hop header sent by curl and some browsers
const PROXY_CONNECTION: &str = "proxy-connection";

const DEFAULT_HTTP_PORT: u16 = 80;
const DEFAULT_HTTPS_PORT: u16 = 443;

/// How a request will be handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// CONNECT to the given `host:port`
    Tunnel(String),
    /// Absolute-URL request to re-issue upstream
    Forward,
    /// Not a proxy request
    Invalid(String),
}

pub fn classify<B>(req: &Request<B>) -> RequestKind {
    let uri = req.uri();

    if req.method() == Method::CONNECT {
        return match uri.authority() {
            Some(authority) if authority.port_u16().is_some() => {
                RequestKind::Tunnel(authority.to_string())
            }
            _ => RequestKind::Invalid(format!("CONNECT target {} is not host:port", uri)),
        };
    }

    if uri.scheme().is_some() && uri.authority().is_some() {
        RequestKind::Forward
    } else {
        RequestKind::Invalid(format!("{} is not a full URL path", uri))
    }
}

/// Destination of a forwarded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    /// `host:port` to dial
    pub addr: String,
    /// Host without IPv6 brackets, used as the TLS server name
    pub host: String,
    /// Origin speaks TLS (`https://` URL)
    pub tls: bool,
}

/// Turn a proxy-style request into the request sent to the destination.
///
/// The absolute URL becomes an origin-form target and `Host` is rewritten
/// from the URL, replacing whatever the client sent. The single-hop headers
/// `Accept-Encoding`, `Proxy-Connection` and `Connection` are removed.
pub fn prepare_forward<B>(req: &mut Request<B>) -> Result<ForwardTarget, ProxyError> {
    let uri = req.uri().clone();

    let (default_port, tls) = match uri.scheme_str() {
        Some("http") => (DEFAULT_HTTP_PORT, false),
        Some("https") => (DEFAULT_HTTPS_PORT, true),
        Some(other) => {
            return Err(ProxyError::InvalidRequest(format!(
                "unsupported scheme {} in {}",
                other, uri
            )))
        }
        None => {
            return Err(ProxyError::InvalidRequest(format!(
                "{} is not a full URL path",
                uri
            )))
        }
    };

    let authority = uri
        .authority()
        .ok_or_else(|| ProxyError::InvalidRequest(format!("{} has no host", uri)))?;
    let host = authority.host();
    let target = ForwardTarget {
        addr: format!("{}:{}", host, authority.port_u16().unwrap_or(default_port)),
        host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
        tls,
    };

    let host_header = match authority.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let host_header = HeaderValue::from_str(&host_header)
        .map_err(|_| ProxyError::InvalidRequest(format!("invalid host {}", host)))?;
    req.headers_mut().insert(HOST, host_header);

    let path = uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    *req.uri_mut() = Uri::from(path);

    let headers = req.headers_mut();
    headers.remove(ACCEPT_ENCODING);
    headers.remove(PROXY_CONNECTION);
    headers.remove(CONNECTION);

    Ok(target)
}

/// Routes each request to the tunnel or forward relay
pub struct Dispatcher<D: ?Sized> {
    dialer: Arc<D>,
    tls: TlsOriginator,
    stats: SharedStats,
}

impl<D: Dialer + ?Sized> Dispatcher<D> {
    pub fn new(dialer: Arc<D>, tls: TlsOriginator, stats: SharedStats) -> Self {
        Self { dialer, tls, stats }
    }

    pub async fn handle(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        info!("{} {} {:?}", req.method(), req.uri(), req.version());

        match classify(&req) {
            RequestKind::Tunnel(target) => {
                relay::tunnel(self.dialer.as_ref(), req, target, self.stats.clone()).await
            }
            RequestKind::Forward => {
                let mut req = req;
                let target = match prepare_forward(&mut req) {
                    Ok(target) => target,
                    Err(e) => {
                        warn!("{}", e);
                        return relay::error_response(&e);
                    }
                };
                match relay::forward(self.dialer.as_ref(), &self.tls, &target, req).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("Forward to {} failed: {}", target.addr, e);
                        relay::error_response(&e)
                    }
                }
            }
            RequestKind::Invalid(reason) => {
                warn!("{}", reason);
                relay::error_response(&ProxyError::InvalidRequest(reason))
            }
        }
    }
}
