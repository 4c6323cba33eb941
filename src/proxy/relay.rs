//! Relay executor
//!
//! Both operations take the dialer as a parameter, so the same code relays
//! through the SSH session or straight from the local machine.
//!
//! - [`tunnel`]: answers a CONNECT once the destination is dialed, then pipes
//!   raw bytes in both directions.
//! - [`forward`]: re-issues an HTTP request over a dialed connection (with TLS
//!   for https origins) and streams the response back without buffering it.

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::{Body, Incoming};
use hyper::client::conn::http1::Builder;
use hyper::ext::ReasonPhrase;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::dialer::Dialer;
use super::dispatch::ForwardTarget;
use super::error::ProxyError;
use super::server::SharedStats;
use super::tls::TlsOriginator;

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Dial `target` and, on success, hand the upgraded client connection to a
/// byte relay. The returned response is what the client sees for its CONNECT.
pub async fn tunnel<D: Dialer + ?Sized>(
    dialer: &D,
    req: Request<Incoming>,
    target: String,
    stats: SharedStats,
) -> Response<ProxyBody> {
    let upstream = match dialer.dial(&target).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("CONNECT {} failed: {}", target, e);
            return error_response(&e);
        }
    };

    debug!("Tunnel established to {}", target);

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let (sent, received) = bridge(TokioIo::new(upgraded), upstream).await;
                stats.write().record_tunnel(sent, received);
                debug!(
                    "Tunnel to {} closed: {} bytes sent, {} bytes received",
                    target, sent, received
                );
            }
            Err(e) => warn!("CONNECT {} upgrade failed: {}", target, e),
        }
    });

    let mut response = Response::new(empty());
    response
        .extensions_mut()
        .insert(ReasonPhrase::from_static(b"Connection Established"));
    response
}

/// Pipe bytes between `client` and `upstream` until either side stops.
///
/// Each direction runs in its own task. When one finishes (EOF or error) the
/// other is aborted and both connections are dropped, which closes them.
/// Returns the byte counts (client→upstream, upstream→client).
pub async fn bridge<C, U>(client: C, upstream: U) -> (u64, u64)
where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    U: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let mut to_upstream = tokio::spawn(async move {
        let res = tokio::io::copy(&mut client_read, &mut upstream_write).await;
        upstream_write.shutdown().await.ok();
        res
    });
    let mut to_client = tokio::spawn(async move {
        let res = tokio::io::copy(&mut upstream_read, &mut client_write).await;
        client_write.shutdown().await.ok();
        res
    });

    let (sent, received) = tokio::select! {
        res = &mut to_upstream => {
            to_client.abort();
            (res, to_client.await)
        }
        res = &mut to_client => {
            to_upstream.abort();
            (to_upstream.await, res)
        }
    };

    let count = |res: Result<std::io::Result<u64>, tokio::task::JoinError>, dir: &str| match res {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            debug!("Relay {} ended with error: {}", dir, e);
            0
        }
        Err(_) => 0,
    };
    (
        count(sent, "client->upstream"),
        count(received, "upstream->client"),
    )
}

/// Issue `req` over a fresh connection from `dialer` and return the
/// upstream response with its body still streaming.
///
/// `req` must already be in origin form with a `Host` header. TLS targets
/// get a client handshake on top of the dialed connection first.
pub async fn forward<D, B>(
    dialer: &D,
    tls: &TlsOriginator,
    target: &ForwardTarget,
    req: Request<B>,
) -> Result<Response<ProxyBody>, ProxyError>
where
    D: Dialer + ?Sized,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let mut conn = dialer.dial(&target.addr).await?;
    if target.tls {
        conn = tls.connect(&target.host, conn).await?;
    }

    let (mut sender, connection) = Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .handshake(TokioIo::new(conn))
        .await?;

    let addr_for_log = target.addr.clone();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("Upstream connection to {} ended: {}", addr_for_log, e);
        }
    });

    let response = sender.send_request(req).await?;
    Ok(response.map(|body| body.boxed()))
}

/// Plain-text error response carrying the status for `err`
pub fn error_response(err: &ProxyError) -> Response<ProxyBody> {
    let mut response = Response::new(full(format!("{}\n", err)));
    *response.status_mut() = err.status();
    response
}

fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}
