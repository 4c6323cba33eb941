//! HTTP proxy front end
//!
//! Serves HTTP/1.1 on a local address and relays every request to its
//! destination through a [`Dialer`]:
//!
//! - `CONNECT host:port` becomes an opaque byte tunnel
//! - absolute-URL requests are re-issued upstream with single-hop headers
//!   removed, and the response is streamed back. The proxy originates TLS
//!   itself for `https://` URLs

mod dialer;
mod dispatch;
mod error;
mod relay;
mod server;
mod tls;

pub use dialer::{split_host_port, BoxedConnection, Connection, Dialer, TcpDialer};
pub use dispatch::{classify, prepare_forward, Dispatcher, ForwardTarget, RequestKind};
pub use error::ProxyError;
pub use relay::{bridge, error_response, forward, tunnel, ProxyBody};
pub use server::{ProxyServer, ProxyStats, SharedStats};
pub use tls::TlsOriginator;
