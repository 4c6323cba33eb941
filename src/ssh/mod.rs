//! SSH module - the transport every proxied connection travels over
//!
//! One authenticated russh session is shared by all requests. Dialing a
//! destination opens a `direct-tcpip` channel on it; a session found broken
//! during a dial is replaced transparently.
//!
//! # Features
//! - Target parsing from `ssh://[user[:pass]@]host[:port]`
//! - Credential chain: agent, private key file, URL password
//! - Host key verification via ~/.ssh/known_hosts
//! - Reconnect-on-dial with a shared/exclusive lock split

mod agent;
mod client;
mod credentials;
mod error;
mod session;
mod target;

pub use agent::{agent_socket_from_env, SshAgentClient};
pub use client::{ClientHandler, ConnectOptions, HostKeyVerification, SshConnector, SshSession};
pub use credentials::{Credential, CredentialChain, CredentialSources};
pub use error::SshError;
pub use session::{SessionConnector, SessionManager, SshChannelOpener, MAX_DIAL_ATTEMPTS};
pub use target::SshTarget;

#[cfg(test)]
pub(crate) use session::tests as mock;

use std::path::Path;

/// Session manager backed by a real SSH connection
pub type SshSessionManager = SessionManager<SshConnector>;

/// Resolve the target and credentials, then establish the initial session.
///
/// Fails with [`SshError::NoAuthMethods`] when no credential is available and
/// with a connection error when the first session cannot be established.
pub async fn open(
    remote: &str,
    private_key: &Path,
    options: ConnectOptions,
) -> Result<SshSessionManager, SshError> {
    let target = SshTarget::parse(remote)?;
    let credentials = CredentialChain::resolve(CredentialSources::from_env(&target, private_key)).await?;
    SessionManager::start(SshConnector::new(target, credentials, options)).await
}
