//! SSH Client implementation using russh

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::keys::PublicKey;
use tracing::{debug, info, warn};

use super::credentials::CredentialChain;
use super::error::SshError;
use super::session::{SessionConnector, SshChannelOpener};
use super::target::SshTarget;
use crate::proxy::BoxedConnection;

/// Session establishment settings
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
    pub known_hosts: Option<PathBuf>,
    /// Reject hosts missing from known_hosts instead of learning them
    pub strict_host_key_checking: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(30),
            known_hosts: dirs::home_dir().map(|h| h.join(".ssh").join("known_hosts")),
            strict_host_key_checking: false,
        }
    }
}

/// Establishes authenticated sessions to one target with one credential chain.
///
/// Every reconnect goes through the same connector, so the target and the
/// credentials are resolved exactly once.
pub struct SshConnector {
    target: SshTarget,
    credentials: CredentialChain,
    options: ConnectOptions,
    next_id: AtomicU64,
}

impl SshConnector {
    pub fn new(target: SshTarget, credentials: CredentialChain, options: ConnectOptions) -> Self {
        Self {
            target,
            credentials,
            options,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }
}

#[async_trait]
impl SessionConnector for SshConnector {
    type Session = SshSession;

    async fn connect(&self) -> Result<SshSession, SshError> {
        let addr = self.target.address();
        info!("Connecting to SSH server at {}", addr);

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(self.options.keepalive_interval),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler::new(
            self.target.host.clone(),
            self.target.port,
            self.options.known_hosts.clone(),
            self.options.strict_host_key_checking,
        );

        let mut handle = tokio::time::timeout(
            self.options.connect_timeout,
            client::connect(Arc::new(ssh_config), addr.as_str(), handler),
        )
        .await
        .map_err(|_| SshError::Timeout(format!("connecting to {}", addr)))?
        .map_err(|e| match e {
            SshError::HostKeyRejected(_) => e,
            other => SshError::ConnectionFailed(format!("{}: {}", addr, other)),
        })?;

        debug!("SSH handshake completed");

        self.credentials
            .authenticate(&mut handle, &self.target.username)
            .await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!("SSH session #{} established to {}", id, self.target);
        Ok(SshSession { id, handle })
    }
}

/// One authenticated SSH connection
pub struct SshSession {
    id: u64,
    handle: client::Handle<ClientHandler>,
}

#[async_trait]
impl SshChannelOpener for SshSession {
    async fn open_channel(&self, host: &str, port: u16) -> Result<BoxedConnection, SshError> {
        let target = format!("{}:{}", host, port);
        if self.handle.is_closed() {
            return Err(SshError::Disconnected);
        }

        let channel = self
            .handle
            .channel_open_direct_tcpip(host, port as u32, "127.0.0.1", 0)
            .await
            .map_err(|e| SshError::from_channel_open(e, &target))?;

        debug!("Session #{}: channel open to {}", self.id, target);
        Ok(Box::pin(channel.into_stream()))
    }

    async fn close(&self) {
        debug!("Closing SSH session #{}", self.id);
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "Session replaced", "en")
            .await;
    }
}

/// Client handler for russh callbacks
///
/// Verifies the server's host key against a known_hosts file.
pub struct ClientHandler {
    host: String,
    port: u16,
    known_hosts: Option<PathBuf>,
    /// - true: reject unknown keys
    /// - false: learn unknown keys (still reject changed ones)
    strict: bool,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, known_hosts: Option<PathBuf>, strict: bool) -> Self {
        Self {
            host,
            port,
            known_hosts,
            strict,
        }
    }

    fn verify(&self, key: &PublicKey) -> HostKeyVerification {
        let Some(path) = &self.known_hosts else {
            return HostKeyVerification::Unknown;
        };

        match russh::keys::check_known_hosts_path(&self.host, self.port, key, path) {
            Ok(true) => HostKeyVerification::Verified,
            Ok(false) => HostKeyVerification::Unknown,
            Err(russh::keys::Error::KeyChanged { line }) => HostKeyVerification::Changed { line },
            Err(e) => {
                debug!("Could not read known_hosts {}: {}", path.display(), e);
                HostKeyVerification::Unknown
            }
        }
    }

    /// Append `key` to known_hosts.
    fn learn(&self, key: &PublicKey) {
        if let Some(path) = &self.known_hosts {
            if let Err(e) =
                russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, key, path)
            {
                warn!("Failed to save host key: {}", e);
            }
        }
    }
}

/// Outcome of a known_hosts lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyVerification {
    Verified,
    Unknown,
    Changed { line: usize },
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match self.verify(server_public_key) {
            HostKeyVerification::Verified => {
                debug!("Host key verified for {}:{}", self.host, self.port);
                Ok(true)
            }
            HostKeyVerification::Changed { line } => {
                warn!(
                    "HOST KEY CHANGED for {}:{} (known_hosts line {}). POSSIBLE MITM ATTACK!",
                    self.host, self.port, line
                );
                Err(SshError::HostKeyRejected(format!(
                    "key for {}:{} does not match known_hosts line {}",
                    self.host, self.port, line
                )))
            }
            HostKeyVerification::Unknown if self.strict => {
                warn!(
                    "Unknown host key for {}:{}. Strict mode enabled, rejecting.",
                    self.host, self.port
                );
                Err(SshError::HostKeyRejected(format!(
                    "unknown host {}:{}",
                    self.host, self.port
                )))
            }
            HostKeyVerification::Unknown => {
                info!("New host {}:{}, adding to known_hosts", self.host, self.port);
                self.learn(server_public_key);
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_known_hosts_means_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let handler = ClientHandler::new(
            "example.com".into(),
            22,
            Some(dir.path().join("known_hosts")),
            true,
        );
        let key = PublicKey::from_openssh(
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIJdD7y3aLq454yWBdwLWbieU1ebz9/cu7/QEXn9OIeZJ",
        )
        .unwrap();
        assert_eq!(handler.verify(&key), HostKeyVerification::Unknown);
    }

    #[tokio::test]
    async fn test_unknown_host_is_learned_unless_strict() {
        use russh::client::Handler;

        let dir = tempfile::tempdir().unwrap();
        let known_hosts = dir.path().join("known_hosts");
        let key = PublicKey::from_openssh(
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIJdD7y3aLq454yWBdwLWbieU1ebz9/cu7/QEXn9OIeZJ",
        )
        .unwrap();

        let mut strict =
            ClientHandler::new("example.com".into(), 22, Some(known_hosts.clone()), true);
        assert!(matches!(
            strict.check_server_key(&key).await,
            Err(SshError::HostKeyRejected(_))
        ));

        let mut tofu = ClientHandler::new("example.com".into(), 22, Some(known_hosts.clone()), false);
        assert!(tofu.check_server_key(&key).await.unwrap());
        assert_eq!(tofu.verify(&key), HostKeyVerification::Verified);

        // Once learned, strict mode accepts it too.
        assert!(strict.check_server_key(&key).await.unwrap());
    }

    #[test]
    fn test_default_options() {
        let options = ConnectOptions::default();
        assert_eq!(options.connect_timeout, Duration::from_secs(30));
        assert!(!options.strict_host_key_checking);
    }
}
