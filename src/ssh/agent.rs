//! SSH Agent signer
//!
//! Delegates public-key signing to the system agent through russh's
//! [`AgentClient`]. The agent connection is opened once while the credential
//! chain is resolved and reused for every (re)connect of the session.
//!
//! # Platform Support
//! - **Unix/Linux/macOS**: Unix domain socket named by `SSH_AUTH_SOCK`
//! - **Windows**: `\\.\pipe\openssh-ssh-agent` named pipe (OpenSSH for Windows)

use std::future::Future;
use std::path::Path;

use russh::client::Handle;
use russh::keys::agent::client::{AgentClient, AgentStream};
use russh::keys::ssh_key;
use russh::keys::PublicKey;
use russh::{AgentAuthError, CryptoVec, Signer};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;

type DynAgent = AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>;

/// Borrowing [`Signer`] that owns the key it signs for.
///
/// russh's own `impl Signer for AgentClient` keeps a borrowed `&PublicKey`
/// across an await, which makes the authentication future non-`Send`.
/// Cloning the key up front avoids that.
struct AgentSigner<'a> {
    agent: &'a mut DynAgent,
}

impl Signer for AgentSigner<'_> {
    type Error = AgentAuthError;

    fn auth_publickey_sign(
        &mut self,
        key: &ssh_key::PublicKey,
        hash_alg: Option<ssh_key::HashAlg>,
        to_sign: CryptoVec,
    ) -> impl Future<Output = Result<CryptoVec, Self::Error>> + Send {
        let key_owned = key.clone();
        async move {
            self.agent
                .sign_request(&key_owned, hash_alg, to_sign)
                .await
                .map_err(Into::into)
        }
    }
}

/// Connected agent plus the identities it offered at startup
pub struct SshAgentClient {
    agent: DynAgent,
    identities: Vec<PublicKey>,
}

impl SshAgentClient {
    /// Connect to the agent listening on `socket` and fetch its identities.
    ///
    /// Fails when the agent is unreachable or holds no keys, so that an
    /// empty agent never counts as an authentication method.
    pub async fn connect(socket: &Path) -> Result<Self, SshError> {
        debug!("Connecting to SSH Agent at {}", socket.display());

        let mut agent = Self::open(socket).await?;

        let identities = agent
            .request_identities()
            .await
            .map_err(|e| SshError::AgentError(format!("Failed to list agent keys: {}", e)))?;

        if identities.is_empty() {
            return Err(SshError::AgentError(
                "SSH Agent has no keys loaded. Add keys with: ssh-add".to_string(),
            ));
        }

        info!("SSH Agent offers {} key(s)", identities.len());
        Ok(Self { agent, identities })
    }

    #[cfg(unix)]
    async fn open(socket: &Path) -> Result<DynAgent, SshError> {
        let agent = AgentClient::connect_uds(socket).await.map_err(|e| {
            SshError::AgentNotAvailable(format!(
                "Failed to connect to SSH Agent at {}: {}",
                socket.display(),
                e
            ))
        })?;
        Ok(agent.dynamic())
    }

    #[cfg(windows)]
    async fn open(socket: &Path) -> Result<DynAgent, SshError> {
        let pipe = socket.to_string_lossy();
        let agent = AgentClient::connect_named_pipe(pipe.as_ref())
            .await
            .map_err(|e| {
                SshError::AgentNotAvailable(format!(
                    "Failed to connect to SSH Agent via named pipe {}: {}",
                    pipe, e
                ))
            })?;
        Ok(agent.dynamic())
    }

    #[cfg(not(any(unix, windows)))]
    async fn open(_socket: &Path) -> Result<DynAgent, SshError> {
        Err(SshError::AgentNotAvailable(
            "SSH Agent is not supported on this platform".to_string(),
        ))
    }

    /// Try every agent identity until the server accepts one.
    ///
    /// Returns `Ok(false)` when all keys were rejected.
    pub async fn authenticate(
        &mut self,
        handle: &mut Handle<ClientHandler>,
        username: &str,
    ) -> Result<bool, SshError> {
        for key in &self.identities {
            debug!("Trying agent key: {} ({})", key.algorithm(), key.comment());

            match handle
                .authenticate_publickey_with(
                    username,
                    key.clone(),
                    None,
                    &mut AgentSigner {
                        agent: &mut self.agent,
                    },
                )
                .await
            {
                Ok(result) if result.success() => {
                    info!("SSH Agent authentication succeeded with key: {}", key.comment());
                    return Ok(true);
                }
                Ok(_) => debug!("Agent key rejected by server: {}", key.comment()),
                Err(e) => warn!("Agent signing error for key {}: {}", key.comment(), e),
            }
        }
        Ok(false)
    }
}

/// Location of the system agent, if one is advertised
pub fn agent_socket_from_env() -> Option<std::path::PathBuf> {
    #[cfg(unix)]
    {
        std::env::var_os("SSH_AUTH_SOCK")
            .filter(|s| !s.is_empty())
            .map(Into::into)
    }

    #[cfg(windows)]
    {
        Some(r"\\.\pipe\openssh-ssh-agent".into())
    }

    #[cfg(not(any(unix, windows)))]
    {
        None
    }
}
