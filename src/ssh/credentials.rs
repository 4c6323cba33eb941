//! Credential chain
//!
//! The authentication methods are resolved once, before the first connect, in
//! a fixed priority order:
//!
//! 1. SSH agent identities (if `SSH_AUTH_SOCK` names a reachable agent)
//! 2. The configured private key file
//! 3. A password embedded in the remote URL
//!
//! Every probe is best-effort: a failure is logged and the next one runs.
//! Only an empty chain is fatal.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::client::Handle;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PrivateKey;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::agent::{agent_socket_from_env, SshAgentClient};
use super::client::ClientHandler;
use super::error::SshError;
use super::target::SshTarget;

/// Inputs for resolving the chain
#[derive(Debug, Clone, Default)]
pub struct CredentialSources {
    pub agent_socket: Option<PathBuf>,
    pub private_key: Option<PathBuf>,
    pub password: Option<String>,
}

impl CredentialSources {
    /// Agent from the environment, key from config, password from the URL
    pub fn from_env(target: &SshTarget, private_key: &Path) -> Self {
        Self {
            agent_socket: agent_socket_from_env(),
            private_key: Some(private_key.to_path_buf()),
            password: target.password.clone(),
        }
    }
}

/// One resolved authentication method
pub enum Credential {
    Agent(Arc<Mutex<SshAgentClient>>),
    PrivateKey(Arc<PrivateKey>),
    Password(String),
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Agent(_) => "agent",
            Credential::PrivateKey(_) => "publickey",
            Credential::Password(_) => "password",
        }
    }
}

/// Ordered, non-empty list of authentication methods
pub struct CredentialChain {
    methods: Vec<Credential>,
}

impl CredentialChain {
    /// Probe every source in priority order and keep whatever succeeds.
    pub async fn resolve(sources: CredentialSources) -> Result<Self, SshError> {
        let mut methods = Vec::new();

        if let Some(socket) = &sources.agent_socket {
            match SshAgentClient::connect(socket).await {
                Ok(agent) => methods.push(Credential::Agent(Arc::new(Mutex::new(agent)))),
                Err(e) => warn!("Skipping SSH Agent: {}", e),
            }
        }

        if let Some(path) = &sources.private_key {
            match load_private_key(path) {
                Ok(key) => methods.push(Credential::PrivateKey(Arc::new(key))),
                Err(e) => warn!("Skipping private key {}: {}", path.display(), e),
            }
        }

        if let Some(password) = sources.password {
            methods.push(Credential::Password(password));
        }

        Self::from_methods(methods)
    }

    pub fn from_methods(methods: Vec<Credential>) -> Result<Self, SshError> {
        if methods.is_empty() {
            return Err(SshError::NoAuthMethods);
        }
        info!(
            "Resolved authentication methods: {}",
            methods
                .iter()
                .map(Credential::kind)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self { methods })
    }

    pub fn methods(&self) -> &[Credential] {
        &self.methods
    }

    /// Run the chain against a freshly connected handle.
    ///
    /// Methods are tried in order; the first one the server accepts wins.
    pub async fn authenticate(
        &self,
        handle: &mut Handle<ClientHandler>,
        username: &str,
    ) -> Result<(), SshError> {
        let mut last_error: Option<SshError> = None;

        for method in &self.methods {
            let attempt = match method {
                Credential::Agent(agent) => agent.lock().await.authenticate(handle, username).await,
                Credential::PrivateKey(key) => {
                    authenticate_key(handle, username, key.clone()).await
                }
                Credential::Password(password) => handle
                    .authenticate_password(username, password)
                    .await
                    .map(|result| result.success())
                    .map_err(SshError::from),
            };

            match attempt {
                Ok(true) => {
                    info!("Authenticated as {} via {}", username, method.kind());
                    return Ok(());
                }
                Ok(false) => debug!("Server rejected {} authentication", method.kind()),
                Err(e) => {
                    warn!("{} authentication failed: {}", method.kind(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(SshError::AuthenticationFailed(match last_error {
            Some(e) => format!("all methods rejected, last error: {}", e),
            None => "all methods rejected by server".to_string(),
        }))
    }
}

async fn authenticate_key(
    handle: &mut Handle<ClientHandler>,
    username: &str,
    key: Arc<PrivateKey>,
) -> Result<bool, SshError> {
    // RSA keys must be signed with a hash the server accepts.
    let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
    let key = PrivateKeyWithHashAlg::new(key, hash_alg);
    let result = handle.authenticate_publickey(username, key).await?;
    Ok(result.success())
}

fn load_private_key(path: &Path) -> Result<PrivateKey, SshError> {
    if !path.is_file() {
        return Err(SshError::KeyError("file not found".to_string()));
    }
    Ok(russh::keys::load_secret_key(path, None)?)
}
