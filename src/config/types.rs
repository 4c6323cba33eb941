//! Configuration types

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ssh::ConnectOptions;

/// Default listen address for the HTTP proxy
pub const DEFAULT_LOCAL_ADDR: &str = "127.0.0.1:1315";

/// Default private key, expanded at load time
pub const DEFAULT_PRIVATE_KEY: &str = "$HOME/.ssh/id_rsa";

fn default_local() -> String {
    DEFAULT_LOCAL_ADDR.to_string()
}

fn default_private_key() -> PathBuf {
    PathBuf::from(DEFAULT_PRIVATE_KEY)
}

fn default_timeout_secs() -> u64 {
    30
}

/// Proxy configuration, as stored in the JSON config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Address the HTTP proxy listens on
    #[serde(rename = "local", default = "default_local")]
    pub local_addr: String,

    /// SSH server URL, e.g. `ssh://user@host:22`
    #[serde(rename = "remote", default)]
    pub remote: String,

    /// Private key file used for public key authentication
    #[serde(rename = "id_rsa", default = "default_private_key")]
    pub private_key: PathBuf,

    #[serde(default)]
    pub strict_host_key_checking: bool,

    /// known_hosts file (defaults to ~/.ssh/known_hosts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts: Option<PathBuf>,

    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub keepalive_interval_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            local_addr: default_local(),
            remote: String::new(),
            private_key: default_private_key(),
            strict_host_key_checking: false,
            known_hosts: None,
            connect_timeout_secs: default_timeout_secs(),
            keepalive_interval_secs: default_timeout_secs(),
        }
    }
}

impl ProxyConfig {
    /// SSH session settings derived from this config
    pub fn connect_options(&self) -> ConnectOptions {
        let defaults = ConnectOptions::default();
        ConnectOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs),
            known_hosts: self.known_hosts.clone().or(defaults.known_hosts),
            strict_host_key_checking: self.strict_host_key_checking,
        }
    }
}
