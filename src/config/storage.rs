//! Configuration loading
//!
//! Reads the JSON config file, expands environment variables and `~` in
//! path fields, and validates the result.

use std::path::{Path, PathBuf};

use tokio::fs;

use super::types::ProxyConfig;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ProxyConfig {
    /// Load a config file. Path fields are returned as written; call
    /// [`ProxyConfig::expand_paths`] once all overrides are applied.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).await?;
        let config: ProxyConfig = serde_json::from_str(&content)?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Expand `$VAR`, `${VAR}` and a leading `~` in the path fields.
    pub fn expand_paths(mut self) -> Self {
        self.private_key = expand_path(&self.private_key);
        self.known_hosts = self.known_hosts.as_deref().map(expand_path);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "remote SSH server address is required".to_string(),
            ));
        }

        let port_ok = self
            .local_addr
            .rsplit_once(':')
            .map(|(_, port)| port.parse::<u16>().is_ok())
            .unwrap_or(false);
        if !port_ok {
            return Err(ConfigError::Invalid(format!(
                "listen address {:?} is not host:port",
                self.local_addr
            )));
        }

        Ok(())
    }
}

/// Expand `~`, `$VAR` and `${VAR}` in `path`.
///
/// A variable that cannot be resolved leaves the path unchanged.
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            tracing::warn!("Cannot expand {}: {}", raw, e);
            path.to_path_buf()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_original_keys() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("sshproxy.json");
        std::fs::write(
            &path,
            r#"{"id_rsa": "/keys/id_ed25519", "local": "127.0.0.1:8080", "remote": "ssh://alice@example.com:2222"}"#,
        )
        .unwrap();

        let config = ProxyConfig::load(&path).await.unwrap();
        assert_eq!(config.local_addr, "127.0.0.1:8080");
        assert_eq!(config.remote, "ssh://alice@example.com:2222");
        assert_eq!(config.private_key, PathBuf::from("/keys/id_ed25519"));
        assert!(!config.strict_host_key_checking);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_applies_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("sshproxy.json");
        std::fs::write(&path, r#"{"remote": "example.com", "connect_timeout_secs": 5}"#).unwrap();

        let config = ProxyConfig::load(&path).await.unwrap();
        assert_eq!(config.local_addr, "127.0.0.1:1315");
        assert_eq!(config.private_key, PathBuf::from("$HOME/.ssh/id_rsa"));

        let options = config.connect_options();
        assert_eq!(options.connect_timeout, Duration::from_secs(5));
        assert_eq!(options.keepalive_interval, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_load_errors() {
        let temp = tempdir().unwrap();
        let missing = temp.path().join("missing.json");
        assert!(matches!(
            ProxyConfig::load(&missing).await,
            Err(ConfigError::Io(_))
        ));

        let broken = temp.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(
            ProxyConfig::load(&broken).await,
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_expand_path() {
        std::env::set_var("SSHPROXY_TEST_KEY_DIR", "/opt/keys");
        assert_eq!(
            expand_path(Path::new("$SSHPROXY_TEST_KEY_DIR/id_rsa")),
            PathBuf::from("/opt/keys/id_rsa")
        );
        assert_eq!(
            expand_path(Path::new("${SSHPROXY_TEST_KEY_DIR}/id")),
            PathBuf::from("/opt/keys/id")
        );
        // Unresolvable variables leave the path alone
        assert_eq!(
            expand_path(Path::new("/a/$SSHPROXY_TEST_UNSET_VAR/b")),
            PathBuf::from("/a/$SSHPROXY_TEST_UNSET_VAR/b")
        );
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_path(Path::new("~/.ssh/known_hosts")),
                home.join(".ssh/known_hosts")
            );
        }
    }

    #[test]
    fn test_expand_paths_runs_once() {
        std::env::set_var("SSHPROXY_TEST_NESTED", "$SSHPROXY_TEST_KEY_DIR");
        std::env::set_var("SSHPROXY_TEST_KEY_DIR", "/opt/keys");
        let config = ProxyConfig {
            private_key: PathBuf::from("$SSHPROXY_TEST_NESTED/id_rsa"),
            ..ProxyConfig::default()
        }
        .expand_paths();
        assert_eq!(
            config.private_key,
            PathBuf::from("$SSHPROXY_TEST_KEY_DIR/id_rsa")
        );
    }

    #[test]
    fn test_validate() {
        let mut config = ProxyConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.remote = "ssh://example.com".to_string();
        assert!(config.validate().is_ok());

        config.local_addr = "localhost".to_string();
        assert!(config.validate().is_err());
    }
}
