use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use sshproxy::config::ProxyConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "HTTP proxy over a single SSH session", long_about = None)]
struct Cli {
    /// JSON config file (keys: local, remote, id_rsa)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address the HTTP proxy listens on [default: 127.0.0.1:1315]
    #[arg(long)]
    addr: Option<String>,

    /// Remote SSH server, e.g. ssh://user@host:22
    #[arg(long)]
    remote: Option<String>,

    /// SSH private key file [default: $HOME/.ssh/id_rsa]
    #[arg(long)]
    ssh_key: Option<PathBuf>,

    /// Refuse hosts not already in known_hosts
    #[arg(long)]
    strict_host_key_checking: bool,
}

impl Cli {
    /// File values first, flags on top.
    async fn into_config(self) -> Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => ProxyConfig::load(path)
                .await
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => ProxyConfig::default(),
        };

        if let Some(addr) = self.addr {
            config.local_addr = addr;
        }
        if let Some(remote) = self.remote {
            config.remote = remote;
        }
        if let Some(key) = self.ssh_key {
            config.private_key = key;
        }
        if self.strict_host_key_checking {
            config.strict_host_key_checking = true;
        }

        let config = config.expand_paths();
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    sshproxy::init_logging();

    let config = Cli::parse().into_config().await?;
    sshproxy::run(config).await?;
    Ok(())
}
