//! Configuration Management Module
//!
//! The proxy is configured once at startup from a JSON file and/or command
//! line flags; the resulting [`ProxyConfig`] is read-only afterwards.

pub mod storage;
pub mod types;

pub use storage::{expand_path, ConfigError};
pub use types::{ProxyConfig, DEFAULT_LOCAL_ADDR, DEFAULT_PRIVATE_KEY};
