use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Process-wide settings, built once at startup and handed to the store and server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// SQLite database file. `None` keeps the catalog in memory.
    pub database: Option<PathBuf>,
    /// How many times to retry opening the database before giving up.
    pub startup_retries: u32,
    /// Log directives used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl ServiceConfig {
    pub fn socket_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    /// Parses a TOML document; absent keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// `RUST_LOG` wins over `log_filter` when it is set and parses.
    pub fn env_filter(&self) -> EnvFilter {
        self.env_filter_from(std::env::var("RUST_LOG").ok().as_deref())
    }

    fn env_filter_from(&self, rust_log: Option<&str>) -> EnvFilter {
        rust_log
            .filter(|directives| !directives.trim().is_empty())
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new(&self.log_filter))
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8088,
            database: None,
            startup_retries: 30,
            log_filter: "deeptracy=info".to_string(),
        }
    }
}
