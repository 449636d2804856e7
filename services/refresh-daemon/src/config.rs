//! Daemon configuration
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Runtime auto-refresh settings live in the settings JSON file, not here;
//! this file only says where the stores are and how to reach the provider.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

/// Account and settings file locations
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub accounts_path: PathBuf,
    pub settings_path: PathBuf,
}

/// Admin API listener
#[derive(Debug, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

/// Outbound HTTP to the OIDC and usage endpoints
#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_max_connections() -> usize {
    64
}

fn default_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// `ADMIN_LISTEN_ADDR` overrides `admin.listen_addr`.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(addr) = std::env::var("ADMIN_LISTEN_ADDR") {
            config.admin.listen_addr = addr.parse().map_err(|e| {
                common::Error::Config(format!("invalid ADMIN_LISTEN_ADDR {addr:?}: {e}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.storage.accounts_path.as_os_str().is_empty() {
            return Err(common::Error::Config(
                "storage.accounts_path must not be empty".into(),
            ));
        }
        if self.storage.settings_path.as_os_str().is_empty() {
            return Err(common::Error::Config(
                "storage.settings_path must not be empty".into(),
            ));
        }
        if self.storage.accounts_path == self.storage.settings_path {
            return Err(common::Error::Config(format!(
                "storage.accounts_path and storage.settings_path must differ, both are {}",
                self.storage.accounts_path.display()
            )));
        }
        if self.provider.timeout_secs == 0 {
            return Err(common::Error::Config(
                "provider.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.admin.max_connections == 0 {
            return Err(common::Error::Config(
                "admin.max_connections must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("refresh-daemon.toml")
    }
}
