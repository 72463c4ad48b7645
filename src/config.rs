// ⚙️ Configuration - TOML file plus environment overrides
//
// Example `networth.toml`:
//
//   database_path = "data/networth.db"
//
//   [server]
//   bind_addr = "127.0.0.1:3000"
//
//   [locks]
//   ttl_seconds = 120
//
//   [logging]
//   level = "info"
//   format = "pretty"

use crate::logging::LogConfig;
use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_DATABASE: &str = "NETWORTH_DATABASE";
pub const ENV_BIND: &str = "NETWORTH_BIND";
pub const ENV_LOCK_TTL: &str = "NETWORTH_LOCK_TTL_SECS";
pub const ENV_LOG_LEVEL: &str = "NETWORTH_LOG_LEVEL";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LockConfig {
    /// Soft edit lock lifetime
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: i64,
}

fn default_ttl_seconds() -> i64 {
    120
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub locks: LockConfig,

    #[serde(default)]
    pub logging: LogConfig,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("networth.db")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            server: ServerConfig::default(),
            locks: LockConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the TOML file if it exists, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.check()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Apply `NETWORTH_*` overrides from `lookup`. Malformed values are errors.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DATABASE) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(bind) = lookup(ENV_BIND) {
            self.server.bind_addr = bind;
        }
        if let Some(ttl) = lookup(ENV_LOCK_TTL) {
            self.locks.ttl_seconds = ttl
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number of seconds, got `{}`", ENV_LOCK_TTL, ttl))?;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.locks.ttl_seconds <= 0 {
            bail!("lock ttl must be positive, got {}", self.locks.ttl_seconds);
        }
        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::seconds(self.locks.ttl_seconds)
    }
}
