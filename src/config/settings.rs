//! Caching pool configuration settings

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use anyhow::{Context, Result};

use crate::error::Error;

/// Main configuration for the caching pool binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log level configuration
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Pool configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// Upstream server the TCP factory connects to
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

/// Pool configuration, fixed for the lifetime of a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum idle services kept in the cache (absent = unbounded)
    #[serde(default)]
    pub capacity: Option<usize>,

    /// How long a released service may sit idle, in milliseconds
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Grace period given to each background close, in milliseconds
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

/// Upstream server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Upstream server address
    pub addr: SocketAddr,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ttl_ms() -> u64 {
    5_000
}

fn default_close_timeout_ms() -> u64 {
    1_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            pool: PoolConfig::default(),
            upstream: UpstreamConfig::default(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: None, // Unbounded
            ttl_ms: default_ttl_ms(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 7070)),
            connect_timeout_ms: 5_000,
        }
    }
}

impl PoolConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Reject settings the pool cannot honour
    pub fn validate(&self) -> crate::Result<()> {
        if self.ttl_ms == 0 {
            return Err(Error::Config("pool ttl_ms must be greater than zero".to_string()));
        }
        Ok(())
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.pool.validate()
            .with_context(|| format!("Invalid pool settings in {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load configuration from an optional YAML file, then apply environment overrides
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.pool.validate().context("Invalid pool settings after environment overrides")?;
        Ok(config)
    }

    /// Override settings from environment variables. Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.log_level = log_level;
        }

        // Load pool settings
        if let Ok(capacity) = std::env::var("POOL_CAPACITY") {
            if capacity.eq_ignore_ascii_case("unbounded") {
                self.pool.capacity = None;
            } else if let Ok(capacity) = capacity.parse() {
                self.pool.capacity = Some(capacity);
            }
        }

        if let Ok(ttl) = std::env::var("POOL_TTL_MS") {
            if let Ok(ttl) = ttl.parse() {
                self.pool.ttl_ms = ttl;
            }
        }

        if let Ok(timeout) = std::env::var("POOL_CLOSE_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse() {
                self.pool.close_timeout_ms = timeout;
            }
        }

        // Load upstream settings
        if let Ok(addr) = std::env::var("UPSTREAM_ADDR") {
            if let Ok(addr) = addr.parse() {
                self.upstream.addr = addr;
            }
        }

        if let Ok(timeout) = std::env::var("UPSTREAM_CONNECT_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse() {
                self.upstream.connect_timeout_ms = timeout;
            }
        }
    }
}
