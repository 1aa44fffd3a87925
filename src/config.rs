//! Configuration management for Tollgate.
//!
//! Settings come from an optional YAML file, overridden by `TOLLGATE_*`
//! environment variables (`TOLLGATE_LIMITS__WINDOW_SECS=30`).

use std::net::SocketAddr;
use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TollgateError};
use crate::ratelimit::{DEFAULT_NAMESPACE, MAX_WINDOW_SECS};

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

/// Which store holds the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL, used when `backend` is `redis`
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix prepended to every identity
    #[serde(default = "default_key_namespace")]
    pub key_namespace: String,

    #[serde(default)]
    pub memory: MemoryStoreConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            key_namespace: default_key_namespace(),
            memory: MemoryStoreConfig::default(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1/".to_string()
}

fn default_key_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// In-memory store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStoreConfig {
    /// How often expired counters are swept out of memory
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    30
}

/// What the HTTP layer does when the limiter cannot decide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Serve the request anyway
    Open,
    /// Reject the request
    #[default]
    Closed,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Requests admitted per identity per window
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: i64,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: i64,

    /// Request header carrying the caller identity
    #[serde(default = "default_identity_header")]
    pub identity_header: String,

    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests_per_window(),
            window_secs: default_window_secs(),
            identity_header: default_identity_header(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

fn default_requests_per_window() -> i64 {
    100
}

fn default_window_secs() -> i64 {
    60
}

fn default_identity_header() -> String {
    "x-client-id".to_string()
}

impl TollgateConfig {
    /// Load configuration from an optional YAML file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }
        builder = builder.add_source(
            Environment::with_prefix("TOLLGATE")
                .prefix_separator("_")
                .separator("__"),
        );
        Self::build(builder)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::build(Config::builder().add_source(File::from_str(yaml, FileFormat::Yaml)))
    }

    fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config: TollgateConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the limiter would refuse at request time.
    pub fn validate(&self) -> Result<()> {
        if self.limits.window_secs <= 0 || self.limits.window_secs > MAX_WINDOW_SECS {
            return Err(TollgateError::Config(format!(
                "limits.window_secs must be between 1 and {}, got {}",
                MAX_WINDOW_SECS, self.limits.window_secs
            )));
        }
        if self.limits.requests_per_window < 0 {
            return Err(TollgateError::Config(format!(
                "limits.requests_per_window must not be negative, got {}",
                self.limits.requests_per_window
            )));
        }
        if self.store.key_namespace.is_empty() {
            return Err(TollgateError::Config(
                "store.key_namespace must not be empty".to_string(),
            ));
        }
        if self.limits.identity_header.is_empty() {
            return Err(TollgateError::Config(
                "limits.identity_header must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
