//! Configuration management for gatekeeper.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! environment variables prefixed with `GATEKEEPER` using `__` between
//! sections (`GATEKEEPER__STORE__URI`, `GATEKEEPER__RATE_LIMITING__LIMIT`).

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::connection::RetryConfig;
use crate::error::{GateError, Result};
use crate::ratelimit::Consistency;
use crate::store::validate_table_name;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Maximum admitted requests per identity per timespan
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Length of the trailing window in seconds
    #[serde(default = "default_timespan")]
    pub timespan_secs: u64,

    /// How counting and recording are paired
    #[serde(default)]
    pub consistency: Consistency,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            timespan_secs: default_timespan(),
            consistency: Consistency::default(),
        }
    }
}

fn default_limit() -> u64 {
    100
}

fn default_timespan() -> u64 {
    3600
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// PostgreSQL connection URI
    #[serde(default)]
    pub uri: Option<String>,

    /// Table holding access records
    #[serde(default = "default_table")]
    pub table: String,

    /// Reconnect behaviour
    #[serde(default)]
    pub retry: RetryConfig,

    /// Seconds between measurements of the server clock offset
    #[serde(default = "default_clock_resync")]
    pub clock_resync_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: None,
            table: default_table(),
            retry: RetryConfig::default(),
            clock_resync_secs: default_clock_resync(),
        }
    }
}

fn default_table() -> String {
    "access".to_string()
}

fn default_clock_resync() -> u64 {
    60
}

impl GateConfig {
    /// Load configuration from an optional file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: GateConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GateError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Reject configurations the service must not start with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.limit == 0 {
            return Err(GateError::Config("rate_limiting.limit must be positive".to_string()));
        }
        if self.rate_limiting.timespan_secs == 0 {
            return Err(GateError::Config(
                "rate_limiting.timespan_secs must be positive".to_string(),
            ));
        }
        match self.store.uri.as_deref() {
            Some(uri) if !uri.trim().is_empty() => {}
            _ => return Err(GateError::Config("store.uri is not set".to_string())),
        }
        validate_table_name(&self.store.table)
    }
}
