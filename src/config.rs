//! Configuration management for the request governor.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{GovernorError, Result};
use crate::governor::{
    RetryOptions, DEFAULT_BASE_DELAY, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_DELAY, DEFAULT_RETRIES,
};

/// Environment prefix used by [`GovernorConfig::load`].
pub const ENV_PREFIX: &str = "GOVERNOR";

/// Main configuration: the default retry policy and logging setup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Default retry policy
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Retry policy as written in configuration files (delays in milliseconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Retries after the first attempt
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base for exponential backoff, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Ceiling for the computed backoff, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Randomize backoff within [0.7, 1.3]
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Concurrently executing tasks
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Randomized delay before the first attempt
    #[serde(default = "default_true")]
    pub initial_stagger: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
            max_concurrent: default_max_concurrent(),
            initial_stagger: true,
        }
    }
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY.as_millis() as u64
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY.as_millis() as u64
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_true() -> bool {
    true
}

impl From<&PolicyConfig> for RetryOptions {
    fn from(policy: &PolicyConfig) -> Self {
        RetryOptions::default()
            .retries(policy.retries)
            .base_delay(Duration::from_millis(policy.base_delay_ms))
            .max_delay(Duration::from_millis(policy.max_delay_ms))
            .jitter(policy.jitter)
            .max_concurrent(policy.max_concurrent)
            .initial_stagger(policy.initial_stagger)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GovernorConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading governor configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GovernorConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GovernorError::Config(format!("Failed to parse governor config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, then `GOVERNOR__*` variables.
    ///
    /// `GOVERNOR__POLICY__RETRIES=2` overrides `policy.retries`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env_prefix(path, ENV_PREFIX)
    }

    /// Like [`GovernorConfig::load`] with a custom environment prefix.
    pub fn load_with_env_prefix(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: GovernorConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// The configured policy as retry options.
    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions::from(&self.policy)
    }

    fn validate(&self) -> Result<()> {
        self.retry_options().validate()
    }
}
