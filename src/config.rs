//! Configuration management for Sluice.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::error::{Result, SluiceError};
use crate::ratelimit::DEFAULT_NAME;

/// Prefix for environment variable overrides, e.g. `SLUICE__LOGGING__LEVEL`.
const ENV_PREFIX: &str = "SLUICE";

/// Main configuration for Sluice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SluiceConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// One entry per protected resource
    #[serde(default = "default_limiters")]
    pub limiters: Vec<LimiterConfig>,
}

impl Default for SluiceConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            limiters: default_limiters(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `sluice=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Parameters for a single sliding-window limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Label used in logs and registry lookups
    #[serde(default = "default_limiter_name")]
    pub name: String,

    /// Maximum admissions per window
    pub max_requests: u32,

    /// Window length in milliseconds
    pub window_ms: u64,
}

fn default_limiter_name() -> String {
    DEFAULT_NAME.to_string()
}

impl LimiterConfig {
    pub fn new(name: impl Into<String>, max_requests: u32, window_ms: u64) -> Self {
        Self {
            name: name.into(),
            max_requests,
            window_ms,
        }
    }

    /// The name the limiter is registered under; empty falls back to the default.
    pub fn effective_name(&self) -> &str {
        if self.name.is_empty() {
            DEFAULT_NAME
        } else {
            &self.name
        }
    }

    /// Reject parameters that would make the limiter meaningless.
    ///
    /// A zero budget never admits anything and a zero window never holds
    /// anything, so both are refused up front.
    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(SluiceError::InvalidLimit {
                name: self.name.clone(),
                reason: "max_requests must be greater than zero".to_string(),
            });
        }
        if self.window_ms == 0 {
            return Err(SluiceError::InvalidLimit {
                name: self.name.clone(),
                reason: "window_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Budgets for the platform's upstream providers.
fn default_limiters() -> Vec<LimiterConfig> {
    vec![
        LimiterConfig::new("text-generation", 60, 60_000),
        LimiterConfig::new("image-generation", 30, 60_000),
        LimiterConfig::new("stock-photos", 50, 3_600_000),
    ]
}

impl SluiceConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SluiceConfig = serde_yaml::from_str(yaml)
            .map_err(|e| SluiceError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from built-in defaults, an optional YAML file, and
    /// `SLUICE__*` environment variables, in increasing precedence.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::new(&path.to_string_lossy(), config::FileFormat::Yaml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__"),
        );

        let config: SluiceConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SluiceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every limiter and make sure names are unique.
    pub fn validate(&self) -> Result<()> {
        if self.limiters.is_empty() {
            return Err(SluiceError::Config(
                "at least one limiter must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for limiter in &self.limiters {
            limiter.validate()?;
            let name = limiter.effective_name();
            if !seen.insert(name) {
                return Err(SluiceError::Config(format!(
                    "duplicate limiter name: {}",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Render the configuration back to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| SluiceError::Config(e.to_string()))
    }
}
