//! Configuration management for the rate limiter service.
//!
//! Values come from an optional YAML file, overridden by `BAZAAR_*`
//! environment variables (`__` separates nested keys, e.g.
//! `BAZAAR_LIMITER__SWEEP_INTERVAL_SECS=60`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RateLimitError, Result};
use crate::ratelimit::PolicySet;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "BAZAAR";

/// Main configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,
}

/// Limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Seconds between sweeps of expired entries
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Path to a YAML file of named policies layered over the presets
    #[serde(default)]
    pub policies_path: Option<String>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            policies_path: None,
        }
    }
}

fn default_sweep_interval() -> u64 {
    300
}

impl LimiterConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// The presets, overlaid with `policies_path` when set.
    pub fn load_policies(&self) -> Result<PolicySet> {
        match &self.policies_path {
            Some(path) => Ok(PolicySet::presets().merge(PolicySet::from_file(path)?)),
            None => Ok(PolicySet::presets()),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from an optional file plus the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::with_name(path)
                    .format(::config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: ServiceConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RateLimitError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ServiceConfig =
            serde_yaml::from_str(yaml).map_err(|e| RateLimitError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.limiter.sweep_interval_secs == 0 {
            return Err(RateLimitError::Config(
                "limiter.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
