//! Rate limit policies and the named policy registry.
//!
//! A policy is plain configuration: a cap and a window length. The limiter
//! never interprets what a policy is for; callers pick one per check, either
//! directly or by name from a [`PolicySet`] loaded from YAML.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{RateLimitError, Result};

/// Maximum number of admitted requests per fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Requests admitted per window
    pub max_requests: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl RateLimitPolicy {
    /// Image and listing uploads.
    pub const UPLOAD: RateLimitPolicy = RateLimitPolicy {
        max_requests: 10,
        window_ms: 60_000,
    };

    /// Sign-in and registration attempts.
    pub const AUTH: RateLimitPolicy = RateLimitPolicy {
        max_requests: 5,
        window_ms: 900_000,
    };

    /// General API traffic.
    pub const API: RateLimitPolicy = RateLimitPolicy {
        max_requests: 100,
        window_ms: 60_000,
    };

    /// Password-reset emails.
    pub const PASSWORD_RESET: RateLimitPolicy = RateLimitPolicy {
        max_requests: 3,
        window_ms: 3_600_000,
    };

    /// Create a validated policy.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self> {
        let policy = Self {
            max_requests,
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Reject policies that could never admit anything or never expire.
    pub fn validate(&self) -> Result<()> {
        if self.max_requests < 1 {
            return Err(RateLimitError::InvalidPolicy(
                "max_requests must be at least 1".to_string(),
            ));
        }
        if self.window_ms < 1 {
            return Err(RateLimitError::InvalidPolicy(
                "window_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The window as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Named policies, keyed by the action they throttle.
///
/// A fresh set carries the built-in presets; YAML files add to or
/// override them by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySet {
    #[serde(default)]
    pub policies: BTreeMap<String, RateLimitPolicy>,
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::presets()
    }
}

impl PolicySet {
    /// A set with no policies at all.
    pub fn empty() -> Self {
        Self {
            policies: BTreeMap::new(),
        }
    }

    /// The built-in presets: `upload`, `auth`, `api` and `password_reset`.
    pub fn presets() -> Self {
        let mut policies = BTreeMap::new();
        policies.insert("upload".to_string(), RateLimitPolicy::UPLOAD);
        policies.insert("auth".to_string(), RateLimitPolicy::AUTH);
        policies.insert("api".to_string(), RateLimitPolicy::API);
        policies.insert("password_reset".to_string(), RateLimitPolicy::PASSWORD_RESET);
        Self { policies }
    }

    /// Load policies from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load policies from a YAML string.
    ///
    /// Accepts either a bare `name: {max_requests, window_ms}` mapping or
    /// the same mapping nested under a `policies` key.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let set = match serde_yaml::from_str::<PolicySet>(yaml) {
            Ok(set) if !set.policies.is_empty() => set,
            _ => {
                let policies: BTreeMap<String, RateLimitPolicy> = serde_yaml::from_str(yaml)
                    .map_err(|e| {
                        RateLimitError::Config(format!("Failed to parse rate limit policies: {}", e))
                    })?;
                Self { policies }
            }
        };

        for (name, policy) in &set.policies {
            policy.validate().map_err(|e| {
                RateLimitError::Config(format!("policy '{}': {}", name, e))
            })?;
        }

        Ok(set)
    }

    /// Overlay `other` on top of this set; same-named policies are replaced.
    pub fn merge(mut self, other: PolicySet) -> Self {
        self.policies.extend(other.policies);
        self
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<&RateLimitPolicy> {
        self.policies.get(name)
    }

    /// Look up a policy by name, failing on unknown names.
    pub fn require(&self, name: &str) -> Result<&RateLimitPolicy> {
        self.get(name)
            .ok_or_else(|| RateLimitError::UnknownPolicy(name.to_string()))
    }

    /// Insert or replace a policy after validating it.
    pub fn insert(&mut self, name: impl Into<String>, policy: RateLimitPolicy) -> Result<()> {
        policy.validate()?;
        self.policies.insert(name.into(), policy);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
