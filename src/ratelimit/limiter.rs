//! Core rate limiter implementation.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::entry::{Admission, RateLimitEntry};
use super::policy::{PolicySet, RateLimitPolicy};
use crate::error::{RateLimitError, Result};

/// Admission decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests still admissible in the current window
    pub remaining: u32,
    /// Wall-clock time at which the current window closes
    pub reset_at: DateTime<Utc>,
}

impl RateLimitResult {
    /// How long a denied caller should wait before retrying.
    ///
    /// Zero for admitted requests.
    pub fn retry_after(&self) -> Duration {
        if self.allowed {
            return Duration::ZERO;
        }
        (self.reset_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// `reset_at` as milliseconds since the Unix epoch.
    pub fn reset_at_ms(&self) -> i64 {
        self.reset_at.timestamp_millis()
    }
}

/// Per-key fixed-window rate limiter.
///
/// The store is sharded; the read-decide-write for a key runs while that
/// key's shard is write-locked, so concurrent checks on one key can never
/// admit more than the policy's cap. Share it behind an `Arc`.
pub struct RateLimiter {
    /// Window state indexed by caller key
    entries: DashMap<String, RateLimitEntry>,
    /// Monotonic instant paired with the wall clock at construction
    epoch: (Instant, DateTime<Utc>),
}

impl RateLimiter {
    /// Create an empty rate limiter.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            epoch: (Instant::now(), Utc::now()),
        }
    }

    /// Check and record one request for `key` under `policy`.
    pub fn check(&self, key: &str, policy: &RateLimitPolicy) -> Result<RateLimitResult> {
        self.check_at(key, policy, Instant::now())
    }

    /// Check one request against the policy registered as `name`.
    pub fn check_named(
        &self,
        key: &str,
        policies: &PolicySet,
        name: &str,
    ) -> Result<RateLimitResult> {
        let policy = policies.require(name)?;
        self.check(key, policy)
    }

    /// Check and record one request for `key` as of the monotonic instant `now`.
    pub fn check_at(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now: Instant,
    ) -> Result<RateLimitResult> {
        policy.validate()?;
        if key.is_empty() {
            return Err(RateLimitError::EmptyKey);
        }

        trace!(
            key = %key,
            max_requests = policy.max_requests,
            window_ms = policy.window_ms,
            "Checking rate limit"
        );

        let (admission, remaining, reset_at) = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let admission = entry.admit(policy, now);
                (admission, entry.remaining(policy), entry.reset_at())
            }
            Entry::Vacant(vacant) => {
                let entry = RateLimitEntry::open(now, policy.window());
                let result = (Admission::Opened, entry.remaining(policy), entry.reset_at());
                vacant.insert(entry);
                result
            }
        };

        match admission {
            Admission::Opened => debug!(
                key = %key,
                limit = policy.max_requests,
                window_ms = policy.window_ms,
                "Opened rate limit window"
            ),
            Admission::Denied => debug!(key = %key, "Rate limit exceeded"),
            Admission::Counted => {}
        }

        let allowed = admission != Admission::Denied;
        Ok(RateLimitResult {
            allowed,
            remaining: if allowed { remaining } else { 0 },
            reset_at: self.to_wall_clock(reset_at),
        })
    }

    /// Remove every entry whose window has closed. Returns the number evicted.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Remove every entry whose window has closed as of `now`.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let evicted = before.saturating_sub(self.entries.len());

        debug!(
            evicted = evicted,
            remaining = self.entries.len(),
            "Swept expired rate limit entries"
        );
        evicted
    }

    /// Requests counted so far in the open window for `key`.
    ///
    /// Returns `None` if the key has no entry or its window has closed.
    pub fn current_count(&self, key: &str) -> Option<u32> {
        self.current_count_at(key, Instant::now())
    }

    /// Like [`current_count`](Self::current_count) as of `now`.
    pub fn current_count_at(&self, key: &str, now: Instant) -> Option<u32> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.count())
    }

    /// Get the number of tracked keys, including expired ones not yet swept.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Clear all entries.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn to_wall_clock(&self, instant: Instant) -> DateTime<Utc> {
        let (base_instant, base_wall) = self.epoch;
        let offset = instant.saturating_duration_since(base_instant);
        chrono::Duration::from_std(offset)
            .ok()
            .and_then(|offset| base_wall.checked_add_signed(offset))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::assert_err;

    const AUTH: RateLimitPolicy = RateLimitPolicy::AUTH;

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.entry_count(), 0);
    }

    #[test]
    fn test_check_creates_entry() {
        let limiter = RateLimiter::new();

        let result = limiter.check("auth:203.0.113.5", &AUTH).unwrap();

        assert!(result.allowed);
        assert_eq!(result.remaining, 4);
        assert_eq!(limiter.entry_count(), 1);
        assert_eq!(limiter.current_count("auth:203.0.113.5"), Some(1));
    }

    #[test]
    fn test_check_increments() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        limiter.check_at("k", &AUTH, now).unwrap();
        assert_eq!(limiter.current_count_at("k", now), Some(1));

        limiter.check_at("k", &AUTH, now).unwrap();
        assert_eq!(limiter.current_count_at("k", now), Some(2));
    }

    #[test]
    fn test_auth_scenario() {
        let limiter = RateLimiter::new();
        let key = "auth:203.0.113.5";
        let start = Instant::now();

        for expected in [4, 3, 2, 1, 0] {
            let result = limiter.check_at(key, &AUTH, start).unwrap();
            assert!(result.allowed);
            assert_eq!(result.remaining, expected);
        }

        let denied = limiter
            .check_at(key, &AUTH, start + Duration::from_secs(60))
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);

        let later = start + AUTH.window() + Duration::from_millis(1);
        let result = limiter.check_at(key, &AUTH, later).unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, 4);
    }

    #[test]
    fn test_all_branches_report_same_reset_time() {
        let limiter = RateLimiter::new();
        let policy = RateLimitPolicy {
            max_requests: 2,
            window_ms: 10_000,
        };
        let start = Instant::now();

        let opened = limiter.check_at("k", &policy, start).unwrap();
        let counted = limiter
            .check_at("k", &policy, start + Duration::from_secs(1))
            .unwrap();
        let denied = limiter
            .check_at("k", &policy, start + Duration::from_secs(2))
            .unwrap();

        assert!(opened.allowed && counted.allowed && !denied.allowed);
        assert_eq!(opened.reset_at, counted.reset_at);
        assert_eq!(counted.reset_at, denied.reset_at);
        assert_eq!(opened.reset_at_ms(), denied.reset_at_ms());
    }

    #[test]
    fn test_reset_time_is_in_the_future() {
        let limiter = RateLimiter::new();
        let before = Utc::now();
        let result = limiter.check("k", &RateLimitPolicy::API).unwrap();

        assert!(result.reset_at > before);
        assert!(result.reset_at <= Utc::now() + chrono::Duration::seconds(61));
        assert_eq!(result.retry_after(), Duration::ZERO);
    }

    #[test]
    fn test_denied_result_has_retry_after() {
        let limiter = RateLimiter::new();
        let policy = RateLimitPolicy {
            max_requests: 1,
            window_ms: 60_000,
        };

        limiter.check("k", &policy).unwrap();
        let denied = limiter.check("k", &policy).unwrap();

        assert!(!denied.allowed);
        assert!(denied.retry_after() > Duration::from_secs(50));
        assert!(denied.retry_after() <= Duration::from_secs(61));
    }

    #[test]
    fn test_denial_is_non_consuming() {
        let limiter = RateLimiter::new();
        let policy = RateLimitPolicy {
            max_requests: 2,
            window_ms: 1_000,
        };
        let start = Instant::now();

        limiter.check_at("k", &policy, start).unwrap();
        limiter.check_at("k", &policy, start).unwrap();
        for _ in 0..10 {
            assert!(!limiter.check_at("k", &policy, start).unwrap().allowed);
        }
        assert_eq!(limiter.current_count_at("k", start), Some(2));

        let rolled = start + policy.window();
        let result = limiter.check_at("k", &policy, rolled).unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new();
        let policy = RateLimitPolicy {
            max_requests: 1,
            window_ms: 60_000,
        };

        assert!(limiter.check("register:203.0.113.5", &policy).unwrap().allowed);
        assert!(!limiter.check("register:203.0.113.5", &policy).unwrap().allowed);

        let other = limiter.check("register:198.51.100.7", &policy).unwrap();
        assert!(other.allowed);
        assert_eq!(limiter.current_count("register:203.0.113.5"), Some(1));
        assert_eq!(limiter.current_count("register:198.51.100.7"), Some(1));
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let limiter = RateLimiter::new();

        let zero_cap = RateLimitPolicy {
            max_requests: 0,
            window_ms: 1_000,
        };
        let zero_window = RateLimitPolicy {
            max_requests: 1,
            window_ms: 0,
        };

        assert!(matches!(
            limiter.check("k", &zero_cap),
            Err(RateLimitError::InvalidPolicy(_))
        ));
        assert_err!(limiter.check("k", &zero_window));
        assert_eq!(limiter.entry_count(), 0);
    }

    #[test]
    fn test_empty_key_rejected() {
        let limiter = RateLimiter::new();
        assert!(matches!(
            limiter.check("", &AUTH),
            Err(RateLimitError::EmptyKey)
        ));
        assert_eq!(limiter.entry_count(), 0);
    }

    #[test]
    fn test_check_named() {
        let limiter = RateLimiter::new();
        let policies = PolicySet::presets();

        for _ in 0..3 {
            assert!(limiter.check_named("reset:a@b.c", &policies, "password_reset").unwrap().allowed);
        }
        assert!(!limiter.check_named("reset:a@b.c", &policies, "password_reset").unwrap().allowed);
        assert!(matches!(
            limiter.check_named("k", &policies, "missing"),
            Err(RateLimitError::UnknownPolicy(_))
        ));
    }

    #[test]
    fn test_sweep_evicts_only_expired() {
        let limiter = RateLimiter::new();
        let short = RateLimitPolicy {
            max_requests: 5,
            window_ms: 1_000,
        };
        let long = RateLimitPolicy {
            max_requests: 5,
            window_ms: 60_000,
        };
        let start = Instant::now();

        limiter.check_at("short-a", &short, start).unwrap();
        limiter.check_at("short-b", &short, start).unwrap();
        limiter.check_at("long", &long, start).unwrap();
        assert_eq!(limiter.sweep_at(start), 0);

        let evicted = limiter.sweep_at(start + Duration::from_secs(1));
        assert_eq!(evicted, 2);
        assert_eq!(limiter.entry_count(), 1);
        assert!(limiter.current_count_at("long", start).is_some());
    }

    #[test]
    fn test_expired_entry_reads_as_absent() {
        let limiter = RateLimiter::new();
        let policy = RateLimitPolicy {
            max_requests: 5,
            window_ms: 1_000,
        };
        let start = Instant::now();

        limiter.check_at("k", &policy, start).unwrap();
        assert_eq!(
            limiter.current_count_at("k", start + Duration::from_secs(2)),
            None
        );
        assert_eq!(limiter.entry_count(), 1);
    }

    #[test]
    fn test_clear_entries() {
        let limiter = RateLimiter::new();
        limiter.check("k", &AUTH).unwrap();
        assert_eq!(limiter.entry_count(), 1);

        limiter.clear();
        assert_eq!(limiter.entry_count(), 0);
    }

    #[test]
    fn test_concurrent_checks_respect_cap() {
        let limiter = Arc::new(RateLimiter::new());
        let policy = RateLimitPolicy {
            max_requests: 10,
            window_ms: 60_000,
        };

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || limiter.check("upload:203.0.113.5", &policy).unwrap())
            })
            .collect();

        let results: Vec<RateLimitResult> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let allowed = results.iter().filter(|r| r.allowed).count();

        assert_eq!(allowed, 10);
        assert_eq!(results.len() - allowed, 10);
        assert_eq!(limiter.current_count("upload:203.0.113.5"), Some(10));
    }
}
