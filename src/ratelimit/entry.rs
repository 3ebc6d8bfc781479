//! Per-key window state.

use std::time::{Duration, Instant};

use super::policy::RateLimitPolicy;

/// Outcome of applying one request to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// The request opened a fresh window.
    Opened,
    /// The request was counted in the current window.
    Counted,
    /// The window is saturated; nothing was changed.
    Denied,
}

/// Request count for one key within its current fixed window.
///
/// All times are monotonic. An entry is only ever touched while its
/// store shard is locked, so the fields need no synchronization of their own.
#[derive(Debug, Clone)]
pub struct RateLimitEntry {
    /// Requests counted in the current window
    count: u32,
    /// When the current window opened
    window_start: Instant,
    /// When the current window closes
    reset_at: Instant,
}

impl RateLimitEntry {
    /// Open a window at `now` with the first request already counted.
    pub fn open(now: Instant, window: Duration) -> Self {
        Self {
            count: 1,
            window_start: now,
            reset_at: now + window,
        }
    }

    /// Apply one request at `now` under `policy`.
    ///
    /// An expired window is replaced rather than merged. A denied request
    /// leaves the entry untouched.
    pub(crate) fn admit(&mut self, policy: &RateLimitPolicy, now: Instant) -> Admission {
        if self.is_expired(now) {
            *self = Self::open(now, policy.window());
            return Admission::Opened;
        }

        if self.count >= policy.max_requests {
            return Admission::Denied;
        }

        self.count += 1;
        Admission::Counted
    }

    /// Whether the window has closed as of `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.reset_at
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn window_start(&self) -> Instant {
        self.window_start
    }

    pub fn reset_at(&self) -> Instant {
        self.reset_at
    }

    /// Slots left in the current window under `policy`.
    pub fn remaining(&self, policy: &RateLimitPolicy) -> u32 {
        policy.max_requests.saturating_sub(self.count)
    }

    /// Time until the window closes, zero once it has.
    pub fn duration_until_reset(&self, now: Instant) -> Duration {
        self.reset_at.saturating_duration_since(now)
    }
}
