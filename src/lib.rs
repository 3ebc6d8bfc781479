//! Bazaar rate limiting
//!
//! This crate implements the in-process request throttle used by the Bazaar
//! marketplace to protect authentication, upload and other sensitive endpoints.
//! Each caller-supplied key gets its own fixed window; a background sweep
//! evicts expired keys so memory stays bounded by recent activity.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use error::{RateLimitError, Result};
pub use ratelimit::{PolicySet, RateLimitPolicy, RateLimitResult, RateLimiter, SweeperHandle};
