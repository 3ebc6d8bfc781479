//! Rate limiting logic and state management.

mod entry;
mod limiter;
mod policy;
mod sweeper;

pub mod key;

pub use entry::RateLimitEntry;
pub use limiter::{RateLimitResult, RateLimiter};
pub use policy::{PolicySet, RateLimitPolicy};
pub use sweeper::{SweeperHandle, DEFAULT_SWEEP_INTERVAL};
