//! Background eviction of expired rate limit entries.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::limiter::RateLimiter;
use crate::error::{RateLimitError, Result};

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Handle to a running sweep task.
///
/// Call [`stop`](Self::stop) for an orderly shutdown. Dropping the handle
/// aborts the task.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweep task and wait for it to finish.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Rate limit sweeper terminated abnormally");
                }
            }
        }
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl RateLimiter {
    /// Start sweeping expired entries every `interval` on the current tokio runtime.
    ///
    /// The task only holds a weak reference and exits by itself once the
    /// limiter is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> Result<SweeperHandle> {
        if interval.is_zero() {
            return Err(RateLimitError::Config(
                "sweep interval must be greater than zero".to_string(),
            ));
        }

        let limiter = Arc::downgrade(self);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_sweeper(limiter, interval, shutdown_rx));

        info!(interval_secs = interval.as_secs_f64(), "Rate limit sweeper started");

        Ok(SweeperHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

async fn run_sweeper(
    limiter: Weak<RateLimiter>,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Rate limit sweeper stopped");
                return;
            }
            _ = ticker.tick() => {
                let Some(limiter) = limiter.upgrade() else {
                    debug!("Rate limiter dropped, sweeper exiting");
                    return;
                };
                limiter.sweep();
            }
        }
    }
}
