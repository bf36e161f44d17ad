//! Background Expiry Sweeper
//!
//! Reads already treat expired entries as absent, but an entry that is never
//! read again would otherwise sit in memory until overwritten. The sweeper is a
//! tokio task that periodically calls [`StorageEngine::cleanup_expired`].
//!
//! It adapts its interval: when a large fraction of keys turn out to be
//! expired it sweeps more often, and when nothing expires it backs off.
//! Sweeping never changes what a read returns.

use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Starting interval between sweeps (default: 100ms)
    pub base_interval: Duration,

    /// Fastest allowed sweep interval (default: 10ms)
    pub min_interval: Duration,

    /// Slowest allowed sweep interval (default: 1s)
    pub max_interval: Duration,

    /// Halve the interval when more than this fraction of keys expired
    pub speedup_threshold: f64,

    /// Double the interval when nothing expired and the rate is below this
    pub slowdown_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
        }
    }
}

impl ExpiryConfig {
    /// Computes the next sleep interval from one sweep's outcome.
    fn next_interval(&self, current: Duration, keys_before: u64, expired: u64) -> Duration {
        if keys_before == 0 {
            return current;
        }

        let rate = expired as f64 / keys_before as f64;
        if rate > self.speedup_threshold {
            (current / 2).max(self.min_interval)
        } else if expired == 0 && rate < self.slowdown_threshold {
            (current * 2).min(self.max_interval)
        } else {
            current
        }
    }
}

/// Handle to a running sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper onto the current tokio runtime.
    ///
    /// ```ignore
    /// use pulsekv::storage::{ExpiryConfig, ExpirySweeper, StorageEngine};
    /// use std::sync::Arc;
    ///
    /// let engine = Arc::new(StorageEngine::new());
    /// let sweeper = ExpirySweeper::start(engine, ExpiryConfig::default());
    /// drop(sweeper); // stops it
    /// ```
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(engine, config, shutdown_rx));
        info!("Background expiry sweeper started");

        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("Background expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let keys_before = engine.len();
        let expired = engine.cleanup_expired();
        let next = config.next_interval(interval, keys_before, expired);

        if next < interval {
            debug!(
                expired,
                new_interval_ms = next.as_millis() as u64,
                "High expiry rate, speeding up sweeper"
            );
        } else if next > interval {
            trace!(
                new_interval_ms = next.as_millis() as u64,
                "Low expiry rate, slowing down sweeper"
            );
        }
        interval = next;

        if expired > 0 {
            debug!(expired, keys_remaining = engine.len(), "Expired keys cleaned up");
        }
    }
}

/// Starts the expiry sweeper with the default configuration.
pub fn start_expiry_sweeper(engine: Arc<StorageEngine>) -> ExpirySweeper {
    ExpirySweeper::start(engine, ExpiryConfig::default())
}
