// src/discovery/rate_limit.rs
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::debug;

use super::shutdown_requested;

/// Burst capacity of the upstream request limiter
pub const DEFAULT_BURST: u32 = 5;

/// Token bucket shared by every subscription talking to one upstream
pub struct RateLimiter {
    /// Refill rate in tokens per second
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    /// May go negative: callers reserve a token and then sleep off the debt
    tokens: f64,
    last: Instant,
}

impl RateLimiter {
    /// Create a full bucket refilling at `rate` tokens per second
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            rate,
            burst: burst as f64,
            bucket: Mutex::new(Bucket {
                tokens: burst as f64,
                last: Instant::now(),
            }),
        }
    }

    /// Wait until a token is available.
    ///
    /// Returns `false` if shutdown was requested while waiting; the
    /// reserved token is handed back in that case.
    pub async fn acquire(&self, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        if *shutdown_rx.borrow() {
            return false;
        }

        let wait = self.reserve().await;
        if wait.is_zero() {
            return true;
        }

        debug!("Rate limited, waiting {:?} for a token", wait);

        tokio::select! {
            _ = tokio::time::sleep(wait) => true,
            _ = shutdown_requested(shutdown_rx) => {
                self.release().await;
                false
            }
        }
    }

    /// Take one token and return how long the caller must wait before using it
    async fn reserve(&self) -> Duration {
        let mut bucket = self.bucket.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last).as_secs_f64();

        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last = now;
        bucket.tokens -= 1.0;

        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.rate)
        }
    }

    async fn release(&self) {
        let mut bucket = self.bucket.lock().await;
        bucket.tokens = (bucket.tokens + 1.0).min(self.burst);
    }
}
