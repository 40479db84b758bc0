// src/limiter.rs

use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Paces the fetch loop: a fixed gap between segments, plus an optional
/// bandwidth cap enforced with a token bucket.
#[derive(Debug)]
pub struct Throttle {
    delay: Duration,
    bucket: Option<TokenBucket>,
}

/// The bucket may go into debt after a segment larger than its capacity;
/// the debt is paid back by waiting.
#[derive(Debug)]
struct TokenBucket {
    /// The burst size, in bytes.
    capacity: f64,
    tokens: f64,
    /// Bytes per second.
    rate: f64,
    last_refill: Instant,
}

impl Throttle {
    /// A rate of 0 disables the bandwidth cap.
    pub fn new(delay: Duration, rate_bytes_per_sec: u64) -> Self {
        let bucket = (rate_bytes_per_sec > 0).then(|| TokenBucket {
            capacity: rate_bytes_per_sec as f64,
            tokens: rate_bytes_per_sec as f64,
            rate: rate_bytes_per_sec as f64,
            last_refill: Instant::now(),
        });
        Self { delay, bucket }
    }

    /// How long the loop must wait after receiving `bytes`.
    fn owed(&mut self, bytes: u64) -> Duration {
        let capped = match self.bucket.as_mut() {
            Some(bucket) => bucket.take(bytes),
            None => Duration::ZERO,
        };
        self.delay.max(capped)
    }

    /// Waits out the pacing owed for `bytes`. Returns `false` if canceled while waiting.
    pub async fn pace(&mut self, bytes: u64, cancel: &CancellationToken) -> bool {
        let wait = self.owed(bytes);
        if wait.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = tokio::time::sleep(wait) => !cancel.is_cancelled(),
            _ = cancel.cancelled() => false,
        }
    }
}

impl TokenBucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    fn take(&mut self, amount: u64) -> Duration {
        self.refill();
        self.tokens -= amount as f64;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.rate)
        }
    }
}
