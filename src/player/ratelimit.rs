//! Token-bucket rate limiting for provider requests.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket shared by every connection to one (provider, credential)
/// pair.
///
/// `acquire` waits until a whole token is available; refill is continuous
/// at `refill_per_sec`. Capacity bounds the burst after an idle period.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// A bucket refilling at `rpm` requests per minute with a burst of
    /// one minute's worth, capped at 10.
    pub fn per_minute(rpm: f64) -> Self {
        Self::new(rpm.min(10.0).max(1.0), rpm / 60.0)
    }

    /// Takes one token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = Instant::now();
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                (1.0 - state.tokens) / self.refill_per_sec
            };
            debug!(wait_secs = wait, "rate limited, waiting for token");
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }
}
