//! Global attempt rate limiting.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Token bucket limiting scheduling attempts across all task groups.
///
/// Refills continuously at `rate` permits per second with a burst capacity
/// of one second's worth of permits. `acquire` suspends until a permit is
/// available rather than failing.
pub struct RateLimiter {
    rate: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    available: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(permits_per_second: u32) -> Self {
        assert!(permits_per_second > 0, "rate must be positive");
        let rate = f64::from(permits_per_second);
        Self {
            rate,
            state: Mutex::new(BucketState {
                available: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one permit, waiting as long as necessary.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("rate limiter lock poisoned");
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill);
                state.available =
                    (state.available + elapsed.as_secs_f64() * self.rate).min(self.rate);
                state.last_refill = now;

                if state.available >= 1.0 {
                    state.available -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64((1.0 - state.available) / self.rate))
                }
            };

            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}
