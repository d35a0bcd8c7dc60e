//! Local (in-process) limiters: a lock-free token bucket, an
//! exponential-backoff-per-key limiter, a fast-then-slow limiter, and a
//! composite that takes the most conservative answer across several.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::RateLimiter;

/// A classic token bucket: refills at `rate` tokens/sec up to `burst`
/// tokens, admits one token per `take`. State is a packed `(tokens_bits,
/// last_refill_millis)` pair updated with a compare-exchange loop so
/// concurrent callers never block on a lock.
pub struct BucketLimiter {
    rate: f64,
    burst: f64,
    state: AtomicU64,
    epoch: Instant,
}

/// Packs `(tokens: f32-ish fixed point, elapsed_ms: u32)` into one `u64` so
/// a single `compare_exchange` can update both fields atomically.
fn pack(tokens: f64, elapsed_ms: u64) -> u64 {
    let tokens_fixed = (tokens.max(0.0) * 1000.0) as u64 & 0xFFFF_FFFF;
    (elapsed_ms << 32) | tokens_fixed
}

fn unpack(bits: u64) -> (f64, u64) {
    let tokens_fixed = bits & 0xFFFF_FFFF;
    let elapsed_ms = bits >> 32;
    (tokens_fixed as f64 / 1000.0, elapsed_ms)
}

impl BucketLimiter {
    pub fn new(rate: f64, burst: u32) -> Self {
        let epoch = Instant::now();
        Self {
            rate,
            burst: burst as f64,
            state: AtomicU64::new(pack(burst as f64, 0)),
            epoch,
        }
    }

    fn try_take(&self, cost: f64) -> (bool, Duration) {
        loop {
            let now_ms = self.epoch.elapsed().as_millis() as u64;
            let current = self.state.load(Ordering::Acquire);
            let (tokens, last_ms) = unpack(current);
            let elapsed_secs = now_ms.saturating_sub(last_ms) as f64 / 1000.0;
            let refilled = (tokens + elapsed_secs * self.rate).min(self.burst);

            if refilled >= cost {
                let next = pack(refilled - cost, now_ms);
                if self
                    .state
                    .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return (true, Duration::ZERO);
                }
                continue;
            }

            let next = pack(refilled, now_ms);
            if self
                .state
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let deficit = cost - refilled;
                let wait = Duration::from_secs_f64((deficit / self.rate).max(0.0));
                return (false, wait);
            }
        }
    }
}

#[async_trait]
impl RateLimiter for BucketLimiter {
    async fn take(&self, _item: &str) -> bool {
        self.try_take(1.0).0
    }

    async fn when(&self, _item: &str) -> Duration {
        self.try_take(1.0).1
    }

    fn retries(&self, _item: &str) -> u32 {
        0
    }

    fn forget(&self, _item: &str) {}
}

/// Tracks a failure count per key; `when` returns an exponentially growing
/// delay and increments the count, `forget` resets it. Used by the sequence
/// allocator to back off between failed segment renewals.
pub struct ExponentialBackoffLimiter {
    base_delay: Duration,
    max_delay: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl ExponentialBackoffLimiter {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the delay to wait before the next attempt, then increments
    /// the failure count for `item`.
    pub fn when(&self, item: &str) -> Duration {
        let mut failures = self.failures.lock();
        let count = failures.entry(item.to_string()).or_insert(0);
        let delay = self
            .base_delay
            .checked_mul(1u32.checked_shl(*count).unwrap_or(u32::MAX))
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        *count = count.saturating_add(1);
        delay
    }

    pub fn forget(&self, item: &str) {
        self.failures.lock().remove(item);
    }

    pub fn retries(&self, item: &str) -> u32 {
        *self.failures.lock().get(item).unwrap_or(&0)
    }
}

#[async_trait]
impl RateLimiter for ExponentialBackoffLimiter {
    async fn take(&self, item: &str) -> bool {
        self.retries(item) == 0
    }

    async fn when(&self, item: &str) -> Duration {
        ExponentialBackoffLimiter::when(self, item)
    }

    fn retries(&self, item: &str) -> u32 {
        ExponentialBackoffLimiter::retries(self, item)
    }

    fn forget(&self, item: &str) {
        ExponentialBackoffLimiter::forget(self, item)
    }
}

/// Returns `fast_delay` for the first `max_fast_attempts` calls to `when`
/// for a given key, then `slow_delay` thereafter.
pub struct FastSlowLimiter {
    max_fast_attempts: u32,
    fast_delay: Duration,
    slow_delay: Duration,
    attempts: Mutex<HashMap<String, u32>>,
}

impl FastSlowLimiter {
    pub fn new(max_fast_attempts: u32, fast_delay: Duration, slow_delay: Duration) -> Self {
        Self {
            max_fast_attempts,
            fast_delay,
            slow_delay,
            attempts: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RateLimiter for FastSlowLimiter {
    async fn take(&self, _item: &str) -> bool {
        true
    }

    async fn when(&self, item: &str) -> Duration {
        let mut attempts = self.attempts.lock();
        let count = attempts.entry(item.to_string()).or_insert(0);
        *count += 1;
        if *count <= self.max_fast_attempts {
            self.fast_delay
        } else {
            self.slow_delay
        }
    }

    fn retries(&self, item: &str) -> u32 {
        *self.attempts.lock().get(item).unwrap_or(&0)
    }

    fn forget(&self, item: &str) {
        self.attempts.lock().remove(item);
    }
}

/// Composes several limiters and returns the most conservative answer:
/// the maximum wait, the logical AND of admissions, the maximum retry
/// count, and forgets on all of them.
pub struct MaxOfLimiter {
    limiters: Vec<Arc<dyn RateLimiter>>,
}

impl MaxOfLimiter {
    pub fn new(limiters: Vec<Arc<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }
}

#[async_trait]
impl RateLimiter for MaxOfLimiter {
    async fn take(&self, item: &str) -> bool {
        for l in &self.limiters {
            if !l.take(item).await {
                return false;
            }
        }
        true
    }

    async fn when(&self, item: &str) -> Duration {
        let mut max = Duration::ZERO;
        for l in &self.limiters {
            max = max.max(l.when(item).await);
        }
        max
    }

    fn retries(&self, item: &str) -> u32 {
        self.limiters.iter().map(|l| l.retries(item)).max().unwrap_or(0)
    }

    fn forget(&self, item: &str) {
        for l in &self.limiters {
            l.forget(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bucket_admits_up_to_burst_then_rejects() {
        let b = BucketLimiter::new(1.0, 1);
        assert!(b.take("x").await);
        assert!(!b.take("x").await);
    }

    #[tokio::test]
    async fn exponential_backoff_grows_and_forgets() {
        let l = ExponentialBackoffLimiter::new(Duration::from_millis(10), Duration::from_secs(1));
        let d1 = RateLimiter::when(&l, "k").await;
        let d2 = RateLimiter::when(&l, "k").await;
        assert!(d2 >= d1);
        l.forget("k");
        assert_eq!(l.retries("k"), 0);
    }

    #[tokio::test]
    async fn fast_slow_switches_after_threshold() {
        let l = FastSlowLimiter::new(2, Duration::from_millis(5), Duration::from_secs(1));
        assert_eq!(RateLimiter::when(&l, "k").await, Duration::from_millis(5));
        assert_eq!(RateLimiter::when(&l, "k").await, Duration::from_millis(5));
        assert_eq!(RateLimiter::when(&l, "k").await, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn max_of_takes_most_conservative_wait() {
        let a = Arc::new(BucketLimiter::new(1.0, 1));
        let b = Arc::new(FastSlowLimiter::new(0, Duration::from_millis(1), Duration::from_secs(5)));
        let combo = MaxOfLimiter::new(vec![a, b]);
        let wait = combo.when("k").await;
        assert!(wait >= Duration::from_secs(5));
    }
}
