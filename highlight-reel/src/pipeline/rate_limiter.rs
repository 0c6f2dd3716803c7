//! Token bucket rate limiting for clip provider requests.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{trace, warn};

/// Configuration for a rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum tokens (burst capacity).
    pub max_tokens: u32,
    /// Tokens added per second.
    pub refill_rate: f64,
    /// Initial tokens.
    pub initial_tokens: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_tokens: 3,
            refill_rate: 5.0,
            initial_tokens: 3,
        }
    }
}

/// Token bucket state.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: &RateLimiterConfig) -> Self {
        let max_tokens = f64::from(config.max_tokens.max(1));
        let refill_rate = if config.refill_rate.is_finite() && config.refill_rate > 0.0 {
            config.refill_rate
        } else {
            let fallback = RateLimiterConfig::default().refill_rate;
            warn!(
                refill_rate = config.refill_rate,
                fallback, "Unusable refill rate, using the default"
            );
            fallback
        };
        Self {
            tokens: f64::from(config.initial_tokens).min(max_tokens),
            max_tokens,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    /// Take a token, or report how long until one is available.
    fn try_take(&mut self) -> std::result::Result<(), Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let needed = 1.0 - self.tokens;
        Err(Duration::from_secs_f64(needed / self.refill_rate))
    }
}

/// A token bucket shared by every task of a resolver.
///
/// # Cancel Safety
///
/// The lock is only held for the synchronous refill-and-take step; waiting
/// happens outside it, so dropping an `acquire` future never loses a token.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    bucket: Arc<Mutex<TokenBucket>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimiterConfig) -> Self {
        Self {
            bucket: Arc::new(Mutex::new(TokenBucket::new(config))),
        }
    }

    /// Try to acquire a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.bucket.lock().try_take().is_ok()
    }

    /// Acquire a token, waiting if necessary. Returns the time spent waiting.
    pub async fn acquire(&self) -> Duration {
        let started = Instant::now();
        loop {
            let wait = match self.bucket.lock().try_take() {
                Ok(()) => return started.elapsed(),
                Err(wait) => wait,
            };
            trace!("Rate limited, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(burst: u32, rate: f64) -> RateLimiterConfig {
        RateLimiterConfig {
            max_tokens: burst,
            refill_rate: rate,
            initial_tokens: burst,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_limited() {
        let limiter = RateLimiter::new(&config(3, 5.0));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::new(&config(1, 5.0));
        assert_eq!(limiter.acquire().await, Duration::ZERO);

        let waited = limiter.acquire().await;
        assert!(waited >= Duration::from_millis(190), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(250), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_rate_across_clones() {
        let limiter = RateLimiter::new(&config(3, 5.0));
        let started = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..13 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 3 from the burst, then 10 more at 5/s.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1990), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_refill_rate_falls_back() {
        for rate in [f64::NAN, f64::INFINITY, 0.0, -2.0] {
            let limiter = RateLimiter::new(&config(1, rate));
            assert!(limiter.try_acquire());

            let waited = limiter.acquire().await;
            assert!(waited >= Duration::from_millis(190), "{rate}: waited {waited:?}");
            assert!(waited <= Duration::from_millis(250), "{rate}: waited {waited:?}");
        }
    }

    #[test]
    fn test_tokens_capped_at_burst() {
        let mut bucket = TokenBucket::new(&RateLimiterConfig {
            max_tokens: 2,
            refill_rate: 1.0,
            initial_tokens: 10,
        });
        assert!(bucket.try_take().is_ok());
        assert!(bucket.try_take().is_ok());
        assert!(bucket.try_take().is_err());
    }
}
