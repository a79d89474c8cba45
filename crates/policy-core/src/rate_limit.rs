//! Per-key token-bucket rate limiting with TTL eviction.
//!
//! Generalized from the host project's `api-server::rate_limit` (which keys
//! strictly on `IpAddr`) to a generic string key, since the DNS plane keys by
//! bare client IP while other callers may key differently.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

const DEFAULT_RPS: f64 = 10.0;
const DEFAULT_BURST: f64 = 20.0;
const DEFAULT_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub rps: f64,
    pub burst: f64,
    pub ttl: Duration,
}

impl RateLimitConfig {
    /// `rps <= 0`, `burst <= 0`, or `ttl == 0` fall back to the documented
    /// defaults (`R=10, B=20, ttl=1min`), matching `original_source/edge/internal/rate/limiter.go`.
    pub fn new(rps: f64, burst: f64, ttl: Duration) -> Self {
        Self {
            rps: if rps > 0.0 { rps } else { DEFAULT_RPS },
            burst: if burst > 0.0 { burst } else { DEFAULT_BURST },
            ttl: if ttl.is_zero() { DEFAULT_TTL } else { ttl },
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(DEFAULT_RPS, DEFAULT_BURST, DEFAULT_TTL)
    }
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_seen: Instant,
}

impl TokenBucket {
    fn new(config: RateLimitConfig) -> Self {
        Self { tokens: config.burst, capacity: config.burst, refill_rate: config.rps, last_seen: Instant::now() }
    }

    fn try_consume(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_seen).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_seen = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Shared, cloneable token-bucket limiter. A single mutex protects the whole
/// map — buckets are small and critical sections stay short, so a per-bucket
/// lock buys nothing.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: std::sync::Arc<Mutex<HashMap<String, TokenBucket>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { buckets: std::sync::Arc::new(Mutex::new(HashMap::new())), config }
    }

    /// Empty key is always allowed (internal/trusted paths).
    pub async fn allow(&self, key: &str) -> bool {
        if key.is_empty() {
            return true;
        }

        let mut buckets = self.buckets.lock().await;

        if !buckets.contains_key(key) {
            let ttl = self.config.ttl;
            buckets.retain(|_, b| b.last_seen.elapsed() < ttl);
            buckets.insert(key.to_string(), TokenBucket::new(self.config));
        }

        buckets.get_mut(key).expect("just inserted").try_consume()
    }

    /// Explicit sweep, independent of insertion-triggered eviction; safe to
    /// run on a timer. `allow`'s correctness never depends on this running.
    pub async fn cleanup(&self) {
        let mut buckets = self.buckets.lock().await;
        let ttl = self.config.ttl;
        buckets.retain(|_, b| b.last_seen.elapsed() < ttl);
    }

    pub fn start_cleanup_task(self) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                self.cleanup().await;
            }
        });
    }
}
