//! Per-principal token-bucket rate limiting.
//!
//! Two independent limiters guard the HTTP surface: a low-rate one for
//! session creation and a high-rate one for chunk PUTs. Buckets are keyed by
//! principal (user id, falling back to client IP upstream) — limits are never
//! global.

use dashmap::DashMap;
use std::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket limiter: `capacity` requests per `window`, refilled
/// continuously.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = capacity.max(1) as f64;
        Self {
            capacity,
            refill_per_sec: capacity / window.as_secs_f64().max(f64::MIN_POSITIVE),
            buckets: DashMap::new(),
        }
    }

    /// Take one token for `key`. Returns `false` when the bucket is empty.
    pub fn try_acquire(&self, key: &str) -> bool {
        self.try_acquire_at(key, Instant::now())
    }

    fn try_acquire_at(&self, key: &str, now: Instant) -> bool {
        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets idle past `max_idle`; keeps the map from growing without
    /// bound under rotating principals.
    pub fn evict_idle(&self, max_idle: Duration) {
        let now = Instant::now();
        self.buckets
            .retain(|_, b| now.saturating_duration_since(b.last_refill) < max_idle);
    }
}
