//! Token-bucket rate limiting keyed by (identity, limit class).
//!
//! Every bucket sits behind its own mutex so two concurrent requests for the same
//! identity can never spend the same token. Buckets untouched for a full period have
//! refilled completely and are swept out; a fresh bucket replaces them on the next check.

use ahash::AHashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};
use crate::identity::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitClass {
    Request,
    Trade,
}

impl LimitClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitClass::Request => "request",
            LimitClass::Trade => "trade",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LimitClass::Request => "Request",
            LimitClass::Trade => "Trade",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    period: Duration,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: u32, period: Duration) -> Self {
        Self::new_at(rate, period, Instant::now())
    }

    pub fn new_at(rate: u32, period: Duration, now: Instant) -> Self {
        Self {
            tokens: rate as f64,
            capacity: rate as f64,
            period,
            last_refill: now,
        }
    }

    fn refill_rate(&self) -> f64 {
        let secs = self.period.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.capacity / secs
    }

    fn projected_tokens(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * self.refill_rate()).min(self.capacity)
    }

    pub fn consume(&mut self) -> bool {
        self.consume_at(Instant::now())
    }

    /// Refill for the time elapsed since the last check, then take one token if available.
    pub fn consume_at(&mut self, now: Instant) -> bool {
        self.tokens = self.projected_tokens(now);
        self.last_refill = now.max(self.last_refill);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn remaining(&self) -> u32 {
        self.tokens.max(0.0).floor() as u32
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    /// Seconds until one whole token is available, 0 when one already is.
    pub fn reset_in_at(&self, now: Instant) -> f64 {
        let tokens = self.projected_tokens(now);
        if tokens >= 1.0 {
            return 0.0;
        }
        let rate = self.refill_rate();
        if rate <= 0.0 {
            // A zero limit never refills; report one full period.
            return self.period.as_secs_f64();
        }
        (1.0 - tokens) / rate
    }

    pub fn reset_in(&self) -> f64 {
        self.reset_in_at(Instant::now())
    }

    /// Untouched for at least one period, so indistinguishable from a new bucket.
    fn idle_at(&self, now: Instant) -> bool {
        !self.period.is_zero() && now.saturating_duration_since(self.last_refill) >= self.period
    }

    /// Apply a changed limit (e.g. a tier upgrade) without resetting the spent budget.
    fn set_capacity(&mut self, rate: u32) {
        self.capacity = rate as f64;
        self.tokens = self.tokens.min(self.capacity);
    }
}

/// Result of a single bucket check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateDecision {
    pub class: LimitClass,
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_in_secs: f64,
}

impl RateDecision {
    fn into_result(self) -> GatewayResult<RateDecision> {
        if self.allowed {
            Ok(self)
        } else {
            Err(GatewayError::RateLimitExceeded {
                class: self.class,
                limit: self.limit,
                remaining: self.remaining,
                reset_in_secs: self.reset_in_secs,
            })
        }
    }
}

type BucketKey = (String, LimitClass);
type BucketMap = AHashMap<BucketKey, Arc<Mutex<TokenBucket>>>;

/// Idle buckets are swept once per this many checks.
const SWEEP_EVERY: u64 = 1024;

// Buckets another caller still holds are kept even when idle.
fn sweep_idle(buckets: &mut BucketMap, now: Instant) -> usize {
    let before = buckets.len();
    buckets.retain(|_, b| Arc::strong_count(b) > 1 || !b.lock().idle_at(now));
    let evicted = before - buckets.len();
    if evicted > 0 {
        debug!(evicted, remaining = buckets.len(), "idle rate-limit buckets evicted");
        metrics::gauge!("gateway_rate_limit_buckets").set(buckets.len() as f64);
    }
    evicted
}

pub struct RateLimiterStore {
    period: Duration,
    buckets: Mutex<BucketMap>,
    checks: AtomicU64,
}

impl RateLimiterStore {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            buckets: Mutex::new(AHashMap::new()),
            checks: AtomicU64::new(0),
        }
    }

    fn bucket(&self, key_id: &str, class: LimitClass, rate: u32, now: Instant) -> Arc<Mutex<TokenBucket>> {
        let mut buckets = self.buckets.lock();
        if (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            sweep_idle(&mut buckets, now);
        }
        buckets
            .entry((key_id.to_string(), class))
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new_at(rate, self.period, now))))
            .clone()
    }

    pub fn check_at(&self, key_id: &str, class: LimitClass, rate: u32, now: Instant) -> RateDecision {
        let bucket = self.bucket(key_id, class, rate, now);
        let mut bucket = bucket.lock();
        if bucket.capacity() != rate {
            bucket.set_capacity(rate);
        }
        let allowed = bucket.consume_at(now);
        let decision = RateDecision {
            class,
            allowed,
            limit: rate,
            remaining: bucket.remaining(),
            reset_in_secs: bucket.reset_in_at(now),
        };
        if !allowed {
            debug!(key_id, class = class.as_str(), reset_in = decision.reset_in_secs, "rate limited");
            metrics::counter!("gateway_rate_limited_total", "class" => class.as_str()).increment(1);
        }
        decision
    }

    pub fn check(&self, key_id: &str, class: LimitClass, rate: u32) -> RateDecision {
        self.check_at(key_id, class, rate, Instant::now())
    }

    /// Request-class check for read endpoints.
    pub fn check_request(&self, identity: &Identity) -> GatewayResult<RateDecision> {
        self.check(&identity.key_id.to_string(), LimitClass::Request, identity.rate_limit_rpm)
            .into_result()
    }

    /// Trade endpoints spend a request token first, then a trade token.
    /// A request-class denial short-circuits before the trade bucket is touched.
    pub fn check_trade(&self, identity: &Identity) -> GatewayResult<(RateDecision, RateDecision)> {
        self.check_trade_at(identity, Instant::now())
    }

    pub fn check_trade_at(&self, identity: &Identity, now: Instant) -> GatewayResult<(RateDecision, RateDecision)> {
        let key = identity.key_id.to_string();
        let request = self
            .check_at(&key, LimitClass::Request, identity.rate_limit_rpm, now)
            .into_result()?;
        let trade = self
            .check_at(&key, LimitClass::Trade, identity.rate_limit_tpm, now)
            .into_result()?;
        Ok((request, trade))
    }

    /// Drop buckets idle for a full period. Returns how many were removed.
    pub fn evict_idle_at(&self, now: Instant) -> usize {
        sweep_idle(&mut self.buckets.lock(), now)
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
