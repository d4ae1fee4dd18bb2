//! Memory-bounded per-domain rate limiter for respectful web crawling
//!
//! This module provides a token bucket per domain with LRU-based memory
//! management. The bucket arithmetic is lock-free; the only locks are the
//! per-shard locks of the [`DomainTable`] taken for the lookup.
//!
//! Key features:
//! - Per-domain policy resolution: exact domain > domain class > default
//! - Atomic refill-then-consume, so no two callers share a permit
//! - Immediate Allow/Deny decisions with no blocking or sleep
//! - Fixed-point arithmetic for sub-token precision
//! - Temporary throttling after `429 Too Many Requests`

use dashmap::DashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::domain_table::DomainTable;
use crate::utils::{DEFAULT_BURST_SIZE, DEFAULT_RATE_PER_SECOND};

/// Scaling factor for fixed-point token arithmetic (1000x precision)
const TOKEN_SCALE: u64 = 1000;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Rate limit decision for a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Permit granted
    Allow,
    /// No token available; one will be after `retry_after`
    Deny { retry_after: Duration },
}

impl RateLimitDecision {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Token bucket parameters for one domain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatePolicy {
    pub rate_per_second: f64,
    pub burst_size: u32,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            rate_per_second: DEFAULT_RATE_PER_SECOND,
            burst_size: DEFAULT_BURST_SIZE,
        }
    }
}

impl RatePolicy {
    #[must_use]
    pub const fn new(rate_per_second: f64, burst_size: u32) -> Self {
        Self {
            rate_per_second,
            burst_size,
        }
    }

    fn milli_tokens_per_sec(&self) -> u64 {
        (self.rate_per_second.max(0.0) * TOKEN_SCALE as f64) as u64
    }
}

/// Per-domain token bucket using atomic operations
#[derive(Debug)]
struct TokenBucket {
    /// Available tokens scaled by `TOKEN_SCALE`, always within `[0, max_tokens]`
    tokens: AtomicU64,
    /// Last refill as nanoseconds since the limiter origin
    last_refill_nanos: AtomicU64,
    /// Current refill rate in milli-tokens per second (lowered while throttled)
    rate: AtomicU64,
    /// Resolved rate to restore once a throttle expires
    base_rate: u64,
    /// Throttle deadline in nanoseconds since origin, 0 when not throttled
    throttled_until_nanos: AtomicU64,
    /// Burst size scaled by `TOKEN_SCALE`
    max_tokens: u64,
}

impl TokenBucket {
    fn new(policy: RatePolicy, now_nanos: u64) -> Self {
        let max_tokens = u64::from(policy.burst_size.max(1)) * TOKEN_SCALE;
        let rate = policy.milli_tokens_per_sec();
        Self {
            tokens: AtomicU64::new(max_tokens),
            last_refill_nanos: AtomicU64::new(now_nanos),
            rate: AtomicU64::new(rate),
            base_rate: rate,
            throttled_until_nanos: AtomicU64::new(0),
            max_tokens,
        }
    }

    /// Attempt to consume one token from the bucket
    fn try_consume_token(&self, now_nanos: u64) -> RateLimitDecision {
        self.expire_throttle(now_nanos);
        self.refill_tokens(now_nanos);

        loop {
            let current_tokens = self.tokens.load(Ordering::Acquire);
            if current_tokens < TOKEN_SCALE {
                let tokens_needed = TOKEN_SCALE - current_tokens;
                let rate = self.rate.load(Ordering::Acquire);
                let nanos_needed = if rate > 0 {
                    tokens_needed.saturating_mul(NANOS_PER_SEC).div_ceil(rate)
                } else {
                    1_000_000 // 1ms
                };
                return RateLimitDecision::Deny {
                    retry_after: Duration::from_nanos(nanos_needed),
                };
            }

            match self.tokens.compare_exchange_weak(
                current_tokens,
                current_tokens - TOKEN_SCALE,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return RateLimitDecision::Allow,
                Err(_) => continue, // Retry on contention
            }
        }
    }

    /// Refill tokens based on elapsed time since last refill
    ///
    /// `last_refill_nanos` only advances by the time that actually produced
    /// tokens, so callers arriving faster than one milli-token interval keep
    /// accumulating instead of starving each other. Only the caller that
    /// wins the timestamp CAS credits the tokens for that slice.
    fn refill_tokens(&self, now_nanos: u64) {
        loop {
            let last_refill = self.last_refill_nanos.load(Ordering::Acquire);
            if now_nanos <= last_refill {
                break;
            }

            let rate = self.rate.load(Ordering::Acquire);
            let elapsed_nanos = now_nanos - last_refill;
            let tokens_to_add = elapsed_nanos.saturating_mul(rate) / NANOS_PER_SEC;
            if tokens_to_add == 0 {
                break;
            }

            let time_credited_nanos = if rate > 0 {
                tokens_to_add.saturating_mul(NANOS_PER_SEC) / rate
            } else {
                0
            };
            let new_last_refill = last_refill.saturating_add(time_credited_nanos).min(now_nanos);

            match self.last_refill_nanos.compare_exchange_weak(
                last_refill,
                new_last_refill,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let _ = self
                        .tokens
                        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                            let next = current.saturating_add(tokens_to_add).min(self.max_tokens);
                            (next != current).then_some(next)
                        });
                    break;
                }
                Err(_) => continue,
            }
        }
    }

    /// Drain the bucket and lower the rate until `until_nanos`
    fn throttle(&self, factor: f64, until_nanos: u64, now_nanos: u64) {
        // Credit time spent at the old rate before switching
        self.refill_tokens(now_nanos);
        let reduced = ((self.base_rate as f64) / factor.max(1.0)) as u64;
        self.rate.store(reduced.max(1), Ordering::Release);
        self.throttled_until_nanos.store(until_nanos, Ordering::Release);
        self.tokens.store(0, Ordering::Release);
        self.last_refill_nanos.store(now_nanos, Ordering::Release);
    }

    fn expire_throttle(&self, now_nanos: u64) {
        let until = self.throttled_until_nanos.load(Ordering::Acquire);
        if until != 0
            && now_nanos >= until
            && self
                .throttled_until_nanos
                .compare_exchange(until, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.refill_tokens(until);
            self.rate.store(self.base_rate, Ordering::Release);
        }
    }

    fn available(&self) -> f64 {
        self.tokens.load(Ordering::Acquire) as f64 / TOKEN_SCALE as f64
    }

    fn is_throttled(&self) -> bool {
        self.throttled_until_nanos.load(Ordering::Acquire) != 0
    }
}

/// Per-domain admission control
///
/// One bucket per domain, created on first reference with the policy
/// resolved for that domain and evicted LRU once the table is full.
pub struct RateLimiter {
    buckets: DomainTable<TokenBucket>,
    default_policy: RatePolicy,
    domain_overrides: HashMap<String, RatePolicy>,
    class_policies: HashMap<String, RatePolicy>,
    class_assignments: DashMap<String, String>,
    throttle_factor: f64,
    throttle_duration: Duration,
    origin: Instant,
}

impl RateLimiter {
    /// Create a limiter with only a default policy
    #[must_use]
    pub fn new(default_policy: RatePolicy) -> Self {
        Self::with_capacity(
            default_policy,
            crate::utils::DEFAULT_DOMAIN_CACHE_CAPACITY,
            crate::utils::DEFAULT_QUEUE_SHARDS,
        )
    }

    /// Create a limiter bounded to roughly `capacity` domains over `shards`
    #[must_use]
    pub fn with_capacity(default_policy: RatePolicy, capacity: usize, shards: usize) -> Self {
        Self {
            buckets: DomainTable::new(capacity, shards),
            default_policy,
            domain_overrides: HashMap::new(),
            class_policies: HashMap::new(),
            class_assignments: DashMap::new(),
            throttle_factor: crate::utils::DEFAULT_THROTTLE_FACTOR,
            throttle_duration: Duration::from_secs(crate::utils::DEFAULT_THROTTLE_DURATION_SECS),
            origin: Instant::now(),
        }
    }

    /// Build a limiter from the scheduler configuration
    #[must_use]
    pub fn from_config(config: &crate::config::SchedulerConfig) -> Self {
        let mut limiter = Self::with_capacity(
            config.default_policy(),
            config.domain_cache_capacity(),
            config.queue_shards(),
        );
        limiter.domain_overrides = config
            .per_domain_overrides()
            .iter()
            .map(|(d, p)| (d.to_ascii_lowercase(), *p))
            .collect();
        limiter.class_policies = config.domain_classes().clone();
        for (domain, class) in config.class_assignments() {
            limiter
                .class_assignments
                .insert(domain.to_ascii_lowercase(), class.clone());
        }
        limiter.throttle_factor = config.throttle_factor();
        limiter.throttle_duration = config.throttle_duration();
        limiter
    }

    /// Add an exact-domain override
    #[must_use]
    pub fn with_domain_override(mut self, domain: &str, policy: RatePolicy) -> Self {
        self.domain_overrides.insert(domain.to_ascii_lowercase(), policy);
        self
    }

    /// Define a named domain class
    #[must_use]
    pub fn with_class(mut self, class: &str, policy: RatePolicy) -> Self {
        self.class_policies.insert(class.to_string(), policy);
        self
    }

    /// Configure the 429 throttle
    #[must_use]
    pub fn with_throttle(mut self, factor: f64, duration: Duration) -> Self {
        self.throttle_factor = factor;
        self.throttle_duration = duration;
        self
    }

    /// Put `domain` in `class` at runtime
    ///
    /// Any existing bucket is dropped so the next request picks up the new
    /// policy.
    pub fn assign_class(&self, domain: &str, class: &str) {
        let domain = domain.to_ascii_lowercase();
        self.class_assignments.insert(domain.clone(), class.to_string());
        self.buckets.remove(&domain);
    }

    /// Resolve the policy for a domain: exact override, then class, then default
    #[must_use]
    pub fn policy_for(&self, domain: &str) -> RatePolicy {
        if let Some(policy) = self.domain_overrides.get(domain) {
            return *policy;
        }
        if let Some(class) = self.class_assignments.get(domain)
            && let Some(policy) = self.class_policies.get(class.value())
        {
            return *policy;
        }
        self.default_policy
    }

    fn now_nanos(&self) -> u64 {
        u64::try_from(
            Instant::now()
                .saturating_duration_since(self.origin)
                .as_nanos(),
        )
        .unwrap_or(u64::MAX)
    }

    fn bucket(&self, domain: &str) -> Arc<TokenBucket> {
        self.buckets.get_or_insert_with(domain, || {
            TokenBucket::new(self.policy_for(domain), self.now_nanos())
        })
    }

    /// Non-blocking permit request for one dispatch to `domain`
    pub fn try_acquire(&self, domain: &str) -> RateLimitDecision {
        let decision = self.bucket(domain).try_consume_token(self.now_nanos());
        if let RateLimitDecision::Deny { retry_after } = decision {
            debug!("Rate limited {domain}, next token in {retry_after:?}");
        }
        decision
    }

    /// Temporarily reduce `domain`'s rate after a 429
    pub fn throttle(&self, domain: &str) {
        let now = self.now_nanos();
        let until = now.saturating_add(
            u64::try_from(self.throttle_duration.as_nanos()).unwrap_or(u64::MAX),
        );
        self.bucket(domain).throttle(self.throttle_factor, until, now);
        info!(
            "Throttling {domain} by {}x for {:?} after 429",
            self.throttle_factor, self.throttle_duration
        );
    }

    /// Tokens currently available for `domain`, if it has a bucket
    #[must_use]
    pub fn available_tokens(&self, domain: &str) -> Option<f64> {
        self.buckets.peek(domain).map(|b| b.available())
    }

    /// Whether a 429 throttle is active for `domain`
    #[must_use]
    pub fn is_throttled(&self, domain: &str) -> bool {
        self.buckets.peek(domain).is_some_and(|b| b.is_throttled())
    }

    /// Number of domains currently being tracked
    #[must_use]
    pub fn tracked_domain_count(&self) -> usize {
        self.buckets.len()
    }

    /// Clear all domain buckets
    pub fn clear(&self) {
        self.buckets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_deny() {
        let limiter = RateLimiter::new(RatePolicy::new(1.0, 3));
        for _ in 0..3 {
            assert_eq!(limiter.try_acquire("a.com"), RateLimitDecision::Allow);
        }
        match limiter.try_acquire("a.com") {
            RateLimitDecision::Deny { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(1));
            }
            RateLimitDecision::Allow => panic!("bucket should be empty"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_over_time() {
        let limiter = RateLimiter::new(RatePolicy::new(2.0, 1));
        assert!(limiter.try_acquire("a.com").is_allowed());
        assert!(!limiter.try_acquire("a.com").is_allowed());

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(!limiter.try_acquire("a.com").is_allowed());

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(limiter.try_acquire("a.com").is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_never_exceed_burst() {
        let limiter = RateLimiter::new(RatePolicy::new(100.0, 5));
        assert!(limiter.try_acquire("a.com").is_allowed());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.try_acquire("a.com").is_allowed());
        let available = limiter.available_tokens("a.com").expect("bucket exists");
        assert!((available - 4.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_domains_are_independent() {
        let limiter = RateLimiter::new(RatePolicy::new(1.0, 1));
        assert!(limiter.try_acquire("a.com").is_allowed());
        assert!(limiter.try_acquire("b.com").is_allowed());
        assert!(!limiter.try_acquire("a.com").is_allowed());
        assert!(!limiter.try_acquire("b.com").is_allowed());
    }

    #[test]
    fn test_policy_resolution_order() {
        let limiter = RateLimiter::new(RatePolicy::default())
            .with_class("small-site", RatePolicy::new(2.0, 5))
            .with_domain_override("big.com", RatePolicy::new(50.0, 100));

        limiter.assign_class("tiny.org", "small-site");
        limiter.assign_class("big.com", "small-site");

        assert_eq!(limiter.policy_for("tiny.org"), RatePolicy::new(2.0, 5));
        // exact override beats class
        assert_eq!(limiter.policy_for("big.com"), RatePolicy::new(50.0, 100));
        assert_eq!(limiter.policy_for("other.net"), RatePolicy::new(10.0, 20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_reduces_rate_then_restores() {
        let limiter = RateLimiter::new(RatePolicy::new(4.0, 4))
            .with_throttle(4.0, Duration::from_secs(10));
        assert!(limiter.try_acquire("a.com").is_allowed());

        limiter.throttle("a.com");
        assert!(limiter.is_throttled("a.com"));
        assert!(!limiter.try_acquire("a.com").is_allowed());

        // throttled rate is 1/s: half a second is not enough
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!limiter.try_acquire("a.com").is_allowed());
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.try_acquire("a.com").is_allowed());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.try_acquire("a.com").is_allowed());
        assert!(!limiter.is_throttled("a.com"));
    }

    #[test]
    fn test_concurrent_callers_never_overgrant() {
        // one token per ~17 minutes: only the initial burst can be handed out
        let limiter = Arc::new(RateLimiter::new(RatePolicy::new(0.001, 10)));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            handles.push(std::thread::spawn(move || {
                (0..50)
                    .filter(|_| limiter.try_acquire("hot.com").is_allowed())
                    .count()
            }));
        }
        let granted: usize = handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .sum();
        assert_eq!(granted, 10);
    }
}
