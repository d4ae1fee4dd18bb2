use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::crawl_engine::FailureReason;
use crate::utils::DEFAULT_DOMAIN_CACHE_CAPACITY;

/// Metrics for event bus operations using lock-free atomic operations.
///
/// All counters use `Ordering::SeqCst` for sequential consistency,
/// ensuring snapshot reads are coherent across all fields.
#[derive(Debug, Clone)]
pub struct EventBusMetrics {
    pub events_published: Arc<AtomicU64>,
    pub events_dropped: Arc<AtomicU64>,
    pub active_subscribers: Arc<AtomicUsize>,
    pub peak_subscribers: Arc<AtomicUsize>,
}

impl EventBusMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events_published: Arc::new(AtomicU64::new(0)),
            events_dropped: Arc::new(AtomicU64::new(0)),
            active_subscribers: Arc::new(AtomicUsize::new(0)),
            peak_subscribers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn increment_published(&self) {
        self.events_published.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn update_subscriber_count(&self, count: usize) {
        self.active_subscribers.store(count, Ordering::SeqCst);
        let _ = self.peak_subscribers.fetch_max(count, Ordering::SeqCst);
    }

    #[must_use]
    pub fn snapshot(&self) -> BusMetricsSnapshot {
        BusMetricsSnapshot {
            events_published: self.events_published.load(Ordering::SeqCst),
            events_dropped: self.events_dropped.load(Ordering::SeqCst),
            active_subscribers: self.active_subscribers.load(Ordering::SeqCst),
            peak_subscribers: self.peak_subscribers.load(Ordering::SeqCst),
        }
    }
}

impl Default for EventBusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BusMetricsSnapshot {
    pub events_published: u64,
    pub events_dropped: u64,
    pub active_subscribers: usize,
    pub peak_subscribers: usize,
}

/// Scheduler counters
///
/// Counters are independent atomics; a snapshot taken while workers run is
/// not a consistent cut across fields. Per-domain rejection counts keep only
/// the most recently rate-limited domains. Every failure is also counted
/// under its [`FailureReason`].
#[derive(Debug)]
pub struct SchedulerMetrics {
    ingested: AtomicU64,
    duplicates: AtomicU64,
    invalid_urls: AtomicU64,
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    robots_disallowed: AtomicU64,
    rate_limit_rejections: AtomicU64,
    breaker_trips: AtomicU64,
    throttles: AtomicU64,
    failures: [AtomicU64; FailureReason::ALL.len()],
    rate_limit_by_domain: Mutex<LruCache<String, u64>>,
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::with_domain_capacity(DEFAULT_DOMAIN_CACHE_CAPACITY)
    }
}

impl SchedulerMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track per-domain rejection counts for at most `capacity` domains
    #[must_use]
    pub fn with_domain_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ingested: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            invalid_urls: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            robots_disallowed: AtomicU64::new(0),
            rate_limit_rejections: AtomicU64::new(0),
            breaker_trips: AtomicU64::new(0),
            throttles: AtomicU64::new(0),
            failures: std::array::from_fn(|_| AtomicU64::new(0)),
            rate_limit_by_domain: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn record_ingested(&self) {
        self.ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_url(&self) {
        self.invalid_urls.fetch_add(1, Ordering::Relaxed);
        self.record_failure(FailureReason::InvalidUrl);
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self, reason: FailureReason) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        self.record_failure(reason);
    }

    fn record_failure(&self, reason: FailureReason) {
        self.failures[reason.index()].fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn failures_for(&self, reason: FailureReason) -> u64 {
        self.failures[reason.index()].load(Ordering::Relaxed)
    }

    pub fn record_robots_disallowed(&self) {
        self.robots_disallowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_breaker_trip(&self) {
        self.breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttle(&self) {
        self.throttles.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a denied token acquisition, globally and for `domain`
    pub fn record_rate_limited(&self, domain: &str) {
        self.rate_limit_rejections.fetch_add(1, Ordering::Relaxed);
        self.record_failure(FailureReason::RateLimited);
        let mut by_domain = self.rate_limit_by_domain.lock();
        if let Some(count) = by_domain.get_mut(domain) {
            *count += 1;
        } else {
            by_domain.put(domain.to_string(), 1);
        }
    }

    #[must_use]
    pub fn rate_limit_rejections_for(&self, domain: &str) -> u64 {
        self.rate_limit_by_domain
            .lock()
            .peek(domain)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        SchedulerMetricsSnapshot {
            ingested: self.ingested.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            invalid_urls: self.invalid_urls.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            robots_disallowed: self.robots_disallowed.load(Ordering::Relaxed),
            rate_limit_rejections: self.rate_limit_rejections.load(Ordering::Relaxed),
            breaker_trips: self.breaker_trips.load(Ordering::Relaxed),
            throttles: self.throttles.load(Ordering::Relaxed),
            failures_by_reason: FailureReason::ALL
                .iter()
                .map(|&reason| (reason.to_string(), self.failures_for(reason)))
                .filter(|&(_, count)| count > 0)
                .collect(),
            rate_limit_by_domain: self
                .rate_limit_by_domain
                .lock()
                .iter()
                .map(|(domain, count)| (domain.clone(), *count))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerMetricsSnapshot {
    pub ingested: u64,
    pub duplicates: u64,
    pub invalid_urls: u64,
    pub dispatched: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub robots_disallowed: u64,
    pub rate_limit_rejections: u64,
    pub breaker_trips: u64,
    pub throttles: u64,
    /// Non-zero failure counts keyed by reason name
    pub failures_by_reason: BTreeMap<String, u64>,
    pub rate_limit_by_domain: BTreeMap<String, u64>,
}

impl SchedulerMetricsSnapshot {
    /// Share of dispatches that ended in success
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.dispatched == 0 {
            return 1.0;
        }
        self.succeeded as f64 / self.dispatched as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_domain_rate_limit_counts() {
        let metrics = SchedulerMetrics::new();
        metrics.record_rate_limited("a.com");
        metrics.record_rate_limited("a.com");
        metrics.record_rate_limited("b.com");

        assert_eq!(metrics.rate_limit_rejections_for("a.com"), 2);
        assert_eq!(metrics.rate_limit_rejections_for("c.com"), 0);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rate_limit_rejections, 3);
        assert_eq!(snapshot.rate_limit_by_domain.get("b.com"), Some(&1));
    }

    #[test]
    fn test_per_domain_counts_are_bounded() {
        let metrics = SchedulerMetrics::with_domain_capacity(8);
        for i in 0..100 {
            metrics.record_rate_limited(&format!("d{i}.com"));
        }
        metrics.record_rate_limited("d99.com");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rate_limit_rejections, 101);
        assert_eq!(snapshot.rate_limit_by_domain.len(), 8);
        assert_eq!(metrics.rate_limit_rejections_for("d99.com"), 2);
        assert_eq!(metrics.rate_limit_rejections_for("d0.com"), 0);
    }

    #[test]
    fn test_failures_counted_by_reason() {
        let metrics = SchedulerMetrics::new();
        metrics.record_invalid_url();
        metrics.record_rate_limited("a.com");
        metrics.record_rate_limited("a.com");
        metrics.record_dead_lettered(FailureReason::RobotsUnavailable);
        metrics.record_dead_lettered(FailureReason::PermanentFetchError);

        assert_eq!(metrics.failures_for(FailureReason::RateLimited), 2);
        assert_eq!(metrics.failures_for(FailureReason::TransientFetchError), 0);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.dead_lettered, 2);
        assert_eq!(snapshot.failures_by_reason.get("InvalidURL"), Some(&1));
        assert_eq!(snapshot.failures_by_reason.get("RateLimited"), Some(&2));
        assert_eq!(snapshot.failures_by_reason.get("RobotsUnavailable"), Some(&1));
        assert_eq!(snapshot.failures_by_reason.get("PermanentFetchError"), Some(&1));
        assert!(!snapshot.failures_by_reason.contains_key("TransientFetchError"));
    }

    #[test]
    fn test_success_rate() {
        let metrics = SchedulerMetrics::new();
        assert!((metrics.snapshot().success_rate() - 1.0).abs() < f64::EPSILON);
        metrics.record_dispatched();
        metrics.record_dispatched();
        metrics.record_succeeded();
        assert!((metrics.snapshot().success_rate() - 0.5).abs() < f64::EPSILON);
    }
}
