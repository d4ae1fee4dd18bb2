//! Circuit breaker pattern for domain-level failure detection
//!
//! This module implements the circuit breaker pattern to detect consistently
//! failing domains and suspend dispatch to them for a cooldown, saving
//! wasted attempts and sparing the target site. Queued items are never
//! discarded; the queue simply skips the domain while its circuit is open.
//!
//! The circuit breaker tracks domain health across three states:
//! - Closed: Normal operation, requests proceed
//! - Open: Too many failures, requests are blocked until `open_until`
//! - `HalfOpen`: Cooldown elapsed; the next failure re-opens the circuit
//!   with a doubled cooldown, the next success closes it

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::domain_table::DomainTable;
use crate::config::SchedulerConfig;
use crate::utils::{
    DEFAULT_BREAKER_COOLDOWN_SECS, DEFAULT_BREAKER_MAX_COOLDOWN_SECS, DEFAULT_BREAKER_THRESHOLD,
    DEFAULT_DOMAIN_CACHE_CAPACITY, DEFAULT_QUEUE_SHARDS,
};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests proceed
    Closed,
    /// Cooldown over, waiting for the next outcome
    HalfOpen,
    /// Failing - skip dispatch until the cooldown elapses
    Open,
}

/// Health tracking for a single domain
#[derive(Debug, Clone)]
pub struct DomainHealth {
    /// Number of consecutive failures without success
    pub consecutive_failures: u32,
    /// Total number of outcomes recorded
    pub total_attempts: u32,
    /// Total number of successful requests
    pub total_successes: u32,
    /// Last time we had a successful request
    pub last_success: Option<Instant>,
    /// Dispatch is suspended until this instant; always in the future when set
    pub open_until: Option<Instant>,
    /// Trips since the last success, drives cooldown doubling
    pub trips: u32,
    /// Current circuit breaker state
    pub state: CircuitState,
}

impl DomainHealth {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            total_attempts: 0,
            total_successes: 0,
            last_success: None,
            open_until: None,
            trips: 0,
            state: CircuitState::Closed,
        }
    }

    /// Move Open to `HalfOpen` once the deadline has passed
    fn refresh(&mut self, now: Instant, domain: &str) {
        if self.state == CircuitState::Open
            && let Some(until) = self.open_until
            && now >= until
        {
            self.state = CircuitState::HalfOpen;
            self.open_until = None;
            info!("Circuit breaker transitioning to HALF-OPEN for domain: {domain}");
        }
    }
}

/// Circuit breaker for tracking domain health and preventing wasted attempts
///
/// Health is kept per domain in a bounded LRU table; a domain evicted while
/// idle comes back closed with no failure history.
pub struct CircuitBreaker {
    /// Health tracking for each domain
    domains: DomainTable<Mutex<DomainHealth>>,
    /// Number of consecutive failures before opening circuit
    failure_threshold: u32,
    /// Cooldown of the first trip
    base_cooldown: Duration,
    /// Upper bound for the doubled cooldown
    max_cooldown: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(
            DEFAULT_BREAKER_THRESHOLD,
            Duration::from_secs(DEFAULT_BREAKER_COOLDOWN_SECS),
            Duration::from_secs(DEFAULT_BREAKER_MAX_COOLDOWN_SECS),
        )
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    ///
    /// # Arguments
    /// * `failure_threshold` - Open circuit after this many consecutive failures
    /// * `base_cooldown` - Suspension after the first trip
    /// * `max_cooldown` - Cap for the cooldown, which doubles on repeated trips
    #[must_use]
    pub fn new(failure_threshold: u32, base_cooldown: Duration, max_cooldown: Duration) -> Self {
        Self::with_capacity(
            failure_threshold,
            base_cooldown,
            max_cooldown,
            DEFAULT_DOMAIN_CACHE_CAPACITY,
            DEFAULT_QUEUE_SHARDS,
        )
    }

    /// Create a breaker tracking roughly `capacity` domains over `shards`
    #[must_use]
    pub fn with_capacity(
        failure_threshold: u32,
        base_cooldown: Duration,
        max_cooldown: Duration,
        capacity: usize,
        shards: usize,
    ) -> Self {
        Self {
            domains: DomainTable::new(capacity, shards),
            failure_threshold: failure_threshold.max(1),
            base_cooldown,
            max_cooldown: max_cooldown.max(base_cooldown),
        }
    }

    /// Build a breaker from the scheduler configuration
    #[must_use]
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::with_capacity(
            config.breaker_threshold(),
            config.breaker_cooldown(),
            config.breaker_max_cooldown(),
            config.domain_cache_capacity(),
            config.queue_shards(),
        )
    }

    fn health(&self, domain: &str) -> Arc<Mutex<DomainHealth>> {
        self.domains
            .get_or_insert_with(domain, || Mutex::new(DomainHealth::new()))
    }

    /// Whether dispatch to `domain` is currently suspended
    pub fn is_open(&self, domain: &str) -> bool {
        let Some(health) = self.domains.peek(domain) else {
            return false;
        };
        let mut health = health.lock();
        health.refresh(Instant::now(), domain);
        health.state == CircuitState::Open
    }

    /// Deadline of the current suspension, if any
    pub fn open_until(&self, domain: &str) -> Option<Instant> {
        let health = self.domains.peek(domain)?;
        let mut health = health.lock();
        health.refresh(Instant::now(), domain);
        health.open_until
    }

    /// Record one fetch outcome for `domain`
    ///
    /// Returns the new suspension deadline when this outcome trips the breaker.
    pub fn record_outcome(&self, domain: &str, success: bool) -> Option<Instant> {
        if success {
            self.record_success(domain);
            None
        } else {
            self.record_failure(domain, "fetch failed")
        }
    }

    /// Record a successful request to a domain
    ///
    /// Resets the consecutive failure count and clears any suspension.
    pub fn record_success(&self, domain: &str) {
        let health = self.health(domain);
        let mut health = health.lock();

        health.consecutive_failures = 0;
        health.total_successes += 1;
        health.total_attempts += 1;
        health.last_success = Some(Instant::now());
        health.trips = 0;
        health.open_until = None;

        if health.state != CircuitState::Closed {
            health.state = CircuitState::Closed;
            info!("Circuit breaker CLOSED for domain: {domain}");
        }
    }

    /// Record a failed request to a domain
    ///
    /// Increments the failure count and opens the circuit once the threshold
    /// is reached. Returns the suspension deadline when the circuit opens.
    pub fn record_failure(&self, domain: &str, error: &str) -> Option<Instant> {
        let now = Instant::now();
        let health = self.health(domain);
        let mut health = health.lock();

        health.refresh(now, domain);
        health.consecutive_failures += 1;
        health.total_attempts += 1;

        if health.consecutive_failures >= self.failure_threshold
            && health.state != CircuitState::Open
        {
            let cooldown = self.cooldown_for_trip(health.trips);
            let until = now + cooldown;
            health.trips += 1;
            health.state = CircuitState::Open;
            health.open_until = Some(until);
            warn!(
                "Circuit breaker OPEN for domain {} after {} consecutive failures (cooldown {:?}). Last error: {}",
                domain, health.consecutive_failures, cooldown, error
            );
            return Some(until);
        }

        if health.state != CircuitState::Open {
            debug!(
                "Circuit breaker failure for domain: {} ({}/{}): {}",
                domain, health.consecutive_failures, self.failure_threshold, error
            );
        }
        None
    }

    /// `base * 2^trips`, capped
    fn cooldown_for_trip(&self, trips: u32) -> Duration {
        let factor = 2u32.saturating_pow(trips.min(16));
        self.base_cooldown
            .checked_mul(factor)
            .unwrap_or(self.max_cooldown)
            .min(self.max_cooldown)
    }

    /// Get health statistics for a domain
    ///
    /// Returns None if the domain has not been seen yet or was evicted.
    #[must_use]
    pub fn get_health(&self, domain: &str) -> Option<DomainHealth> {
        self.domains.peek(domain).map(|h| h.lock().clone())
    }

    /// Get list of domains currently in Open state
    #[must_use]
    pub fn get_open_domains(&self) -> Vec<String> {
        let now = Instant::now();
        self.domains
            .entries()
            .into_iter()
            .filter(|(_, health)| {
                let health = health.lock();
                health.state == CircuitState::Open
                    && health.open_until.is_some_and(|until| until > now)
            })
            .map(|(domain, _)| domain)
            .collect()
    }

    /// Get count of domains in each state (closed, half-open, open)
    #[must_use]
    pub fn state_counts(&self) -> (usize, usize, usize) {
        let mut closed = 0;
        let mut half_open = 0;
        let mut open = 0;

        for (_, health) in self.domains.entries() {
            match health.lock().state {
                CircuitState::Closed => closed += 1,
                CircuitState::HalfOpen => half_open += 1,
                CircuitState::Open => open += 1,
            }
        }

        (closed, half_open, open)
    }

    /// Number of domains whose health is currently held
    #[must_use]
    pub fn tracked_domain_count(&self) -> usize {
        self.domains.len()
    }
}
