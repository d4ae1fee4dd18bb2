//! Getter methods for `SchedulerConfig`
//!
//! Durations are stored as plain integers so config files stay readable;
//! the getters hand them out as `Duration`.

use std::collections::HashMap;
use std::time::Duration;

use super::types::SchedulerConfig;
use crate::crawl_engine::{DedupMode, RatePolicy, RobotsFallback};
use crate::utils::UrlNormalizer;

impl SchedulerConfig {
    #[must_use]
    pub fn default_policy(&self) -> RatePolicy {
        RatePolicy::new(self.default_rate, self.default_burst)
    }

    #[must_use]
    pub fn per_domain_overrides(&self) -> &HashMap<String, RatePolicy> {
        &self.per_domain_overrides
    }

    #[must_use]
    pub fn domain_classes(&self) -> &HashMap<String, RatePolicy> {
        &self.domain_classes
    }

    #[must_use]
    pub fn class_assignments(&self) -> &HashMap<String, String> {
        &self.class_assignments
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    #[must_use]
    pub fn backoff_jitter(&self) -> Duration {
        Duration::from_millis(self.backoff_jitter_ms)
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    #[must_use]
    pub fn robots_ttl(&self) -> Duration {
        Duration::from_secs(self.robots_ttl_secs)
    }

    #[must_use]
    pub fn robots_unauthorized_policy(&self) -> RobotsFallback {
        self.robots_unauthorized_policy
    }

    #[must_use]
    pub fn robots_unavailable_policy(&self) -> RobotsFallback {
        self.robots_unavailable_policy
    }

    #[must_use]
    pub fn respect_crawl_delay(&self) -> bool {
        self.respect_crawl_delay
    }

    #[must_use]
    pub fn breaker_threshold(&self) -> u32 {
        self.breaker_threshold
    }

    #[must_use]
    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }

    #[must_use]
    pub fn breaker_max_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_max_cooldown_secs)
    }

    #[must_use]
    pub fn throttle_factor(&self) -> f64 {
        self.throttle_factor
    }

    #[must_use]
    pub fn throttle_duration(&self) -> Duration {
        Duration::from_secs(self.throttle_duration_secs)
    }

    #[must_use]
    pub fn dedup_mode(&self) -> DedupMode {
        self.dedup_mode
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    #[must_use]
    pub fn max_content_length(&self) -> usize {
        self.max_content_length
    }

    /// Configured worker count, or one per CPU
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(num_cpus::get).max(1)
    }

    #[must_use]
    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    #[must_use]
    pub fn checkpoint_interval(&self) -> u64 {
        self.checkpoint_interval
    }

    #[must_use]
    pub fn queue_shards(&self) -> usize {
        self.queue_shards
    }

    #[must_use]
    pub fn domain_cache_capacity(&self) -> usize {
        self.domain_cache_capacity
    }

    #[must_use]
    pub fn tracking_params_deny(&self) -> &[String] {
        &self.tracking_params_deny
    }

    #[must_use]
    pub fn tracking_params_allow(&self) -> &[String] {
        &self.tracking_params_allow
    }

    /// URL normalizer honoring the tracking parameter lists
    #[must_use]
    pub fn normalizer(&self) -> UrlNormalizer {
        UrlNormalizer::new(
            self.tracking_params_deny.clone(),
            self.tracking_params_allow.clone(),
        )
    }

    #[must_use]
    pub fn event_bus_capacity(&self) -> usize {
        self.event_bus_capacity
    }
}
