//! Fluent builder for `SchedulerConfig`
//!
//! Every field has a default, so the builder starts from
//! `SchedulerConfig::default()` and `build()` only validates.

use std::collections::HashMap;
use std::time::Duration;

use super::types::SchedulerConfig;
use crate::crawl_engine::{DedupMode, RatePolicy, RobotsFallback, SchedulerResult};

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfig {
    #[must_use]
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }
}

impl SchedulerConfigBuilder {
    /// Default rate for domains without an override
    #[must_use]
    pub fn default_policy(mut self, rate_per_second: f64, burst_size: u32) -> Self {
        self.config.default_rate = rate_per_second;
        self.config.default_burst = burst_size;
        self
    }

    #[must_use]
    pub fn domain_override(mut self, domain: impl Into<String>, policy: RatePolicy) -> Self {
        self.config
            .per_domain_overrides
            .insert(domain.into().to_lowercase(), policy);
        self
    }

    #[must_use]
    pub fn per_domain_overrides(mut self, overrides: HashMap<String, RatePolicy>) -> Self {
        self.config.per_domain_overrides = overrides
            .into_iter()
            .map(|(domain, policy)| (domain.to_lowercase(), policy))
            .collect();
        self
    }

    /// Define a named rate class
    #[must_use]
    pub fn domain_class(mut self, class: impl Into<String>, policy: RatePolicy) -> Self {
        self.config.domain_classes.insert(class.into(), policy);
        self
    }

    /// Put `domain` in the named class
    #[must_use]
    pub fn assign_class(mut self, domain: impl Into<String>, class: impl Into<String>) -> Self {
        self.config
            .class_assignments
            .insert(domain.into().to_lowercase(), class.into());
        self
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    #[must_use]
    pub fn backoff(mut self, base: Duration, jitter: Duration, max: Duration) -> Self {
        self.config.backoff_base_ms = millis(base);
        self.config.backoff_jitter_ms = millis(jitter);
        self.config.backoff_max_ms = millis(max);
        self
    }

    #[must_use]
    pub fn robots_ttl(mut self, ttl: Duration) -> Self {
        self.config.robots_ttl_secs = ttl.as_secs();
        self
    }

    #[must_use]
    pub fn robots_unauthorized_policy(mut self, policy: RobotsFallback) -> Self {
        self.config.robots_unauthorized_policy = policy;
        self
    }

    #[must_use]
    pub fn robots_unavailable_policy(mut self, policy: RobotsFallback) -> Self {
        self.config.robots_unavailable_policy = policy;
        self
    }

    #[must_use]
    pub fn respect_crawl_delay(mut self, respect: bool) -> Self {
        self.config.respect_crawl_delay = respect;
        self
    }

    /// Breaker threshold plus first and maximum cooldown
    #[must_use]
    pub fn breaker(mut self, threshold: u32, cooldown: Duration, max_cooldown: Duration) -> Self {
        self.config.breaker_threshold = threshold;
        self.config.breaker_cooldown_secs = cooldown.as_secs();
        self.config.breaker_max_cooldown_secs = max_cooldown.as_secs();
        self
    }

    #[must_use]
    pub fn throttle(mut self, factor: f64, duration: Duration) -> Self {
        self.config.throttle_factor = factor;
        self.config.throttle_duration_secs = duration.as_secs();
        self
    }

    #[must_use]
    pub fn dedup_mode(mut self, mode: DedupMode) -> Self {
        self.config.dedup_mode = mode;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout_secs = timeout.as_secs();
        self
    }

    #[must_use]
    pub fn max_content_length(mut self, bytes: usize) -> Self {
        self.config.max_content_length = bytes;
        self
    }

    #[must_use]
    pub fn worker_count(mut self, workers: usize) -> Self {
        self.config.worker_count = Some(workers);
        self
    }

    #[must_use]
    pub fn idle_poll_interval(mut self, interval: Duration) -> Self {
        self.config.idle_poll_ms = millis(interval);
        self
    }

    #[must_use]
    pub fn checkpoint_interval(mut self, completions: u64) -> Self {
        self.config.checkpoint_interval = completions;
        self
    }

    #[must_use]
    pub fn queue_shards(mut self, shards: usize) -> Self {
        self.config.queue_shards = shards;
        self
    }

    #[must_use]
    pub fn domain_cache_capacity(mut self, domains: usize) -> Self {
        self.config.domain_cache_capacity = domains;
        self
    }

    #[must_use]
    pub fn tracking_params(mut self, deny: Vec<String>, allow: Vec<String>) -> Self {
        self.config.tracking_params_deny = deny;
        self.config.tracking_params_allow = allow;
        self
    }

    #[must_use]
    pub fn event_bus_capacity(mut self, capacity: usize) -> Self {
        self.config.event_bus_capacity = capacity;
        self
    }

    /// Validate and return the configuration
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Config` naming the first invalid field.
    pub fn build(self) -> SchedulerResult<SchedulerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl_engine::SchedulerError;

    #[test]
    fn test_defaults_build() {
        let config = SchedulerConfig::builder().build().expect("defaults are valid");
        assert_eq!(config, SchedulerConfig::default());
        assert_eq!(config.max_retries(), 3);
        assert_eq!(config.breaker_threshold(), 10);
    }

    #[test]
    fn test_overrides_are_lowercased() {
        let config = SchedulerConfig::builder()
            .domain_override("X.COM", RatePolicy::new(1.0, 1))
            .assign_class("Blog.Example", "small-site")
            .domain_class("small-site", RatePolicy::new(2.0, 5))
            .build()
            .expect("valid");
        assert!(config.per_domain_overrides().contains_key("x.com"));
        assert_eq!(
            config.class_assignments().get("blog.example").map(String::as_str),
            Some("small-site")
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let zero_rate = SchedulerConfig::builder().default_policy(0.0, 5).build();
        assert!(matches!(zero_rate, Err(SchedulerError::Config(_))));

        let zero_burst = SchedulerConfig::builder()
            .domain_override("x.com", RatePolicy::new(1.0, 0))
            .build();
        assert!(matches!(zero_burst, Err(SchedulerError::Config(_))));

        let bad_fp = SchedulerConfig::builder()
            .dedup_mode(DedupMode::Probabilistic {
                expected_items: 1_000,
                false_positive_rate: 1.5,
            })
            .build();
        assert!(matches!(bad_fp, Err(SchedulerError::Config(_))));

        let unknown_class = SchedulerConfig::builder()
            .assign_class("a.com", "missing")
            .build();
        assert!(matches!(unknown_class, Err(SchedulerError::Config(_))));
    }
}
