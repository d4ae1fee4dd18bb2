//! Loading and validation for `SchedulerConfig`

use anyhow::{Context, Result};
use std::path::Path;

use super::types::SchedulerConfig;
use crate::crawl_engine::{DedupMode, RatePolicy, SchedulerError, SchedulerResult};

fn check_policy(name: &str, policy: &RatePolicy) -> SchedulerResult<()> {
    if !(policy.rate_per_second.is_finite() && policy.rate_per_second > 0.0) {
        return Err(SchedulerError::Config(format!(
            "{name}: rate_per_second must be positive, got {}",
            policy.rate_per_second
        )));
    }
    if policy.burst_size == 0 {
        return Err(SchedulerError::Config(format!(
            "{name}: burst_size must be at least 1"
        )));
    }
    Ok(())
}

impl SchedulerConfig {
    /// Load a configuration from a JSON file
    ///
    /// Fields missing from the file keep their defaults.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, is not valid JSON, or describes
    /// an invalid configuration.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Override the worker count, e.g. from the command line
    pub fn set_worker_count(&mut self, workers: usize) {
        self.worker_count = Some(workers);
    }

    /// Check every field for values the scheduler cannot run with
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Config` naming the first invalid field.
    pub fn validate(&self) -> SchedulerResult<()> {
        check_policy("default policy", &self.default_policy())?;
        for (domain, policy) in &self.per_domain_overrides {
            check_policy(domain, policy)?;
        }
        for (class, policy) in &self.domain_classes {
            check_policy(class, policy)?;
        }
        for (domain, class) in &self.class_assignments {
            if !self.domain_classes.contains_key(class) {
                return Err(SchedulerError::Config(format!(
                    "{domain} is assigned to undefined class '{class}'"
                )));
            }
        }

        if self.breaker_threshold == 0 {
            return Err(SchedulerError::Config(
                "breaker_threshold must be at least 1".to_string(),
            ));
        }
        if self.breaker_max_cooldown_secs < self.breaker_cooldown_secs {
            return Err(SchedulerError::Config(
                "breaker_max_cooldown_secs must not be below breaker_cooldown_secs".to_string(),
            ));
        }
        if !(self.throttle_factor.is_finite() && self.throttle_factor >= 1.0) {
            return Err(SchedulerError::Config(format!(
                "throttle_factor must be at least 1, got {}",
                self.throttle_factor
            )));
        }
        if let DedupMode::Probabilistic {
            expected_items,
            false_positive_rate,
        } = self.dedup_mode
        {
            if expected_items == 0 {
                return Err(SchedulerError::Config(
                    "dedup expected_items must be positive".to_string(),
                ));
            }
            if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
                return Err(SchedulerError::Config(format!(
                    "dedup false_positive_rate must be in (0, 1), got {false_positive_rate}"
                )));
            }
        }
        if self.fetch_timeout_secs == 0 {
            return Err(SchedulerError::Config(
                "fetch_timeout_secs must be positive".to_string(),
            ));
        }
        if self.queue_shards == 0 || self.domain_cache_capacity == 0 {
            return Err(SchedulerError::Config(
                "queue_shards and domain_cache_capacity must be positive".to_string(),
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(SchedulerError::Config(
                "checkpoint_interval must be positive".to_string(),
            ));
        }
        if self.worker_count == Some(0) {
            return Err(SchedulerError::Config(
                "worker_count must be positive".to_string(),
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(SchedulerError::Config("user_agent must not be empty".to_string()));
        }
        Ok(())
    }
}
