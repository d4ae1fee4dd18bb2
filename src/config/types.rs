//! Core configuration types for the crawl scheduler
//!
//! This module contains the main `SchedulerConfig` struct. Every field has a
//! default, so a JSON file only needs to name what it changes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::crawl_engine::{DedupMode, RatePolicy, RobotsFallback};
use crate::utils::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_JITTER_MS, DEFAULT_BACKOFF_MAX_MS,
    DEFAULT_BREAKER_COOLDOWN_SECS, DEFAULT_BREAKER_MAX_COOLDOWN_SECS, DEFAULT_BREAKER_THRESHOLD,
    DEFAULT_BURST_SIZE, DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_DOMAIN_CACHE_CAPACITY,
    DEFAULT_EVENT_BUS_CAPACITY, DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_IDLE_POLL_MS,
    DEFAULT_MAX_CONTENT_LENGTH, DEFAULT_MAX_RETRIES, DEFAULT_QUEUE_SHARDS,
    DEFAULT_RATE_PER_SECOND, DEFAULT_ROBOTS_TTL_SECS, DEFAULT_THROTTLE_DURATION_SECS,
    DEFAULT_THROTTLE_FACTOR, DEFAULT_TRACKING_PARAMS, DEFAULT_USER_AGENT,
};

/// Main configuration struct for the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Requests per second for domains without an override
    pub(crate) default_rate: f64,
    pub(crate) default_burst: u32,

    /// Exact-domain rate policies; win over classes
    pub(crate) per_domain_overrides: HashMap<String, RatePolicy>,

    /// Named rate policies, e.g. `"small-site": {rate 2, burst 5}`
    pub(crate) domain_classes: HashMap<String, RatePolicy>,

    /// Domain to class name
    pub(crate) class_assignments: HashMap<String, String>,

    /// Retries after the first attempt for transient failures
    ///
    /// Default: 3
    pub(crate) max_retries: u32,

    /// Delay before retry N is `backoff_base * 2^N + jitter`
    pub(crate) backoff_base_ms: u64,
    pub(crate) backoff_jitter_ms: u64,
    pub(crate) backoff_max_ms: u64,

    pub(crate) robots_ttl_secs: u64,

    /// What a 401/403 on robots.txt means
    ///
    /// Default: allow all. Many sites answer 401/403 for every unknown path,
    /// robots.txt included, while serving pages normally.
    pub(crate) robots_unauthorized_policy: RobotsFallback,

    /// What an unreachable robots.txt (timeout, connection error, 5xx) means
    ///
    /// Default: allow all
    pub(crate) robots_unavailable_policy: RobotsFallback,

    /// Space dispatches to a domain by its robots.txt `Crawl-delay`
    pub(crate) respect_crawl_delay: bool,

    /// Consecutive failures before a domain's circuit opens
    ///
    /// Default: 10
    pub(crate) breaker_threshold: u32,

    /// First cooldown; doubles on each repeated trip
    pub(crate) breaker_cooldown_secs: u64,
    pub(crate) breaker_max_cooldown_secs: u64,

    /// Divisor applied to a domain's rate after a 429
    pub(crate) throttle_factor: f64,
    pub(crate) throttle_duration_secs: u64,

    pub(crate) dedup_mode: DedupMode,

    pub(crate) user_agent: String,

    /// Per-fetch timeout; an expired fetch is cancelled and retried
    ///
    /// Default: 30 seconds
    pub(crate) fetch_timeout_secs: u64,

    /// Body cap for `HttpFetcher`
    pub(crate) max_content_length: usize,

    /// Concurrent workers; `None` means one per CPU
    pub(crate) worker_count: Option<usize>,

    /// Longest sleep of an idle worker between queue polls
    pub(crate) idle_poll_ms: u64,

    /// Completions between checkpoints
    ///
    /// Default: 1000
    pub(crate) checkpoint_interval: u64,

    pub(crate) queue_shards: usize,

    /// Domains whose rate-limit and robots state stay in memory
    pub(crate) domain_cache_capacity: usize,

    /// Query parameters stripped during normalization; `utm_` style entries
    /// are prefixes
    pub(crate) tracking_params_deny: Vec<String>,

    /// Query parameters kept even when the deny list matches them
    pub(crate) tracking_params_allow: Vec<String>,

    pub(crate) event_bus_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_rate: DEFAULT_RATE_PER_SECOND,
            default_burst: DEFAULT_BURST_SIZE,
            per_domain_overrides: HashMap::new(),
            domain_classes: HashMap::new(),
            class_assignments: HashMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_jitter_ms: DEFAULT_BACKOFF_JITTER_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            robots_ttl_secs: DEFAULT_ROBOTS_TTL_SECS,
            robots_unauthorized_policy: RobotsFallback::AllowAll,
            robots_unavailable_policy: RobotsFallback::AllowAll,
            respect_crawl_delay: true,
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            breaker_cooldown_secs: DEFAULT_BREAKER_COOLDOWN_SECS,
            breaker_max_cooldown_secs: DEFAULT_BREAKER_MAX_COOLDOWN_SECS,
            throttle_factor: DEFAULT_THROTTLE_FACTOR,
            throttle_duration_secs: DEFAULT_THROTTLE_DURATION_SECS,
            dedup_mode: DedupMode::Exact,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            worker_count: None,
            idle_poll_ms: DEFAULT_IDLE_POLL_MS,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            queue_shards: DEFAULT_QUEUE_SHARDS,
            domain_cache_capacity: DEFAULT_DOMAIN_CACHE_CAPACITY,
            tracking_params_deny: DEFAULT_TRACKING_PARAMS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            tracking_params_allow: Vec::new(),
            event_bus_capacity: DEFAULT_EVENT_BUS_CAPACITY,
        }
    }
}
