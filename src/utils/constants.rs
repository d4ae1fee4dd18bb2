//! Shared configuration constants for the crawl scheduler
//!
//! This module contains default values and configuration constants used
//! throughout the codebase to ensure consistency and avoid magic numbers.

/// Default per-domain rate: 10 requests per second
///
/// Applied to every domain that has neither an exact-domain override nor a
/// domain-class override.
pub const DEFAULT_RATE_PER_SECOND: f64 = 10.0;

/// Default per-domain burst: 20 permits
///
/// Maximum number of tokens a domain bucket can hold. A freshly seen domain
/// starts with a full bucket.
pub const DEFAULT_BURST_SIZE: u32 = 20;

/// Default retry budget for transient fetch failures
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay for exponential retry backoff: 1 second
///
/// Delay before retry N is `base * 2^N + jitter`.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;

/// Upper bound of the uniform jitter added to every backoff: 1 second
pub const DEFAULT_BACKOFF_JITTER_MS: u64 = 1_000;

/// Cap on a single backoff delay: 10 minutes
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 600_000;

/// robots.txt cache lifetime: 1 hour
pub const DEFAULT_ROBOTS_TTL_SECS: u64 = 3_600;

/// Consecutive failures before a domain's circuit opens
pub const DEFAULT_BREAKER_THRESHOLD: u32 = 10;

/// First cooldown after a circuit opens: 60 seconds
///
/// Each further trip without an intervening success doubles the cooldown
/// up to `DEFAULT_BREAKER_MAX_COOLDOWN_SECS`.
pub const DEFAULT_BREAKER_COOLDOWN_SECS: u64 = 60;

/// Cap on the doubled breaker cooldown: 16 minutes
pub const DEFAULT_BREAKER_MAX_COOLDOWN_SECS: u64 = 960;

/// Divisor applied to a domain's rate after a 429 response
pub const DEFAULT_THROTTLE_FACTOR: f64 = 4.0;

/// How long a 429 throttle stays in effect: 5 minutes
pub const DEFAULT_THROTTLE_DURATION_SECS: u64 = 300;

/// Fetch timeout: 30 seconds
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Maximum response body accepted by `HttpFetcher`: 10 MB
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 10_000_000;

/// Completions between two progress checkpoints
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 1_000;

/// Longest time an idle worker sleeps before polling the queue again
pub const DEFAULT_IDLE_POLL_MS: u64 = 500;

/// Number of queue shards (domains are assigned to shards by hash)
pub const DEFAULT_QUEUE_SHARDS: usize = 64;

/// Maximum number of domains whose bucket, breaker, robots and metrics
/// state is kept in memory
pub const DEFAULT_DOMAIN_CACHE_CAPACITY: usize = 100_000;

/// Expected item count used to size the probabilistic seen-set
pub const DEFAULT_BLOOM_EXPECTED_ITEMS: usize = 10_000_000;

/// Target false positive rate of the probabilistic seen-set
pub const DEFAULT_BLOOM_FALSE_POSITIVE_RATE: f64 = 0.001;

/// Buffered events before the oldest are dropped by the event bus
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 1_024;

/// Crawler user agent, also used as the robots.txt agent token
pub const DEFAULT_USER_AGENT: &str = "WebCrawler/1.0 (SEO Metadata Extractor)";

/// Query parameters removed during normalization unless explicitly allowed
///
/// Entries ending in `_` are prefixes (`utm_` strips `utm_source`,
/// `utm_medium`, ...).
pub const DEFAULT_TRACKING_PARAMS: &[&str] = &[
    "utm_", "gclid", "fbclid", "dclid", "msclkid", "mc_cid", "mc_eid", "_ga", "_hsenc", "_hsmi",
    "yclid", "igshid", "ref_src",
];
