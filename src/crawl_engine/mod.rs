//! Crawl Engine Module
//!
//! This module contains the scheduling engine: the partitioned frontier, the
//! politeness controls (robots.txt, per-domain rate limits, circuit breaker),
//! retry routing and the worker loop that ties them together.

// Sub-modules
pub mod circuit_breaker;
pub mod crawl_types;
pub mod dead_letter;
pub mod dedup;
pub mod dispatcher;
pub mod domain_table;
pub mod fetch;
pub mod frontier;
pub mod ingest;
pub mod progress;
pub mod rate_limiter;
pub mod retry_policy;
pub mod robots;

// Re-export the scheduler
pub use dispatcher::Scheduler;

// Re-export core types
pub use crawl_types::{
    FailureReason, FetchOutcome, OutcomeClass, PriorityTier, SchedulerError, SchedulerResult,
    WorkItem,
};

// Re-export queue types
pub use frontier::{Completion, Frontier, FrontierCounters, Lease};

// Re-export politeness controls
pub use circuit_breaker::{CircuitBreaker, CircuitState, DomainHealth};
pub use rate_limiter::{RateLimitDecision, RateLimiter, RatePolicy};
pub use robots::{RobotsCache, RobotsFallback, RobotsRules, RobotsVerdict};

// Re-export dedup, retry and sinks
pub use dead_letter::{DeadLetterRecord, DeadLetterSink, JsonlDeadLetterSink, MemoryDeadLetterSink};
pub use dedup::{DedupMode, SeenSet};
pub use progress::{CheckpointSink, JsonCheckpointFile, LogCheckpoint, NoOpCheckpoint};
pub use retry_policy::{Disposition, FixedJitter, JitterSource, RandomJitter, RetryPolicy};

// Re-export collaborator boundaries
pub use fetch::{FetchError, FetchResponse, Fetcher, HttpFetcher};
pub use ingest::{
    Admission, FileSource, IngestReport, IngestionSource, Ingestor, UrlStream, VecSource,
};
