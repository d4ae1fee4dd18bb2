//! Core types for crawl scheduling.
//!
//! This module contains the fundamental types used throughout the scheduler
//! including the error type, the work item that flows through the queue, and
//! the failure taxonomy the retry policy routes on.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

use super::fetch::{FetchError, FetchResponse};
use crate::utils::NormalizedUrl;

/// Crate-level error type
///
/// Per-item fetch failures never surface as `SchedulerError`; they are turned
/// into queue or dead-letter transitions by the dispatcher. The variants here
/// are input rejections and resource faults that concern the operator.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Malformed or unsupported URL, discarded at ingestion
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Configuration rejected during validation or loading
    #[error("Configuration error: {0}")]
    Config(String),

    /// The queue could not accept or hand out work
    #[error("Queue storage failure: {0}")]
    QueueStorage(String),

    /// Shared cache unavailable
    #[error("Cache unavailable: {0}")]
    Cache(String),

    /// The dead-letter sink failed to persist a record
    #[error("Dead-letter sink failure: {0}")]
    DeadLetter(String),

    /// A worker task panicked or was aborted
    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for Result with `SchedulerError`
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Priority tiers, scanned in declaration order by the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    High,
    Normal,
    Low,
    /// Failed items waiting out their backoff
    Retry,
}

impl PriorityTier {
    /// All tiers in dequeue order
    pub const ALL: [PriorityTier; 4] = [Self::High, Self::Normal, Self::Low, Self::Retry];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
            Self::Retry => 3,
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Retry => "retry",
        };
        f.write_str(name)
    }
}

/// One candidate fetch
///
/// `attempt` never decreases. Items are owned by exactly one of ingestion,
/// the queue, a dispatching worker or the dead-letter sink at any time.
#[derive(Debug, Clone)]
pub struct WorkItem {
    url: NormalizedUrl,
    domain: String,
    pub tier: PriorityTier,
    attempt: u32,
    /// Not eligible for dispatch before this instant
    pub not_before: Instant,
    enqueued_at: Instant,
    /// Position in the ingestion source, when the item came from one
    source_offset: Option<u64>,
}

impl WorkItem {
    /// Create a fresh item, eligible immediately
    #[must_use]
    pub fn new(url: NormalizedUrl, tier: PriorityTier) -> Self {
        let now = Instant::now();
        let domain = url.domain().to_string();
        Self {
            url,
            domain,
            tier,
            attempt: 0,
            not_before: now,
            enqueued_at: now,
            source_offset: None,
        }
    }

    /// Tag the item with its position in the ingestion source
    #[must_use]
    pub fn with_source_offset(mut self, offset: u64) -> Self {
        self.source_offset = Some(offset);
        self
    }

    #[must_use]
    pub fn source_offset(&self) -> Option<u64> {
        self.source_offset
    }

    #[must_use]
    pub fn url(&self) -> &NormalizedUrl {
        &self.url
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Fetch attempts already made
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Record one more attempt; the count only moves forward
    pub fn record_attempt(&mut self) {
        self.attempt = self.attempt.saturating_add(1);
    }

    /// Time this item has spent in the system
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        Instant::now().saturating_duration_since(self.enqueued_at)
    }
}

/// Failure taxonomy reported to the dead-letter sink and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    /// Malformed input, discarded at ingestion
    InvalidUrl,
    /// Timeout, connection error or 5xx; retried with backoff
    TransientFetchError,
    /// 4xx other than 408/429, or an explicit robots disallow
    PermanentFetchError,
    /// Flow control; never penalized
    RateLimited,
    /// robots.txt could not be retrieved
    RobotsUnavailable,
}

impl FailureReason {
    /// Every reason, in declaration order
    pub const ALL: [Self; 5] = [
        Self::InvalidUrl,
        Self::TransientFetchError,
        Self::PermanentFetchError,
        Self::RateLimited,
        Self::RobotsUnavailable,
    ];

    /// Position in [`FailureReason::ALL`]
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidUrl => "InvalidURL",
            Self::TransientFetchError => "TransientFetchError",
            Self::PermanentFetchError => "PermanentFetchError",
            Self::RateLimited => "RateLimited",
            Self::RobotsUnavailable => "RobotsUnavailable",
        };
        f.write_str(name)
    }
}

/// What came back from one dispatch
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The server answered (any status)
    Response(FetchResponse),
    /// The fetch collaborator failed or was cancelled by timeout
    Failed(FetchError),
    /// robots.txt forbids the path
    RobotsDisallowed,
    /// robots.txt could not be retrieved and the fallback policy denies
    RobotsUnavailable,
}

/// Outcome as seen by the retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeClass {
    Success,
    /// Retry with backoff while the budget lasts
    Transient { detail: String, throttle: bool },
    /// Dead-letter immediately
    Permanent {
        reason: FailureReason,
        detail: String,
    },
}

impl FetchOutcome {
    /// Classify an outcome for retry decisions
    ///
    /// 2xx/3xx succeed. 5xx, 408 and 429 are transient (429 also asks for a
    /// throttle). Every other 4xx, robots denials and oversized bodies are
    /// permanent. Timeout, connection and TLS failures are transient.
    #[must_use]
    pub fn classify(&self) -> OutcomeClass {
        match self {
            Self::Response(resp) => match resp.status {
                200..=399 => OutcomeClass::Success,
                429 => OutcomeClass::Transient {
                    detail: "HTTP 429 Too Many Requests".to_string(),
                    throttle: true,
                },
                408 => OutcomeClass::Transient {
                    detail: "HTTP 408 Request Timeout".to_string(),
                    throttle: false,
                },
                500..=599 => OutcomeClass::Transient {
                    detail: format!("HTTP {}", resp.status),
                    throttle: false,
                },
                status => OutcomeClass::Permanent {
                    reason: FailureReason::PermanentFetchError,
                    detail: format!("HTTP {status}"),
                },
            },
            Self::Failed(err) if err.is_transient() => OutcomeClass::Transient {
                detail: err.to_string(),
                throttle: false,
            },
            Self::Failed(err) => OutcomeClass::Permanent {
                reason: FailureReason::PermanentFetchError,
                detail: err.to_string(),
            },
            Self::RobotsDisallowed => OutcomeClass::Permanent {
                reason: FailureReason::PermanentFetchError,
                detail: "disallowed by robots.txt".to_string(),
            },
            Self::RobotsUnavailable => OutcomeClass::Permanent {
                reason: FailureReason::RobotsUnavailable,
                detail: "robots.txt unavailable".to_string(),
            },
        }
    }

    /// Whether the outcome counts as a domain health failure
    ///
    /// Permanent 4xx responses, robots denials and oversized bodies say
    /// nothing about the host's health, so only transient failures feed the circuit breaker.
    #[must_use]
    pub fn is_domain_failure(&self) -> bool {
        matches!(self.classify(), OutcomeClass::Transient { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn response(status: u16) -> FetchOutcome {
        FetchOutcome::Response(FetchResponse {
            status,
            body: String::new(),
            elapsed_ms: 1,
        })
    }

    #[test]
    fn test_classify_statuses() {
        assert_eq!(response(200).classify(), OutcomeClass::Success);
        assert_eq!(response(301).classify(), OutcomeClass::Success);
        assert!(matches!(
            response(429).classify(),
            OutcomeClass::Transient { throttle: true, .. }
        ));
        assert!(matches!(
            response(408).classify(),
            OutcomeClass::Transient { throttle: false, .. }
        ));
        assert!(matches!(response(503).classify(), OutcomeClass::Transient { .. }));
        assert!(matches!(response(404).classify(), OutcomeClass::Permanent { .. }));
        assert!(matches!(response(403).classify(), OutcomeClass::Permanent { .. }));
    }

    #[test]
    fn test_classify_failures() {
        let timeout = FetchOutcome::Failed(FetchError::Timeout(Duration::from_secs(1)));
        assert!(matches!(timeout.classify(), OutcomeClass::Transient { .. }));
        assert!(timeout.is_domain_failure());
        assert!(matches!(
            FetchOutcome::RobotsDisallowed.classify(),
            OutcomeClass::Permanent {
                reason: FailureReason::PermanentFetchError,
                ..
            }
        ));
        assert!(matches!(
            FetchOutcome::RobotsUnavailable.classify(),
            OutcomeClass::Permanent {
                reason: FailureReason::RobotsUnavailable,
                ..
            }
        ));
        assert!(!response(404).is_domain_failure());
    }

    #[test]
    fn test_oversized_body_is_permanent() {
        let too_large = FetchOutcome::Failed(FetchError::ContentTooLarge { limit: 10 });
        assert!(matches!(
            too_large.classify(),
            OutcomeClass::Permanent {
                reason: FailureReason::PermanentFetchError,
                ..
            }
        ));
        assert!(!too_large.is_domain_failure());
    }

    #[test]
    fn test_attempt_is_monotonic() {
        let url = crate::utils::UrlNormalizer::default()
            .normalize("http://a.com/1")
            .expect("valid URL");
        let mut item = WorkItem::new(url, PriorityTier::Normal);
        assert_eq!(item.attempt(), 0);
        item.record_attempt();
        item.record_attempt();
        assert_eq!(item.attempt(), 2);
        assert_eq!(item.domain(), "a.com");
    }

    #[test]
    fn test_tier_order() {
        let mut tiers = vec![PriorityTier::Retry, PriorityTier::Low, PriorityTier::High];
        tiers.sort();
        assert_eq!(tiers, vec![PriorityTier::High, PriorityTier::Low, PriorityTier::Retry]);
        assert_eq!(PriorityTier::ALL[1], PriorityTier::Normal);
    }
}
