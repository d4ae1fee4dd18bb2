//! Event type definitions for the scheduler event system
//!
//! Events describe scheduling decisions as they happen: dispatches, retries,
//! dead letters and the politeness controls that held work back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::crawl_engine::{FailureReason, FrontierCounters, PriorityTier};

/// Reason for event bus shutdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownReason {
    /// Queue drained
    Drained,
    /// Stopped by the operator
    Cancelled,
    /// A resource fault stopped the scheduler
    Error(String),
}

/// Events emitted by the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SchedulerEvent {
    /// Workers started
    SchedulerStarted {
        workers: usize,
        timestamp: DateTime<Utc>,
    },
    /// A new URL was admitted to the queue
    UrlIngested {
        url: String,
        tier: PriorityTier,
        timestamp: DateTime<Utc>,
    },
    /// A raw URL was rejected at ingestion
    UrlRejected {
        raw: String,
        reason: FailureReason,
        detail: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker handed an item to the fetch collaborator
    Dispatched {
        url: String,
        domain: String,
        attempt: u32,
        worker: usize,
        timestamp: DateTime<Utc>,
    },
    FetchSucceeded {
        url: String,
        status: u16,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A transient failure was scheduled for another attempt
    RetryScheduled {
        url: String,
        attempt: u32,
        delay: Duration,
        timestamp: DateTime<Utc>,
    },
    DeadLettered {
        url: String,
        reason: FailureReason,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    /// No token was available; the domain is deferred
    RateLimited {
        domain: String,
        retry_after: Duration,
        timestamp: DateTime<Utc>,
    },
    /// A 429 reduced the domain's rate
    DomainThrottled {
        domain: String,
        timestamp: DateTime<Utc>,
    },
    BreakerOpened {
        domain: String,
        cooldown: Duration,
        timestamp: DateTime<Utc>,
    },
    /// Progress snapshot taken every `checkpoint_interval` completions
    Checkpoint {
        counters: FrontierCounters,
        timestamp: DateTime<Utc>,
    },
    /// Signals that the event bus is shutting down
    ///
    /// Subscribers should exit their event loops when receiving this event.
    Shutdown {
        reason: ShutdownReason,
        timestamp: DateTime<Utc>,
    },
}

/// Helper functions for creating common events
impl SchedulerEvent {
    #[must_use]
    pub fn scheduler_started(workers: usize) -> Self {
        Self::SchedulerStarted {
            workers,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn url_ingested(url: String, tier: PriorityTier) -> Self {
        Self::UrlIngested {
            url,
            tier,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn url_rejected(raw: String, reason: FailureReason, detail: String) -> Self {
        Self::UrlRejected {
            raw,
            reason,
            detail,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn dispatched(url: String, domain: String, attempt: u32, worker: usize) -> Self {
        Self::Dispatched {
            url,
            domain,
            attempt,
            worker,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn fetch_succeeded(url: String, status: u16, elapsed_ms: u64) -> Self {
        Self::FetchSucceeded {
            url,
            status,
            elapsed_ms,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn retry_scheduled(url: String, attempt: u32, delay: Duration) -> Self {
        Self::RetryScheduled {
            url,
            attempt,
            delay,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn dead_lettered(url: String, reason: FailureReason, attempts: u32) -> Self {
        Self::DeadLettered {
            url,
            reason,
            attempts,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn rate_limited(domain: String, retry_after: Duration) -> Self {
        Self::RateLimited {
            domain,
            retry_after,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn domain_throttled(domain: String) -> Self {
        Self::DomainThrottled {
            domain,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn breaker_opened(domain: String, cooldown: Duration) -> Self {
        Self::BreakerOpened {
            domain,
            cooldown,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn checkpoint(counters: FrontierCounters) -> Self {
        Self::Checkpoint {
            counters,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn shutdown(reason: ShutdownReason) -> Self {
        Self::Shutdown {
            reason,
            timestamp: Utc::now(),
        }
    }
}
