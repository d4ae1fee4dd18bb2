//! Retry and dead-letter routing for fetch outcomes
//!
//! Transient failures are retried with exponential backoff plus jitter until
//! the retry budget runs out; everything else that is not a success goes to
//! the dead-letter sink.

use log::debug;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::crawl_types::{FailureReason, FetchOutcome, OutcomeClass, PriorityTier, WorkItem};
use crate::config::SchedulerConfig;

/// Source of the random part of a backoff delay
pub trait JitterSource: Send + Sync {
    /// A delay in `[0, window]`
    fn jitter(&self, window: Duration) -> Duration;
}

/// Uniform jitter from the thread-local RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn jitter(&self, window: Duration) -> Duration {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        if window_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=window_ms))
    }
}

/// Constant jitter for reproducible schedules
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedJitter(pub Duration);

impl JitterSource for FixedJitter {
    fn jitter(&self, window: Duration) -> Duration {
        self.0.min(window)
    }
}

/// Where an item goes after its outcome
#[derive(Debug)]
pub enum Disposition {
    /// Success; nothing further to do
    Drop,
    /// Back into the queue on the RETRY tier
    Requeue(WorkItem),
    /// Terminal failure
    DeadLetter {
        item: WorkItem,
        reason: FailureReason,
        detail: String,
    },
}

pub struct RetryPolicy {
    max_retries: u32,
    backoff_base: Duration,
    jitter_window: Duration,
    backoff_max: Duration,
    jitter: Arc<dyn JitterSource>,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(
        max_retries: u32,
        backoff_base: Duration,
        jitter_window: Duration,
        backoff_max: Duration,
        jitter: Arc<dyn JitterSource>,
    ) -> Self {
        Self {
            max_retries,
            backoff_base,
            jitter_window,
            backoff_max,
            jitter,
        }
    }

    #[must_use]
    pub fn from_config(config: &SchedulerConfig, jitter: Arc<dyn JitterSource>) -> Self {
        Self::new(
            config.max_retries(),
            config.backoff_base(),
            config.backoff_jitter(),
            config.backoff_max(),
            jitter,
        )
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// `base * 2^attempt + jitter`, capped at the maximum backoff
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponential = self
            .backoff_base
            .checked_mul(2u32.saturating_pow(attempt.min(31)))
            .unwrap_or(self.backoff_max);
        exponential
            .saturating_add(self.jitter.jitter(self.jitter_window))
            .min(self.backoff_max)
    }

    /// Route one outcome
    ///
    /// `item.attempt()` counts the attempts made before this one; every
    /// outcome that involved a fetch adds one, so a dead-lettered item
    /// reports the total number of fetches made.
    pub fn on_outcome(&self, mut item: WorkItem, outcome: &FetchOutcome) -> Disposition {
        let fetched = !matches!(
            outcome,
            FetchOutcome::RobotsDisallowed | FetchOutcome::RobotsUnavailable
        );
        let prior_attempts = item.attempt();
        if fetched {
            item.record_attempt();
        }

        match outcome.classify() {
            OutcomeClass::Success => Disposition::Drop,
            OutcomeClass::Transient { detail, .. } if prior_attempts < self.max_retries => {
                let delay = self.backoff_for(item.attempt());
                item.tier = PriorityTier::Retry;
                item.not_before = Instant::now() + delay;
                debug!(
                    "Retrying {} (attempt {}/{}) in {:?}: {}",
                    item.url(),
                    item.attempt(),
                    self.max_retries,
                    delay,
                    detail
                );
                Disposition::Requeue(item)
            }
            OutcomeClass::Transient { detail, .. } => Disposition::DeadLetter {
                item,
                reason: FailureReason::TransientFetchError,
                detail: format!("retries exhausted: {detail}"),
            },
            OutcomeClass::Permanent { reason, detail } => Disposition::DeadLetter {
                item,
                reason,
                detail,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl_engine::fetch::{FetchError, FetchResponse};
    use crate::utils::UrlNormalizer;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_retries,
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(600),
            Arc::new(FixedJitter(Duration::from_millis(250))),
        )
    }

    fn item() -> WorkItem {
        let url = UrlNormalizer::default()
            .normalize("http://y.com/page")
            .expect("valid URL");
        WorkItem::new(url, PriorityTier::Normal)
    }

    fn timeout() -> FetchOutcome {
        FetchOutcome::Failed(FetchError::Timeout(Duration::from_secs(30)))
    }

    fn status(code: u16) -> FetchOutcome {
        FetchOutcome::Response(FetchResponse {
            status: code,
            body: String::new(),
            elapsed_ms: 1,
        })
    }

    #[test]
    fn test_backoff_is_deterministic_with_fixed_jitter() {
        let policy = policy(3);
        assert_eq!(policy.backoff_for(1), Duration::from_millis(2_250));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(4_250));
        assert_eq!(policy.backoff_for(30), Duration::from_secs(600));
    }

    #[test]
    fn test_random_jitter_stays_in_window() {
        for _ in 0..100 {
            assert!(RandomJitter.jitter(Duration::from_millis(50)) <= Duration::from_millis(50));
        }
        assert_eq!(RandomJitter.jitter(Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_drops() {
        assert!(matches!(policy(3).on_outcome(item(), &status(200)), Disposition::Drop));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_dead_letter() {
        let policy = policy(3);
        let mut current = item();
        for expected_attempt in 1..=3 {
            match policy.on_outcome(current, &timeout()) {
                Disposition::Requeue(next) => {
                    assert_eq!(next.attempt(), expected_attempt);
                    assert_eq!(next.tier, PriorityTier::Retry);
                    assert!(next.not_before > Instant::now());
                    current = next;
                }
                other => panic!("expected requeue, got {other:?}"),
            }
        }
        match policy.on_outcome(current, &timeout()) {
            Disposition::DeadLetter { item, reason, .. } => {
                assert_eq!(reason, FailureReason::TransientFetchError);
                assert_eq!(item.attempt(), 4);
            }
            other => panic!("expected dead letter, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delay_uses_incremented_attempt() {
        match policy(3).on_outcome(item(), &status(503)) {
            Disposition::Requeue(next) => {
                assert_eq!(next.not_before - Instant::now(), Duration::from_millis(2_250));
            }
            other => panic!("expected requeue, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failures_dead_letter_immediately() {
        match policy(3).on_outcome(item(), &status(404)) {
            Disposition::DeadLetter { item, reason, .. } => {
                assert_eq!(reason, FailureReason::PermanentFetchError);
                assert_eq!(item.attempt(), 1);
            }
            other => panic!("expected dead letter, got {other:?}"),
        }
        match policy(3).on_outcome(item(), &FetchOutcome::RobotsDisallowed) {
            Disposition::DeadLetter { item, reason, .. } => {
                assert_eq!(reason, FailureReason::PermanentFetchError);
                assert_eq!(item.attempt(), 0);
            }
            other => panic!("expected dead letter, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_robots_unavailable_dead_letters_with_its_reason() {
        match policy(3).on_outcome(item(), &FetchOutcome::RobotsUnavailable) {
            Disposition::DeadLetter { item, reason, .. } => {
                assert_eq!(reason, FailureReason::RobotsUnavailable);
                assert_eq!(item.attempt(), 0);
            }
            other => panic!("expected dead letter, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_body_is_not_retried() {
        let outcome = FetchOutcome::Failed(FetchError::ContentTooLarge { limit: 1024 });
        match policy(3).on_outcome(item(), &outcome) {
            Disposition::DeadLetter { item, reason, .. } => {
                assert_eq!(reason, FailureReason::PermanentFetchError);
                assert_eq!(item.attempt(), 1);
            }
            other => panic!("expected dead letter, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_response_is_retried() {
        assert!(matches!(
            policy(3).on_outcome(item(), &status(429)),
            Disposition::Requeue(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_dead_letters_first_failure() {
        assert!(matches!(
            policy(0).on_outcome(item(), &timeout()),
            Disposition::DeadLetter { .. }
        ));
    }
}
