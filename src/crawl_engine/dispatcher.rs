//! Worker loop
//!
//! Every worker runs `Idle → Selecting → Fetching → Idle`:
//!
//! - IDLE takes the next ready lease from the frontier, or waits for a queue
//!   change bounded by the next due item and the idle poll interval.
//! - SELECTING checks the circuit breaker, robots.txt and the rate limiter,
//!   in that order. Breaker and rate-limit denials hand the lease back
//!   untouched and defer the domain; a robots denial is dead-lettered.
//! - FETCHING calls the fetch collaborator under `fetch_timeout`, routes the
//!   outcome through the retry policy and updates breaker and throttle state.

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::circuit_breaker::CircuitBreaker;
use super::crawl_types::{
    FetchOutcome, OutcomeClass, PriorityTier, SchedulerError, SchedulerResult,
};
use super::dead_letter::{DeadLetterRecord, DeadLetterSink};
use super::dedup::SeenSet;
use super::fetch::{Fetcher, with_fetch_timeout};
use super::frontier::{Completion, Frontier, FrontierCounters, Lease};
use super::ingest::{Admission, IngestReport, IngestionSource, Ingestor};
use super::progress::{CheckpointSink, LogCheckpoint};
use super::rate_limiter::{RateLimitDecision, RateLimiter};
use super::retry_policy::{Disposition, JitterSource, RandomJitter, RetryPolicy};
use super::robots::{RobotsCache, RobotsVerdict};
use crate::config::SchedulerConfig;
use crate::crawl_events::{SchedulerEvent, SchedulerEventBus, SchedulerMetrics, ShutdownReason};

/// Shortest idle wait, keeps a worker from spinning on a due but blocked item
const MIN_IDLE_WAIT: Duration = Duration::from_millis(5);

/// The crawl scheduler
///
/// Owns the queue and every politeness control. Wrap it in an `Arc` to run
/// workers; ingestion may go on concurrently through the same handle.
pub struct Scheduler {
    config: SchedulerConfig,
    frontier: Arc<Frontier>,
    seen: Arc<SeenSet>,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    robots: RobotsCache,
    retry: RetryPolicy,
    fetcher: Arc<dyn Fetcher>,
    dead_letters: Arc<dyn DeadLetterSink>,
    checkpoints: Arc<dyn CheckpointSink>,
    checkpoint_lock: tokio::sync::Mutex<()>,
    events: SchedulerEventBus,
    metrics: Arc<SchedulerMetrics>,
    finished: AtomicU64,
    stopping: AtomicBool,
    stop: Notify,
}

impl Scheduler {
    /// Build a scheduler with random backoff jitter and log checkpoints
    #[must_use]
    pub fn new(
        config: SchedulerConfig,
        fetcher: Arc<dyn Fetcher>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self::with_jitter(config, fetcher, dead_letters, Arc::new(RandomJitter))
    }

    /// Build a scheduler with an explicit jitter source
    #[must_use]
    pub fn with_jitter(
        config: SchedulerConfig,
        fetcher: Arc<dyn Fetcher>,
        dead_letters: Arc<dyn DeadLetterSink>,
        jitter: Arc<dyn JitterSource>,
    ) -> Self {
        Self {
            frontier: Arc::new(Frontier::new(config.queue_shards())),
            seen: Arc::new(SeenSet::new(config.dedup_mode())),
            limiter: RateLimiter::from_config(&config),
            breaker: CircuitBreaker::from_config(&config),
            robots: RobotsCache::new(Arc::clone(&fetcher), &config),
            retry: RetryPolicy::from_config(&config, jitter),
            fetcher,
            dead_letters,
            checkpoints: Arc::new(LogCheckpoint),
            checkpoint_lock: tokio::sync::Mutex::new(()),
            events: SchedulerEventBus::new(config.event_bus_capacity()),
            metrics: Arc::new(SchedulerMetrics::with_domain_capacity(
                config.domain_cache_capacity(),
            )),
            finished: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
            stop: Notify::new(),
            config,
        }
    }

    /// Replace the checkpoint sink
    #[must_use]
    pub fn with_checkpoint_sink(mut self, sink: Arc<dyn CheckpointSink>) -> Self {
        self.checkpoints = sink;
        self
    }

    /// Ingestion resumes after this source offset; use the `committed_offset`
    /// of the last checkpoint
    #[must_use]
    pub fn resume_from(self, offset: u64) -> Self {
        self.frontier.set_ingested_offset(offset);
        self
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[must_use]
    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[must_use]
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    #[must_use]
    pub fn robots(&self) -> &RobotsCache {
        &self.robots
    }

    #[must_use]
    pub fn events(&self) -> &SchedulerEventBus {
        &self.events
    }

    #[must_use]
    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn counters(&self) -> FrontierCounters {
        self.frontier.counters()
    }

    fn ingestor(&self) -> Ingestor {
        Ingestor::new(
            self.config.normalizer(),
            Arc::clone(&self.seen),
            Arc::clone(&self.frontier),
            self.events.clone(),
            Arc::clone(&self.metrics),
        )
    }

    /// Offer a single URL
    pub fn submit(&self, raw: &str, tier: PriorityTier) -> Admission {
        self.ingestor().offer(raw, tier, None)
    }

    /// Consume `source` from `offset` into the queue
    ///
    /// # Errors
    ///
    /// Fails when the source cannot be opened or read.
    pub async fn ingest(
        &self,
        source: &dyn IngestionSource,
        offset: u64,
        tier: PriorityTier,
    ) -> SchedulerResult<IngestReport> {
        self.ingestor().ingest(source, offset, tier).await
    }

    /// Ask every worker to stop after its current item
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        self.stop.notify_waiters();
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Run workers until [`Scheduler::shutdown`] is called
    ///
    /// # Errors
    ///
    /// Returns the first resource fault hit by any worker; the remaining
    /// workers are stopped.
    pub async fn run(self: &Arc<Self>) -> SchedulerResult<FrontierCounters> {
        self.run_workers(false).await
    }

    /// Run workers until nothing is queued or in flight
    ///
    /// Items ingested while running are picked up, but a queue that drains
    /// before ingestion catches up ends the run.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::run`].
    pub async fn run_until_drained(self: &Arc<Self>) -> SchedulerResult<FrontierCounters> {
        self.run_workers(true).await
    }

    async fn run_workers(
        self: &Arc<Self>,
        until_drained: bool,
    ) -> SchedulerResult<FrontierCounters> {
        let workers = self.config.worker_count();
        info!(
            "Starting {workers} workers ({} queued)",
            self.frontier.len()
        );
        self.events.emit(SchedulerEvent::scheduler_started(workers));

        let mut tasks = FuturesUnordered::new();
        for id in 0..workers {
            let scheduler = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                scheduler.worker_loop(id, until_drained).await
            }));
        }

        let mut failure: Option<SchedulerError> = None;
        while let Some(joined) = tasks.next().await {
            let result = joined.unwrap_or_else(|e| Err(SchedulerError::Worker(e.to_string())));
            if let Err(e) = result
                && failure.is_none()
            {
                error!("Stopping scheduler: {e}");
                self.shutdown();
                failure = Some(e);
            }
        }

        let counters = self.frontier.counters();
        if let Some(e) = failure {
            self.events.shutdown(ShutdownReason::Error(e.to_string()));
            return Err(e);
        }

        if self.frontier.is_drained() {
            self.write_checkpoint(true).await;
            info!(
                "Queue drained: {} completed, {} dead-lettered",
                counters.completed, counters.dead_lettered
            );
            self.events.shutdown(ShutdownReason::Drained);
        } else {
            info!("Scheduler stopped with {} items queued", counters.pending);
            self.events.shutdown(ShutdownReason::Cancelled);
        }
        Ok(counters)
    }

    async fn worker_loop(self: Arc<Self>, id: usize, until_drained: bool) -> SchedulerResult<()> {
        tracing::debug!(worker = id, "worker started");
        loop {
            // Register for wakeups before looking, so a change between
            // the look and the wait is not missed
            let changed = self.frontier.notified();
            let stopped = self.stop.notified();
            tokio::pin!(changed);
            tokio::pin!(stopped);
            changed.as_mut().enable();
            stopped.as_mut().enable();

            if self.is_shutting_down() {
                break;
            }

            let lease = self
                .frontier
                .dequeue_ready(|domain| self.breaker.open_until(domain));
            if let Some(lease) = lease {
                self.dispatch(id, lease).await?;
                continue;
            }

            if until_drained && self.frontier.is_drained() {
                break;
            }

            let idle = self.config.idle_poll_interval();
            let wait = self
                .frontier
                .next_ready_at()
                .map_or(idle, |at| at.saturating_duration_since(Instant::now()).min(idle))
                .max(MIN_IDLE_WAIT);
            tokio::select! {
                () = &mut changed => {}
                () = &mut stopped => {}
                () = tokio::time::sleep(wait) => {}
            }
        }
        tracing::debug!(worker = id, "worker stopped");
        Ok(())
    }

    /// SELECTING then FETCHING for one lease
    async fn dispatch(&self, worker: usize, lease: Lease) -> SchedulerResult<()> {
        let domain = lease.item().domain().to_string();

        if let Some(until) = self.breaker.open_until(&domain) {
            debug!("Circuit open for {domain}, deferring");
            self.frontier.requeue(lease);
            self.frontier.defer_domain(&domain, until);
            return Ok(());
        }

        let path = lease.item().url().path_and_query();
        let verdict = self.robots.check(&domain, &path).await;
        if !verdict.is_allowed() {
            let outcome = if verdict == RobotsVerdict::Unavailable {
                debug!("robots.txt unavailable for {}", lease.item().url());
                FetchOutcome::RobotsUnavailable
            } else {
                debug!("robots.txt disallows {}", lease.item().url());
                FetchOutcome::RobotsDisallowed
            };
            self.metrics.record_robots_disallowed();
            let source_offset = lease.item().source_offset();
            let disposition = self.retry.on_outcome(lease.into_item(), &outcome);
            return self.settle(disposition, source_offset).await;
        }

        if let RateLimitDecision::Deny { retry_after } = self.limiter.try_acquire(&domain) {
            self.metrics.record_rate_limited(&domain);
            self.events
                .emit(SchedulerEvent::rate_limited(domain.clone(), retry_after));
            self.frontier.requeue(lease);
            self.frontier
                .defer_domain(&domain, Instant::now() + retry_after);
            return Ok(());
        }

        if self.config.respect_crawl_delay()
            && let Some(delay) = self.robots.crawl_delay(&domain)
        {
            self.frontier.defer_domain(&domain, Instant::now() + delay);
        }

        let item = lease.into_item();
        let url = item.url().to_string();
        self.metrics.record_dispatched();
        self.events.emit(SchedulerEvent::dispatched(
            url.clone(),
            domain.clone(),
            item.attempt() + 1,
            worker,
        ));

        let timeout = self.config.fetch_timeout();
        let outcome = match with_fetch_timeout(self.fetcher.fetch(&url, timeout), timeout).await {
            Ok(response) => FetchOutcome::Response(response),
            Err(e) => {
                debug!("Fetch of {url} failed: {e}");
                FetchOutcome::Failed(e)
            }
        };

        match outcome.classify() {
            OutcomeClass::Success => self.breaker.record_success(&domain),
            OutcomeClass::Transient { detail, throttle } => {
                if throttle {
                    self.limiter.throttle(&domain);
                    self.metrics.record_throttle();
                    self.events
                        .emit(SchedulerEvent::domain_throttled(domain.clone()));
                }
                if let Some(until) = self.breaker.record_failure(&domain, &detail) {
                    self.frontier.defer_domain(&domain, until);
                    self.metrics.record_breaker_trip();
                    self.events.emit(SchedulerEvent::breaker_opened(
                        domain.clone(),
                        until.saturating_duration_since(Instant::now()),
                    ));
                }
            }
            OutcomeClass::Permanent { .. } => {}
        }

        if let FetchOutcome::Response(response) = &outcome
            && matches!(outcome.classify(), OutcomeClass::Success)
        {
            self.events.emit(SchedulerEvent::fetch_succeeded(
                url,
                response.status,
                response.elapsed_ms,
            ));
        }

        let source_offset = item.source_offset();
        let disposition = self.retry.on_outcome(item, &outcome);
        self.settle(disposition, source_offset).await
    }

    /// Apply a disposition to the queue and the sinks
    async fn settle(
        &self,
        disposition: Disposition,
        source_offset: Option<u64>,
    ) -> SchedulerResult<()> {
        match disposition {
            Disposition::Drop => {
                self.metrics.record_succeeded();
                self.frontier.finish(Completion::Succeeded { source_offset });
            }
            Disposition::Requeue(item) => {
                self.metrics.record_retried();
                self.events.emit(SchedulerEvent::retry_scheduled(
                    item.url().to_string(),
                    item.attempt(),
                    item.not_before.saturating_duration_since(Instant::now()),
                ));
                self.frontier.finish(Completion::Retried(item));
            }
            Disposition::DeadLetter {
                item,
                reason,
                detail,
            } => {
                let record = DeadLetterRecord::new(&item, reason, detail);
                // On failure the item stays unsettled, so the committed
                // offset never passes it
                self.dead_letters.record(record).await?;
                self.metrics.record_dead_lettered(reason);
                self.events.emit(SchedulerEvent::dead_lettered(
                    item.url().to_string(),
                    reason,
                    item.attempt(),
                ));
                self.frontier
                    .finish(Completion::DeadLettered { source_offset });
            }
        }
        self.after_completion().await;
        Ok(())
    }

    async fn after_completion(&self) {
        let finished = self.finished.fetch_add(1, Ordering::AcqRel) + 1;
        let interval = self.config.checkpoint_interval().max(1);
        if finished % interval != 0 {
            return;
        }
        let counters = self.write_checkpoint(false).await;
        self.events.emit(SchedulerEvent::checkpoint(counters));
    }

    /// Hand the current counters to the checkpoint sink on the blocking pool
    ///
    /// Writes are serialized and the counters are read under the lock, so a
    /// slow write never lands after a newer one.
    async fn write_checkpoint(&self, drained: bool) -> FrontierCounters {
        let _guard = self.checkpoint_lock.lock().await;
        let counters = self.frontier.counters();
        let sink = Arc::clone(&self.checkpoints);
        let written = tokio::task::spawn_blocking(move || {
            if drained {
                sink.report_drained(&counters)
            } else {
                sink.report_checkpoint(&counters)
            }
        })
        .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to report checkpoint: {e}"),
            Err(e) => warn!("Checkpoint task failed: {e}"),
        }
        counters
    }
}
