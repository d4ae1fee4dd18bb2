//! URL ingestion
//!
//! An [`IngestionSource`] is a lazy, restartable stream of raw URLs. The
//! [`Ingestor`] normalizes each one, drops duplicates through the seen-set
//! and enqueues the rest, recording how far the source was consumed.

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;

use super::crawl_types::{FailureReason, PriorityTier, SchedulerError, SchedulerResult, WorkItem};
use super::dedup::SeenSet;
use super::frontier::Frontier;
use crate::crawl_events::{SchedulerEvent, SchedulerEventBus, SchedulerMetrics};
use crate::utils::UrlNormalizer;

/// Stream of raw URLs; `Ok` lines may still be malformed
pub type UrlStream = BoxStream<'static, SchedulerResult<String>>;

/// External source of candidate URLs
pub trait IngestionSource: Send + Sync {
    /// Open the source, skipping the first `offset` entries
    fn open(&self, offset: u64) -> BoxFuture<'_, SchedulerResult<UrlStream>>;
}

/// In-memory source
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    urls: Vec<String>,
}

impl VecSource {
    #[must_use]
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }
}

impl IngestionSource for VecSource {
    fn open(&self, offset: u64) -> BoxFuture<'_, SchedulerResult<UrlStream>> {
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let urls: Vec<SchedulerResult<String>> =
            self.urls.iter().skip(skip).cloned().map(Ok).collect();
        Box::pin(async move { Ok(stream::iter(urls).boxed()) })
    }
}

/// One URL per line; blank lines and `#` comments still count as entries
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IngestionSource for FileSource {
    fn open(&self, offset: u64) -> BoxFuture<'_, SchedulerResult<UrlStream>> {
        Box::pin(async move {
            let file = tokio::fs::File::open(&self.path).await?;
            let skip = usize::try_from(offset).unwrap_or(usize::MAX);
            let lines = LinesStream::new(BufReader::new(file).lines())
                .skip(skip)
                .map(|line| line.map_err(SchedulerError::from));
            Ok::<UrlStream, SchedulerError>(lines.boxed())
        })
    }
}

/// Outcome of one ingestion pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Entries consumed from the source, including skipped ones
    pub read: u64,
    pub admitted: u64,
    pub duplicates: u64,
    pub invalid: u64,
    /// Source offset after the pass
    pub offset: u64,
}

/// What happened to one offered URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Duplicate,
    Invalid,
}

/// Feeds a source into the queue
pub struct Ingestor {
    normalizer: UrlNormalizer,
    seen: Arc<SeenSet>,
    frontier: Arc<Frontier>,
    events: SchedulerEventBus,
    metrics: Arc<SchedulerMetrics>,
}

impl Ingestor {
    #[must_use]
    pub fn new(
        normalizer: UrlNormalizer,
        seen: Arc<SeenSet>,
        frontier: Arc<Frontier>,
        events: SchedulerEventBus,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            normalizer,
            seen,
            frontier,
            events,
            metrics,
        }
    }

    /// Offer one raw URL to the queue
    pub fn offer(&self, raw: &str, tier: PriorityTier, source_offset: Option<u64>) -> Admission {
        let url = match self.normalizer.normalize(raw) {
            Ok(url) => url,
            Err(e) => {
                debug!("Discarding {raw}: {e}");
                self.metrics.record_invalid_url();
                self.events.emit(SchedulerEvent::url_rejected(
                    raw.to_string(),
                    FailureReason::InvalidUrl,
                    e.to_string(),
                ));
                return Admission::Invalid;
            }
        };

        if !self.seen.should_ingest(&url) {
            self.metrics.record_duplicate();
            return Admission::Duplicate;
        }

        let mut item = WorkItem::new(url, tier);
        if let Some(offset) = source_offset {
            item = item.with_source_offset(offset);
        }
        self.events
            .emit(SchedulerEvent::url_ingested(item.url().to_string(), tier));
        self.metrics.record_ingested();
        self.frontier.enqueue(item);
        Admission::Admitted
    }

    /// Consume `source` from `offset` to its end
    ///
    /// # Errors
    ///
    /// Fails when the source cannot be opened or read. Entries consumed
    /// before the failure stay queued and the reached offset is recorded.
    pub async fn ingest(
        &self,
        source: &dyn IngestionSource,
        offset: u64,
        tier: PriorityTier,
    ) -> SchedulerResult<IngestReport> {
        let mut report = IngestReport {
            offset,
            ..IngestReport::default()
        };
        let mut lines = source.open(offset).await?;

        while let Some(line) = lines.next().await {
            let line = line?;
            let position = report.offset;
            report.offset += 1;
            report.read += 1;

            let raw = line.trim();
            if raw.is_empty() || raw.starts_with('#') {
                self.frontier.set_ingested_offset(report.offset);
                continue;
            }

            match self.offer(raw, tier, Some(position)) {
                Admission::Admitted => report.admitted += 1,
                Admission::Duplicate => report.duplicates += 1,
                Admission::Invalid => report.invalid += 1,
            }
            self.frontier.set_ingested_offset(report.offset);
        }

        debug!(
            "Ingested {} entries: {} admitted, {} duplicates, {} invalid",
            report.read, report.admitted, report.duplicates, report.invalid
        );
        Ok(report)
    }
}
