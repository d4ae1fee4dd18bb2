//! Terminal sink for items that will never be fetched successfully

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::crawl_types::{FailureReason, PriorityTier, SchedulerError, SchedulerResult, WorkItem};
use crate::utils::NormalizedUrl;

/// One dead-lettered item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub url: NormalizedUrl,
    pub domain: String,
    pub reason: FailureReason,
    pub detail: String,
    /// Fetch attempts made
    pub attempts: u32,
    pub tier: PriorityTier,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    #[must_use]
    pub fn new(item: &WorkItem, reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            url: item.url().clone(),
            domain: item.domain().to_string(),
            reason,
            detail: detail.into(),
            attempts: item.attempt(),
            tier: item.tier,
            failed_at: Utc::now(),
        }
    }
}

/// External dead-letter collaborator
pub trait DeadLetterSink: Send + Sync {
    /// Persist one record
    ///
    /// # Errors
    ///
    /// A failure here is a resource fault and stops the scheduler.
    fn record(&self, record: DeadLetterRecord) -> BoxFuture<'_, SchedulerResult<()>>;
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemoryDeadLetterSink {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl MemoryDeadLetterSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeadLetterSink for MemoryDeadLetterSink {
    fn record(&self, record: DeadLetterRecord) -> BoxFuture<'_, SchedulerResult<()>> {
        self.records.lock().push(record);
        Box::pin(futures::future::ready(Ok::<(), SchedulerError>(())))
    }
}

/// Appends one JSON object per line to a file
pub struct JsonlDeadLetterSink {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonlDeadLetterSink {
    /// Open `path` for appending, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` if the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> SchedulerResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeadLetterSink for JsonlDeadLetterSink {
    fn record(&self, record: DeadLetterRecord) -> BoxFuture<'_, SchedulerResult<()>> {
        Box::pin(async move {
            let mut line = serde_json::to_string(&record)
                .map_err(|e| SchedulerError::DeadLetter(e.to_string()))?;
            line.push('\n');

            let mut file = self.file.lock().await;
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| SchedulerError::DeadLetter(format!("{}: {e}", self.path.display())))?;
            file.flush()
                .await
                .map_err(|e| SchedulerError::DeadLetter(format!("{}: {e}", self.path.display())))?;
            Ok::<(), SchedulerError>(())
        })
    }
}
