//! Checkpoint reporting
//!
//! Workers report the queue's durable counters every `checkpoint_interval`
//! completions. A restarted scheduler reopens its ingestion source at the
//! last checkpoint's `committed_offset`, so completed work is not replayed.

use log::info;
use std::path::{Path, PathBuf};

use super::crawl_types::SchedulerResult;
use super::frontier::FrontierCounters;

/// Receiver of progress checkpoints
///
/// The dispatcher calls sinks on tokio's blocking pool, one report at a time,
/// so implementations may do synchronous file I/O.
pub trait CheckpointSink: Send + Sync {
    /// Called every `checkpoint_interval` completions
    ///
    /// # Errors
    ///
    /// A failing sink is logged by the dispatcher and does not stop it.
    fn report_checkpoint(&self, counters: &FrontierCounters) -> SchedulerResult<()>;

    /// Called once when the queue drains
    ///
    /// # Errors
    ///
    /// Same as [`CheckpointSink::report_checkpoint`].
    fn report_drained(&self, counters: &FrontierCounters) -> SchedulerResult<()> {
        self.report_checkpoint(counters)
    }
}

/// Checkpoint sink that does nothing
#[derive(Debug, Clone, Copy)]
pub struct NoOpCheckpoint;

impl CheckpointSink for NoOpCheckpoint {
    #[inline(always)]
    fn report_checkpoint(&self, _counters: &FrontierCounters) -> SchedulerResult<()> {
        Ok(())
    }
}

/// Logs every checkpoint at info level
#[derive(Debug, Clone, Copy)]
pub struct LogCheckpoint;

impl CheckpointSink for LogCheckpoint {
    fn report_checkpoint(&self, c: &FrontierCounters) -> SchedulerResult<()> {
        info!(
            "Checkpoint: committed_offset={} ingested_offset={} completed={} retried={} dead_lettered={} pending={} in_flight={}",
            c.committed_offset,
            c.ingested_offset,
            c.completed,
            c.retried,
            c.dead_lettered,
            c.pending,
            c.in_flight
        );
        Ok(())
    }
}

/// Keeps the latest checkpoint in a JSON file
///
/// The file is replaced atomically (write to a sibling, then rename).
#[derive(Debug, Clone)]
pub struct JsonCheckpointFile {
    path: PathBuf,
}

impl JsonCheckpointFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last checkpoint, if one was written
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load(&self) -> SchedulerResult<Option<FrontierCounters>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).map(Some).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, e).into()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl CheckpointSink for JsonCheckpointFile {
    fn report_checkpoint(&self, counters: &FrontierCounters) -> SchedulerResult<()> {
        let json = serde_json::to_vec_pretty(counters)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
