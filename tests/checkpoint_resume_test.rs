//! Checkpointing and resuming from a URL file

mod common;

use common::ScriptedFetcher;
use crawl_scheduler::crawl_engine::{CheckpointSink, FixedJitter, NoOpCheckpoint};
use crawl_scheduler::{
    FileSource, FrontierCounters, JsonCheckpointFile, JsonlDeadLetterSink, MemoryDeadLetterSink,
    PriorityTier, Scheduler, SchedulerConfig, SchedulerEvent, SchedulerResult,
};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct RecordingCheckpoint {
    seen: Mutex<Vec<FrontierCounters>>,
}

impl CheckpointSink for RecordingCheckpoint {
    fn report_checkpoint(&self, counters: &FrontierCounters) -> SchedulerResult<()> {
        self.seen.lock().push(*counters);
        Ok(())
    }
}

/// Records which thread each report ran on
#[derive(Default)]
struct ThreadRecordingCheckpoint {
    threads: Mutex<Vec<std::thread::ThreadId>>,
}

impl CheckpointSink for ThreadRecordingCheckpoint {
    fn report_checkpoint(&self, _counters: &FrontierCounters) -> SchedulerResult<()> {
        self.threads.lock().push(std::thread::current().id());
        Ok(())
    }
}

fn url_file(urls: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    for url in urls {
        writeln!(file, "{url}").expect("write");
    }
    file
}

#[tokio::test(start_paused = true)]
async fn test_checkpoints_every_interval() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let checkpoints = Arc::new(RecordingCheckpoint::default());
    let config = SchedulerConfig::builder()
        .checkpoint_interval(2)
        .worker_count(1)
        .build()
        .expect("valid");
    let scheduler = Arc::new(
        Scheduler::with_jitter(
            config,
            fetcher,
            Arc::new(MemoryDeadLetterSink::new()),
            Arc::new(FixedJitter(Duration::ZERO)),
        )
        .with_checkpoint_sink(checkpoints.clone()),
    );
    let mut events = scheduler.events().subscribe();

    let file = url_file(&[
        "http://a.com/1",
        "http://b.com/1",
        "http://c.com/1",
        "http://d.com/1",
        "http://e.com/1",
    ]);
    let report = scheduler
        .ingest(&FileSource::new(file.path()), 0, PriorityTier::Normal)
        .await
        .expect("ingest");
    assert_eq!(report.admitted, 5);

    let counters = scheduler.run_until_drained().await.expect("runs");
    assert_eq!(counters.committed_offset, 5);

    // Two periodic checkpoints, then the drained report
    let seen = checkpoints.seen.lock().clone();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].completed, 2);
    assert_eq!(seen[1].completed, 4);
    assert_eq!(seen[2].completed, 5);
    assert!(seen.windows(2).all(|w| w[0].committed_offset <= w[1].committed_offset));

    let mut checkpoint_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SchedulerEvent::Checkpoint { .. }) {
            checkpoint_events += 1;
        }
    }
    assert_eq!(checkpoint_events, 2);
}

#[tokio::test(start_paused = true)]
async fn test_restart_resumes_at_committed_offset() {
    let dir = tempfile::tempdir().expect("temp dir");
    let checkpoint_path = dir.path().join("checkpoint.json");
    let dead_letter_path = dir.path().join("dead.jsonl");
    let file = url_file(&[
        "http://a.com/1",
        "http://a.com/2",
        "http://a.com/3",
        "http://a.com/4",
    ]);

    // First run: nothing completes before shutdown except what the slow
    // rate allows
    let fetcher = Arc::new(ScriptedFetcher::new());
    let config = SchedulerConfig::builder()
        .domain_override("a.com", crawl_scheduler::RatePolicy::new(0.1, 2))
        .checkpoint_interval(1)
        .worker_count(1)
        .build()
        .expect("valid");
    let scheduler = Arc::new(
        Scheduler::with_jitter(
            config.clone(),
            fetcher.clone(),
            Arc::new(
                JsonlDeadLetterSink::open(&dead_letter_path)
                    .await
                    .expect("open sink"),
            ),
            Arc::new(FixedJitter(Duration::ZERO)),
        )
        .with_checkpoint_sink(Arc::new(JsonCheckpointFile::new(&checkpoint_path))),
    );
    scheduler
        .ingest(&FileSource::new(file.path()), 0, PriorityTier::Normal)
        .await
        .expect("ingest");
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run().await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    scheduler.shutdown();
    runner.await.expect("joins").expect("runs");
    assert_eq!(fetcher.calls().len(), 2);

    let last = JsonCheckpointFile::new(&checkpoint_path)
        .load()
        .expect("readable")
        .expect("written");
    assert_eq!(last.committed_offset, 2);

    // Second run picks up the two remaining URLs only
    let fetcher = Arc::new(ScriptedFetcher::new());
    let scheduler = Arc::new(
        Scheduler::with_jitter(
            config,
            fetcher.clone(),
            Arc::new(MemoryDeadLetterSink::new()),
            Arc::new(FixedJitter(Duration::ZERO)),
        )
        .with_checkpoint_sink(Arc::new(NoOpCheckpoint))
        .resume_from(last.committed_offset),
    );
    let report = scheduler
        .ingest(
            &FileSource::new(file.path()),
            last.committed_offset,
            PriorityTier::Normal,
        )
        .await
        .expect("ingest");
    assert_eq!(report.admitted, 2);
    scheduler.run_until_drained().await.expect("runs");

    let mut fetched: Vec<String> = fetcher.calls().into_iter().map(|(url, _)| url).collect();
    fetched.sort();
    assert_eq!(fetched, vec!["http://a.com/3", "http://a.com/4"]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_checkpoint_writes_stay_off_the_worker_thread() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let checkpoints = Arc::new(ThreadRecordingCheckpoint::default());
    let config = SchedulerConfig::builder()
        .checkpoint_interval(1)
        .worker_count(1)
        .build()
        .expect("valid");
    let scheduler = Arc::new(
        Scheduler::with_jitter(
            config,
            fetcher,
            Arc::new(MemoryDeadLetterSink::new()),
            Arc::new(FixedJitter(Duration::ZERO)),
        )
        .with_checkpoint_sink(checkpoints.clone()),
    );
    scheduler.submit("http://a.com/1", PriorityTier::Normal);
    scheduler.submit("http://b.com/1", PriorityTier::Normal);
    scheduler.run_until_drained().await.expect("runs");

    // Two per-item checkpoints plus the drained one
    let threads = checkpoints.threads.lock().clone();
    assert_eq!(threads.len(), 3);
    let worker_thread = std::thread::current().id();
    assert!(threads.iter().all(|&id| id != worker_thread));
}
