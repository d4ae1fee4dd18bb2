pub mod config;
pub mod crawl_engine;
pub mod crawl_events;
pub mod utils;

pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use crawl_engine::{
    Admission, CheckpointSink, DeadLetterRecord, DeadLetterSink, DedupMode, FailureReason,
    FetchError, FetchResponse, Fetcher, FileSource, FrontierCounters, HttpFetcher, IngestReport,
    IngestionSource, JsonCheckpointFile, JsonlDeadLetterSink, MemoryDeadLetterSink, PriorityTier,
    RatePolicy, RobotsFallback, Scheduler, SchedulerError, SchedulerResult, VecSource, WorkItem,
};
pub use crawl_events::{
    SchedulerEvent, SchedulerEventBus, SchedulerMetrics, SchedulerMetricsSnapshot,
};
pub use utils::{NormalizedUrl, UrlNormalizer};
