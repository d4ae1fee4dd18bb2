//! Event system for observing the scheduler
//!
//! Scheduler decisions are published on a non-blocking broadcast bus, and
//! aggregate counters are kept in [`SchedulerMetrics`].

// Sub-modules
pub mod bus;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod streaming;
pub mod types;

// Re-exports for public API
pub use bus::SchedulerEventBus;
pub use config::EventBusConfig;
pub use errors::EventBusError;
pub use metrics::{EventBusMetrics, SchedulerMetrics, SchedulerMetricsSnapshot};
pub use streaming::FilteredReceiver;
pub use types::{SchedulerEvent, ShutdownReason};
