//! Configuration module for the crawl scheduler
//!
//! This module provides the `SchedulerConfig` struct, its builder and JSON
//! loading with validation and sensible defaults.

// Sub-modules
pub mod builder;
pub mod getters;
pub mod methods;
pub mod types;

// Re-exports for public API
pub use builder::SchedulerConfigBuilder;
pub use types::SchedulerConfig;
