//! Event bus for publishing and subscribing to scheduler events
//!
//! Publishing is synchronous and never waits: the dispatcher must not be
//! slowed down by observers. A full buffer overwrites the oldest events and
//! lagging subscribers are told how many they missed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

use super::config::EventBusConfig;
use super::errors::EventBusError;
use super::metrics::EventBusMetrics;
use super::streaming::FilteredReceiver;
use super::types::{SchedulerEvent, ShutdownReason};

/// Event bus for scheduler events
#[derive(Debug, Clone)]
pub struct SchedulerEventBus {
    sender: broadcast::Sender<SchedulerEvent>,
    config: Arc<EventBusConfig>,
    metrics: EventBusMetrics,
    shutdown_flag: Arc<AtomicBool>,
}

impl Default for SchedulerEventBus {
    fn default() -> Self {
        Self::with_config(EventBusConfig::default())
    }
}

impl SchedulerEventBus {
    /// Create a new event bus with the specified capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_config(EventBusConfig {
            capacity,
            ..Default::default()
        })
    }

    #[must_use]
    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.capacity.max(1));
        Self {
            sender,
            config: Arc::new(config),
            metrics: EventBusMetrics::new(),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    #[must_use]
    pub fn metrics(&self) -> &EventBusMetrics {
        &self.metrics
    }

    /// Publish an event to all subscribers
    ///
    /// # Errors
    ///
    /// Returns `EventBusError::NoSubscribers` when nobody is listening, and
    /// `EventBusError::Shutdown` after [`SchedulerEventBus::shutdown`]. Both
    /// are informational; callers usually ignore them.
    pub fn publish(&self, event: SchedulerEvent) -> Result<usize, EventBusError> {
        if self.shutdown_flag.load(Ordering::Acquire) {
            return Err(EventBusError::Shutdown);
        }
        match self.sender.send(event) {
            Ok(subscriber_count) => {
                if self.config.enable_metrics {
                    self.metrics.increment_published();
                    self.metrics.update_subscriber_count(subscriber_count);
                }
                Ok(subscriber_count)
            }
            Err(_) => {
                if self.config.enable_metrics {
                    self.metrics.increment_dropped();
                }
                Err(EventBusError::NoSubscribers)
            }
        }
    }

    /// Publish and discard the informational result
    pub fn emit(&self, event: SchedulerEvent) {
        let _ = self.publish(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to the events for which `filter` returns true
    #[must_use]
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&SchedulerEvent) -> bool + Send + Sync + 'static,
    {
        FilteredReceiver::new(self.sender.subscribe(), filter)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish a final `Shutdown` event and refuse further events
    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.shutdown_flag.load(Ordering::Acquire) {
            return;
        }
        let _ = self.sender.send(SchedulerEvent::shutdown(reason));
        self.shutdown_flag.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_block() {
        let bus = SchedulerEventBus::new(4);
        assert_eq!(
            bus.publish(SchedulerEvent::scheduler_started(1)).unwrap_err(),
            EventBusError::NoSubscribers
        );
        assert_eq!(bus.metrics().snapshot().events_dropped, 1);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = SchedulerEventBus::new(16);
        let mut rx = bus.subscribe();
        bus.emit(SchedulerEvent::domain_throttled("a.com".into()));

        match rx.recv().await.expect("event delivered") {
            SchedulerEvent::DomainThrottled { domain, .. } => assert_eq!(domain, "a.com"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_buffer_drops_oldest() {
        let bus = SchedulerEventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.emit(SchedulerEvent::scheduler_started(i));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_is_final() {
        let bus = SchedulerEventBus::new(4);
        let mut rx = bus.subscribe();
        bus.shutdown(ShutdownReason::Drained);
        assert!(bus.is_shutdown());
        assert!(matches!(
            rx.recv().await.expect("shutdown delivered"),
            SchedulerEvent::Shutdown {
                reason: ShutdownReason::Drained,
                ..
            }
        ));
        assert_eq!(
            bus.publish(SchedulerEvent::scheduler_started(1)).unwrap_err(),
            EventBusError::Shutdown
        );
    }
}
