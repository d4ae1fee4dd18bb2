//! Filtered event receivers

use tokio::sync::broadcast;

use super::errors::EventBusError;
use super::types::SchedulerEvent;

/// Receiver that yields only the events accepted by its filter
pub struct FilteredReceiver<F>
where
    F: Fn(&SchedulerEvent) -> bool + Send + Sync + 'static,
{
    receiver: broadcast::Receiver<SchedulerEvent>,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&SchedulerEvent) -> bool + Send + Sync + 'static,
{
    pub fn new(receiver: broadcast::Receiver<SchedulerEvent>, filter: F) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next event that passes the filter
    ///
    /// # Errors
    ///
    /// `EventBusError::Shutdown` once the bus is gone, and
    /// `EventBusError::ReceiverLagged` when events were overwritten before
    /// this receiver read them.
    pub async fn recv(&mut self) -> Result<SchedulerEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if (self.filter)(&event) => return Ok(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => return Err(EventBusError::Shutdown),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Err(EventBusError::ReceiverLagged(skipped));
                }
            }
        }
    }

    /// Like [`FilteredReceiver::recv`] without waiting
    ///
    /// # Errors
    ///
    /// Same as [`FilteredReceiver::recv`].
    pub fn try_recv(&mut self) -> Result<Option<SchedulerEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if (self.filter)(&event) => return Ok(Some(event)),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => return Err(EventBusError::Shutdown),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    return Err(EventBusError::ReceiverLagged(skipped));
                }
            }
        }
    }
}
