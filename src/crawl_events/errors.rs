//! Why a scheduler event could not be delivered

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventBusError {
    /// Nobody subscribed; the event was dropped
    #[error("no subscribers for scheduler events")]
    NoSubscribers,

    /// A slow receiver had `0` events overwritten before it read them
    #[error("event receiver lagged, {0} events overwritten")]
    ReceiverLagged(u64),

    #[error("scheduler event bus is shut down")]
    Shutdown,
}
