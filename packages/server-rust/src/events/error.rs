/// Failure to hand an event to the broker.
///
/// Never rolls back the mutation that produced the event; callers log it
/// and count it under `events_publish_failures_total`.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("broker is closed")]
    BrokerClosed,
    #[error("unknown exchange: {0}")]
    UnknownExchange(String),
    #[error("queue {0} is full")]
    QueueFull(String),
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure declaring or wiring broker topology.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("broker is closed")]
    BrokerClosed,
    #[error("unknown exchange: {0}")]
    UnknownExchange(String),
    #[error("unknown queue: {0}")]
    UnknownQueue(String),
}

/// Outcome of a consumer that could not process a delivery.
///
/// `Retryable` deliveries go back to the queue (and to the next competing
/// consumer) until the delivery limit is reached; `Fatal` ones are
/// dead-lettered immediately.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    #[error("retryable consumer failure: {0}")]
    Retryable(String),
    #[error("fatal consumer failure: {0}")]
    Fatal(String),
}
