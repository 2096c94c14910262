use std::sync::Arc;

use bytes::Bytes;
use cardvault_core::{DomainEvent, EventEnvelope};
use tracing::debug;

use super::broker::MessageBroker;
use super::error::PublishError;

/// Wraps domain events in envelopes and hands them to the broker.
///
/// Returns once the broker has accepted the message; consumers run later on
/// their own queue workers.
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn MessageBroker>,
    exchange: String,
}

impl EventPublisher {
    #[must_use]
    pub fn new(broker: Arc<dyn MessageBroker>, exchange: impl Into<String>) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
        }
    }

    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Publishes `event` under its kind's routing key.
    ///
    /// # Errors
    ///
    /// See [`PublishError`].
    pub fn publish(&self, event: DomainEvent) -> Result<usize, PublishError> {
        let routing_key = event.kind().routing_key();
        self.publish_with_key(routing_key, event)
    }

    /// Publishes `event` under an explicit routing key.
    ///
    /// # Errors
    ///
    /// See [`PublishError`].
    pub fn publish_with_key(
        &self,
        routing_key: &str,
        event: DomainEvent,
    ) -> Result<usize, PublishError> {
        let kind = event.kind();
        let envelope = EventEnvelope::with_routing_key(event, routing_key);
        let result = envelope
            .encode()
            .map_err(PublishError::from)
            .and_then(|body| self.broker.publish(&self.exchange, routing_key, Bytes::from(body)));

        match &result {
            Ok(queues) => {
                debug!(kind = kind.as_str(), routing_key, queues, "event published");
                metrics::counter!("events_published_total", "kind" => kind.as_str()).increment(1);
            }
            Err(_) => {
                metrics::counter!("events_publish_failures_total", "kind" => kind.as_str())
                    .increment(1);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use cardvault_core::{ManualClock, HLC};

    use super::*;
    use crate::events::broker::{BrokerConfig, InMemoryBroker};

    #[tokio::test]
    async fn publish_to_undeclared_exchange_fails() {
        let broker = Arc::new(InMemoryBroker::new(BrokerConfig::default()));
        let publisher = EventPublisher::new(broker, "nowhere");
        let hlc = HLC::with_clock("t", Box::new(ManualClock::new(1)));

        let err = publisher
            .publish(DomainEvent::card_removed(&hlc, 1, 1))
            .unwrap_err();
        assert!(matches!(err, PublishError::UnknownExchange(_)));
    }

    #[tokio::test]
    async fn publish_without_bindings_routes_nowhere() {
        let broker = Arc::new(InMemoryBroker::new(BrokerConfig::default()));
        broker.declare_exchange("ex").unwrap();
        let publisher = EventPublisher::new(broker, "ex");
        let hlc = HLC::with_clock("t", Box::new(ManualClock::new(1)));

        assert_eq!(publisher.publish(DomainEvent::card_removed(&hlc, 1, 1)).unwrap(), 0);
    }
}
