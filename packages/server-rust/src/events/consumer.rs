//! Typed event consumers on top of raw broker deliveries.
//!
//! [`EventConsumer`] adapts an [`EventHandler`] to the broker's
//! [`MessageHandler`] seam. It reads the envelope discriminant before
//! touching the payload, acknowledges (and counts) variants its handler does
//! not accept, and suppresses redeliveries of events it already processed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cardvault_core::{DomainEvent, EventEnvelope, EventKind};
use quick_cache::sync::Cache;
use tracing::{debug, warn};

use super::broker::{Delivery, MessageHandler};
use super::error::ConsumerError;

/// Number of recently processed event fingerprints remembered per consumer.
pub const DEFAULT_DEDUP_CAPACITY: usize = 10_000;

/// Per-variant event effect.
///
/// Effects must tolerate being applied to the same event more than once;
/// [`EventConsumer`] filters most redeliveries but its memory is bounded.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable handler name, used for queue naming, logs and metrics.
    fn name(&self) -> &str;

    /// Whether this handler processes events of `kind`.
    fn accepts(&self, kind: EventKind) -> bool;

    /// Applies the handler's effect.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Retryable`] to request redelivery or
    /// [`ConsumerError::Fatal`] to dead-letter the message.
    async fn on_event(&self, event: &DomainEvent) -> Result<(), ConsumerError>;
}

/// Broker-facing wrapper around an [`EventHandler`].
pub struct EventConsumer {
    handler: Arc<dyn EventHandler>,
    processed: Cache<u64, ()>,
    handled: AtomicU64,
    duplicates: AtomicU64,
    skipped: AtomicU64,
}

impl EventConsumer {
    #[must_use]
    pub fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self::with_dedup_capacity(handler, DEFAULT_DEDUP_CAPACITY)
    }

    #[must_use]
    pub fn with_dedup_capacity(handler: Arc<dyn EventHandler>, capacity: usize) -> Self {
        Self {
            handler,
            processed: Cache::new(capacity.max(1)),
            handled: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// Events whose effect was applied.
    #[must_use]
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    /// Redeliveries acknowledged without reapplying the effect.
    #[must_use]
    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    /// Deliveries of a variant this consumer's handler does not accept.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageHandler for EventConsumer {
    fn name(&self) -> &str {
        self.handler.name()
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), ConsumerError> {
        let kind = EventEnvelope::peek_kind(&delivery.body)
            .map_err(|e| ConsumerError::Fatal(e.to_string()))?;

        if !self.handler.accepts(kind) {
            // On a queue shared by several handlers this message is now lost
            // to the handler that wanted it.
            warn!(
                consumer = self.handler.name(),
                kind = kind.as_str(),
                routing_key = %delivery.routing_key,
                "consumer received a variant it does not handle"
            );
            self.skipped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(
                "events_skipped_total",
                "consumer" => self.handler.name().to_string(),
                "kind" => kind.as_str()
            )
            .increment(1);
            return Ok(());
        }

        let envelope =
            EventEnvelope::decode(&delivery.body).map_err(|e| ConsumerError::Fatal(e.to_string()))?;
        let fingerprint = envelope.event.fingerprint();

        if self.processed.get(&fingerprint).is_some() {
            debug!(
                consumer = self.handler.name(),
                kind = kind.as_str(),
                attempt = delivery.attempt,
                "duplicate delivery acknowledged"
            );
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        self.handler.on_event(&envelope.event).await?;
        self.processed.insert(fingerprint, ());
        self.handled.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "events_consumed_total",
            "consumer" => self.handler.name().to_string(),
            "kind" => kind.as_str()
        )
        .increment(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use cardvault_core::{CardCondition, ManualClock, HLC};
    use parking_lot::Mutex;

    use super::*;

    struct Collecting {
        accepts: EventKind,
        seen: Mutex<Vec<DomainEvent>>,
        fail_next: Mutex<bool>,
    }

    impl Collecting {
        fn new(accepts: EventKind) -> Arc<Self> {
            Arc::new(Self {
                accepts,
                seen: Mutex::new(Vec::new()),
                fail_next: Mutex::new(false),
            })
        }
    }

    #[async_trait]
    impl EventHandler for Collecting {
        fn name(&self) -> &str {
            "collecting"
        }

        fn accepts(&self, kind: EventKind) -> bool {
            kind == self.accepts
        }

        async fn on_event(&self, event: &DomainEvent) -> Result<(), ConsumerError> {
            if std::mem::take(&mut *self.fail_next.lock()) {
                return Err(ConsumerError::Retryable("transient".to_string()));
            }
            self.seen.lock().push(event.clone());
            Ok(())
        }
    }

    fn hlc() -> HLC {
        HLC::with_clock("test", Box::new(ManualClock::new(1_000)))
    }

    fn delivery(event: DomainEvent, attempt: u32) -> Delivery {
        let envelope = EventEnvelope::new(event);
        Delivery {
            message_id: 1,
            exchange: "x".to_string(),
            routing_key: envelope.routing_key.clone(),
            body: Bytes::from(envelope.encode().unwrap()),
            attempt,
        }
    }

    #[tokio::test]
    async fn redelivered_event_is_applied_once() {
        let handler = Collecting::new(EventKind::CardAdded);
        let consumer = EventConsumer::new(handler.clone());
        let event = DomainEvent::card_added(&hlc(), 1, 2, 1, CardCondition::Mint, false);

        consumer.handle(&delivery(event.clone(), 1)).await.unwrap();
        consumer.handle(&delivery(event, 2)).await.unwrap();

        assert_eq!(handler.seen.lock().len(), 1);
        assert_eq!(consumer.handled(), 1);
        assert_eq!(consumer.duplicates(), 1);
    }

    #[tokio::test]
    async fn failed_attempt_is_not_remembered_as_processed() {
        let handler = Collecting::new(EventKind::CardAdded);
        *handler.fail_next.lock() = true;
        let consumer = EventConsumer::new(handler.clone());
        let event = DomainEvent::card_added(&hlc(), 1, 2, 1, CardCondition::Mint, false);

        let first = consumer.handle(&delivery(event.clone(), 1)).await;
        assert!(matches!(first, Err(ConsumerError::Retryable(_))));

        consumer.handle(&delivery(event, 2)).await.unwrap();
        assert_eq!(handler.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn other_variant_is_acknowledged_but_not_applied() {
        let handler = Collecting::new(EventKind::CardAdded);
        let consumer = EventConsumer::new(handler.clone());
        let removed = DomainEvent::card_removed(&hlc(), 1, 2);

        consumer.handle(&delivery(removed, 1)).await.unwrap();

        assert!(handler.seen.lock().is_empty());
        assert_eq!(consumer.skipped(), 1);
    }

    #[tokio::test]
    async fn undecodable_body_is_fatal() {
        let consumer = EventConsumer::new(Collecting::new(EventKind::CardAdded));
        let bad = Delivery {
            message_id: 1,
            exchange: "x".to_string(),
            routing_key: "card.events.added".to_string(),
            body: Bytes::from_static(b"not json"),
            attempt: 1,
        };
        assert!(matches!(
            consumer.handle(&bad).await,
            Err(ConsumerError::Fatal(_))
        ));
    }
}
