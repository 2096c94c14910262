//! Collection mutation observers.
//!
//! Defines [`CollectionObserver`] for reacting to committed changes of a
//! user's collection, [`CompositeCollectionObserver`] which fans out to
//! several observers, and [`EventPublishingObserver`] which turns each
//! change into a domain event.

use std::sync::Arc;

use cardvault_core::{DomainEvent, UserCard, HLC};
use tracing::warn;

use crate::events::EventPublisher;

/// Observer for committed collection mutations.
///
/// Called only after the store write has succeeded. Implementations must not
/// fail the mutation; anything that can go wrong is handled internally.
///
/// Used as `Arc<dyn CollectionObserver>`.
pub trait CollectionObserver: Send + Sync {
    /// Called after a card is added to a collection.
    fn on_added(&self, card: &UserCard);

    /// Called after an owned card's quantity or condition changed.
    fn on_updated(&self, old: &UserCard, new: &UserCard);

    /// Called after a card is removed from a collection.
    fn on_removed(&self, card: &UserCard);
}

/// Composite observer that fans out to multiple observers in registration order.
#[derive(Default)]
pub struct CompositeCollectionObserver {
    observers: Vec<Arc<dyn CollectionObserver>>,
}

impl CompositeCollectionObserver {
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn CollectionObserver>>) -> Self {
        Self { observers }
    }

    /// Adds an observer after construction.
    pub fn add(&mut self, observer: Arc<dyn CollectionObserver>) {
        self.observers.push(observer);
    }
}

impl CollectionObserver for CompositeCollectionObserver {
    fn on_added(&self, card: &UserCard) {
        for observer in &self.observers {
            observer.on_added(card);
        }
    }

    fn on_updated(&self, old: &UserCard, new: &UserCard) {
        for observer in &self.observers {
            observer.on_updated(old, new);
        }
    }

    fn on_removed(&self, card: &UserCard) {
        for observer in &self.observers {
            observer.on_removed(card);
        }
    }
}

/// Publishes one [`DomainEvent`] per committed mutation.
///
/// Publish failures are logged and counted; the mutation stays committed.
pub struct EventPublishingObserver {
    publisher: EventPublisher,
    clock: Arc<HLC>,
}

impl EventPublishingObserver {
    #[must_use]
    pub fn new(publisher: EventPublisher, clock: Arc<HLC>) -> Self {
        Self { publisher, clock }
    }

    fn publish(&self, event: DomainEvent) {
        let kind = event.kind();
        let (user_id, card_id) = (event.user_id(), event.card_id());
        if let Err(e) = self.publisher.publish(event) {
            warn!(
                kind = kind.as_str(),
                user_id,
                card_id,
                error = %e,
                "failed to publish collection event"
            );
        }
    }
}

impl CollectionObserver for EventPublishingObserver {
    fn on_added(&self, card: &UserCard) {
        self.publish(DomainEvent::card_added(
            &self.clock,
            card.user_id,
            card.card_id,
            card.quantity,
            card.condition,
            card.is_reverse_holo,
        ));
    }

    fn on_updated(&self, _old: &UserCard, new: &UserCard) {
        self.publish(DomainEvent::card_updated(
            &self.clock,
            new.user_id,
            new.card_id,
            new.quantity,
            new.condition,
        ));
    }

    fn on_removed(&self, card: &UserCard) {
        self.publish(DomainEvent::card_removed(
            &self.clock,
            card.user_id,
            card.card_id,
        ));
    }
}
