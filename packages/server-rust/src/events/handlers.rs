//! Built-in collection-event handlers.

use async_trait::async_trait;
use cardvault_core::{DomainEvent, EventKind, UserCardKey};
use dashmap::DashSet;
use tracing::info;

use super::consumer::EventHandler;
use super::error::ConsumerError;

// ---------------------------------------------------------------------------
// ActivityLogHandler
// ---------------------------------------------------------------------------

/// Logs every event of one kind with its variant fields.
pub struct ActivityLogHandler {
    name: &'static str,
    kind: EventKind,
}

impl ActivityLogHandler {
    #[must_use]
    pub fn card_added() -> Self {
        Self {
            name: "card-added-log",
            kind: EventKind::CardAdded,
        }
    }

    #[must_use]
    pub fn card_removed() -> Self {
        Self {
            name: "card-removed-log",
            kind: EventKind::CardRemoved,
        }
    }

    #[must_use]
    pub fn card_updated() -> Self {
        Self {
            name: "card-updated-log",
            kind: EventKind::CardUpdated,
        }
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

#[async_trait]
impl EventHandler for ActivityLogHandler {
    fn name(&self) -> &str {
        self.name
    }

    fn accepts(&self, kind: EventKind) -> bool {
        kind == self.kind
    }

    async fn on_event(&self, event: &DomainEvent) -> Result<(), ConsumerError> {
        match event {
            DomainEvent::CardAdded(e) => info!(
                user_id = e.user_id,
                card_id = e.card_id,
                quantity = e.quantity,
                condition = ?e.condition,
                reverse_holo = e.is_reverse_holo,
                timestamp = %e.timestamp,
                "card added to collection"
            ),
            DomainEvent::CardRemoved(e) => info!(
                user_id = e.user_id,
                card_id = e.card_id,
                timestamp = %e.timestamp,
                "card removed from collection"
            ),
            DomainEvent::CardUpdated(e) => info!(
                user_id = e.user_id,
                card_id = e.card_id,
                new_quantity = e.new_quantity,
                new_condition = ?e.new_condition,
                timestamp = %e.timestamp,
                "collection card updated"
            ),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CardPopularityHandler
// ---------------------------------------------------------------------------

/// Tracks how many distinct users own each card.
///
/// State is a set of `(user, card)` ownerships, so applying the same add or
/// remove twice leaves it unchanged.
#[derive(Default)]
pub struct CardPopularityHandler {
    owners: DashSet<UserCardKey>,
}

impl CardPopularityHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users currently owning `card_id`.
    #[must_use]
    pub fn owners_of(&self, card_id: i64) -> usize {
        self.owners.iter().filter(|k| k.card_id == card_id).count()
    }
}

#[async_trait]
impl EventHandler for CardPopularityHandler {
    fn name(&self) -> &str {
        "card-popularity"
    }

    fn accepts(&self, kind: EventKind) -> bool {
        matches!(kind, EventKind::CardAdded | EventKind::CardRemoved)
    }

    async fn on_event(&self, event: &DomainEvent) -> Result<(), ConsumerError> {
        let key = UserCardKey {
            user_id: event.user_id(),
            card_id: event.card_id(),
        };
        match event {
            DomainEvent::CardAdded(_) => {
                self.owners.insert(key);
            }
            DomainEvent::CardRemoved(_) => {
                self.owners.remove(&key);
            }
            DomainEvent::CardUpdated(_) => {}
        }
        Ok(())
    }
}
