//! Collection-change domain events and their broker envelope.
//!
//! The collection side publishes one [`DomainEvent`] per committed mutation of
//! a user's collection. Events travel through a topic exchange wrapped in an
//! [`EventEnvelope`], encoded as JSON with an explicit `"type"` discriminant
//! so that a consumer can check which variant it received *before* it tries
//! to interpret the payload.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::collection::CardCondition;
use crate::hash::fnv1a_64;
use crate::hlc::{Timestamp, HLC};

/// Exchange every collection-change event is published to.
pub const CARD_EVENTS_EXCHANGE: &str = "card.events.exchange";

/// Routing keys, one per event category.
pub mod routing_keys {
    pub const CARD_ADDED: &str = "card.events.added";
    pub const CARD_REMOVED: &str = "card.events.removed";
    pub const CARD_UPDATED: &str = "card.events.updated";
}

/// Current envelope schema identifier. Bumped on incompatible payload changes.
pub const ENVELOPE_SCHEMA: &str = "cardvault.card-event.v1";

/// Discriminant of a [`DomainEvent`], usable without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    CardAdded,
    CardRemoved,
    CardUpdated,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [Self::CardAdded, Self::CardRemoved, Self::CardUpdated];

    /// Wire tag, identical to the `"type"` field of the encoded event.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CardAdded => "CARD_ADDED",
            Self::CardRemoved => "CARD_REMOVED",
            Self::CardUpdated => "CARD_UPDATED",
        }
    }

    /// Routing key this kind is published under.
    #[must_use]
    pub fn routing_key(self) -> &'static str {
        match self {
            Self::CardAdded => routing_keys::CARD_ADDED,
            Self::CardRemoved => routing_keys::CARD_REMOVED,
            Self::CardUpdated => routing_keys::CARD_UPDATED,
        }
    }

    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == tag)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A card was added to a user's collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardAdded {
    pub user_id: i64,
    pub card_id: i64,
    pub quantity: u32,
    pub condition: CardCondition,
    pub is_reverse_holo: bool,
    pub timestamp: Timestamp,
}

/// A card was removed from a user's collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRemoved {
    pub user_id: i64,
    pub card_id: i64,
    pub timestamp: Timestamp,
}

/// A card already in a user's collection changed quantity or condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardUpdated {
    pub user_id: i64,
    pub card_id: i64,
    pub new_quantity: u32,
    pub new_condition: CardCondition,
    pub timestamp: Timestamp,
}

/// Collection-change event. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    #[serde(rename = "CARD_ADDED")]
    CardAdded(CardAdded),
    #[serde(rename = "CARD_REMOVED")]
    CardRemoved(CardRemoved),
    #[serde(rename = "CARD_UPDATED")]
    CardUpdated(CardUpdated),
}

impl DomainEvent {
    /// Builds a `CardAdded` event stamped by `clock` at construction time.
    #[must_use]
    pub fn card_added(
        clock: &HLC,
        user_id: i64,
        card_id: i64,
        quantity: u32,
        condition: CardCondition,
        is_reverse_holo: bool,
    ) -> Self {
        Self::CardAdded(CardAdded {
            user_id,
            card_id,
            quantity,
            condition,
            is_reverse_holo,
            timestamp: clock.now(),
        })
    }

    #[must_use]
    pub fn card_removed(clock: &HLC, user_id: i64, card_id: i64) -> Self {
        Self::CardRemoved(CardRemoved {
            user_id,
            card_id,
            timestamp: clock.now(),
        })
    }

    #[must_use]
    pub fn card_updated(
        clock: &HLC,
        user_id: i64,
        card_id: i64,
        new_quantity: u32,
        new_condition: CardCondition,
    ) -> Self {
        Self::CardUpdated(CardUpdated {
            user_id,
            card_id,
            new_quantity,
            new_condition,
            timestamp: clock.now(),
        })
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::CardAdded(_) => EventKind::CardAdded,
            Self::CardRemoved(_) => EventKind::CardRemoved,
            Self::CardUpdated(_) => EventKind::CardUpdated,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> i64 {
        match self {
            Self::CardAdded(e) => e.user_id,
            Self::CardRemoved(e) => e.user_id,
            Self::CardUpdated(e) => e.user_id,
        }
    }

    #[must_use]
    pub fn card_id(&self) -> i64 {
        match self {
            Self::CardAdded(e) => e.card_id,
            Self::CardRemoved(e) => e.card_id,
            Self::CardUpdated(e) => e.card_id,
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> &Timestamp {
        match self {
            Self::CardAdded(e) => &e.timestamp,
            Self::CardRemoved(e) => &e.timestamp,
            Self::CardUpdated(e) => &e.timestamp,
        }
    }

    /// Content hash used as the redelivery identity of this event.
    ///
    /// Two deliveries of the same published event share a fingerprint; two
    /// distinct events never do in practice because the HLC timestamp is part
    /// of the hashed payload.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        // Serializing a plain data enum to JSON cannot fail; an empty buffer
        // would only weaken dedup, never break delivery.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        fnv1a_64(&bytes)
    }
}

/// Errors decoding a message body into an [`EventEnvelope`].
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("envelope is missing the event type discriminant")]
    MissingDiscriminant,
    #[error("unknown event type: {0}")]
    UnknownKind(String),
    #[error("unsupported envelope schema: {0}")]
    UnsupportedSchema(String),
}

/// Broker message body: one event plus routing metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub schema: String,
    pub routing_key: String,
    pub event: DomainEvent,
}

impl EventEnvelope {
    /// Wraps `event` for publication under its own category's routing key.
    #[must_use]
    pub fn new(event: DomainEvent) -> Self {
        let routing_key = event.kind().routing_key().to_string();
        Self::with_routing_key(event, routing_key)
    }

    /// Wraps `event` under an explicit routing key.
    #[must_use]
    pub fn with_routing_key(event: DomainEvent, routing_key: impl Into<String>) -> Self {
        Self {
            schema: ENVELOPE_SCHEMA.to_string(),
            routing_key: routing_key.into(),
            event,
        }
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    /// Encodes to the JSON wire body.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Reads only the event discriminant from a wire body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not JSON, has no `event.type` field,
    /// or names a type this build does not know.
    pub fn peek_kind(body: &[u8]) -> Result<EventKind, EnvelopeError> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        let tag = value
            .get("event")
            .and_then(|e| e.get("type"))
            .and_then(serde_json::Value::as_str)
            .ok_or(EnvelopeError::MissingDiscriminant)?;
        EventKind::from_tag(tag).ok_or_else(|| EnvelopeError::UnknownKind(tag.to_string()))
    }

    /// Decodes a wire body. The discriminant and schema are checked before
    /// the variant payload is interpreted.
    ///
    /// # Errors
    ///
    /// See [`EnvelopeError`].
    pub fn decode(body: &[u8]) -> Result<Self, EnvelopeError> {
        Self::peek_kind(body)?;
        let envelope: Self = serde_json::from_slice(body)?;
        if envelope.schema != ENVELOPE_SCHEMA {
            return Err(EnvelopeError::UnsupportedSchema(envelope.schema));
        }
        Ok(envelope)
    }
}
