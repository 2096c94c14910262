//! `CardVault` core: domain events, catalog model, correlation ids and the hybrid logical clock.

pub mod catalog;
pub mod collection;
pub mod correlation;
pub mod events;
pub mod hash;
pub mod hlc;

pub use catalog::{Card, CardKey, CardSet, GameType, ImportBatchResult, ImportResult, Rarity};
pub use collection::{CardCondition, UserCard, UserCardChange, UserCardKey};
pub use correlation::{CorrelationId, CORRELATION_ID_HEADER};
pub use events::{DomainEvent, EnvelopeError, EventEnvelope, EventKind, CARD_EVENTS_EXCHANGE};
pub use hlc::{ClockSource, ManualClock, SystemClock, Timestamp, HLC};
