use async_trait::async_trait;
use cardvault_core::{Card, CardKey, CardSet, UserCard, UserCardKey};

/// Failure modes of a collaborator store call.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Catalog persistence consumed by the importer.
/// Implementations: relational store (external), memory (tests and single-process runs).
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Look up a set by its natural key.
    async fn find_set_by_code(&self, set_code: &str) -> Result<Option<CardSet>, StoreError>;

    /// Insert a new set and return it with its surrogate id assigned.
    /// Fails with `Conflict` if the `set_code` already exists.
    async fn save_set(&self, set: CardSet) -> Result<CardSet, StoreError>;

    /// Look up a card by its natural key.
    async fn find_card(&self, key: &CardKey) -> Result<Option<Card>, StoreError>;

    /// Insert a new card and return it with its surrogate id assigned.
    /// Fails with `Conflict` if the `(set_code, card_number)` already exists.
    async fn save_card(&self, card: Card) -> Result<Card, StoreError>;

    /// Delete a card by natural key. Fails with `NotFound` if absent.
    async fn delete_card(&self, key: &CardKey) -> Result<(), StoreError>;

    /// List every card belonging to a set.
    async fn list_cards_by_set(&self, set_code: &str) -> Result<Vec<Card>, StoreError>;
}

/// User collection persistence consumed by the collection service.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn find(&self, key: UserCardKey) -> Result<Option<UserCard>, StoreError>;

    /// Insert or replace the entry for `card.key()`.
    async fn save(&self, card: UserCard) -> Result<UserCard, StoreError>;

    /// Delete an entry. Fails with `NotFound` if absent.
    async fn delete(&self, key: UserCardKey) -> Result<(), StoreError>;

    /// List every entry owned by a user.
    async fn list_by_user(&self, user_id: i64) -> Result<Vec<UserCard>, StoreError>;
}
