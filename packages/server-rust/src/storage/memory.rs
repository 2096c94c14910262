//! In-memory store implementations backed by [`DashMap`].
//!
//! Provides concurrent read/write access without external locking. Inserts
//! go through the `DashMap` entry API so that two concurrent saves of the
//! same natural key cannot both succeed.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use cardvault_core::{Card, CardKey, CardSet, UserCard, UserCardKey};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::traits::{CatalogStore, CollectionStore, StoreError};

/// Catalog store holding sets and cards keyed by their natural keys.
pub struct MemoryCatalogStore {
    sets: DashMap<String, CardSet>,
    cards: DashMap<CardKey, Card>,
    next_id: AtomicI64,
}

impl MemoryCatalogStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sets: DashMap::new(),
            cards: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Number of stored sets.
    #[must_use]
    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    /// Number of stored cards across all sets.
    #[must_use]
    pub fn card_count(&self) -> usize {
        self.cards.len()
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MemoryCatalogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn find_set_by_code(&self, set_code: &str) -> Result<Option<CardSet>, StoreError> {
        Ok(self.sets.get(set_code).map(|s| s.clone()))
    }

    async fn save_set(&self, mut set: CardSet) -> Result<CardSet, StoreError> {
        match self.sets.entry(set.set_code.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "set {} already exists",
                set.set_code
            ))),
            Entry::Vacant(slot) => {
                set.id = Some(self.allocate_id());
                slot.insert(set.clone());
                Ok(set)
            }
        }
    }

    async fn find_card(&self, key: &CardKey) -> Result<Option<Card>, StoreError> {
        Ok(self.cards.get(key).map(|c| c.clone()))
    }

    async fn save_card(&self, mut card: Card) -> Result<Card, StoreError> {
        match self.cards.entry(card.key()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "card {} already exists",
                card.key()
            ))),
            Entry::Vacant(slot) => {
                card.id = Some(self.allocate_id());
                slot.insert(card.clone());
                Ok(card)
            }
        }
    }

    async fn delete_card(&self, key: &CardKey) -> Result<(), StoreError> {
        self.cards
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("card {key}")))
    }

    async fn list_cards_by_set(&self, set_code: &str) -> Result<Vec<Card>, StoreError> {
        let mut cards: Vec<Card> = self
            .cards
            .iter()
            .filter(|entry| entry.key().set_code == set_code)
            .map(|entry| entry.value().clone())
            .collect();
        cards.sort_by(|a, b| a.card_number.cmp(&b.card_number));
        Ok(cards)
    }
}

/// Collection store keyed by `(user_id, card_id)`.
#[derive(Default)]
pub struct MemoryCollectionStore {
    entries: DashMap<UserCardKey, UserCard>,
}

impl MemoryCollectionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CollectionStore for MemoryCollectionStore {
    async fn find(&self, key: UserCardKey) -> Result<Option<UserCard>, StoreError> {
        Ok(self.entries.get(&key).map(|e| e.clone()))
    }

    async fn save(&self, card: UserCard) -> Result<UserCard, StoreError> {
        self.entries.insert(card.key(), card.clone());
        Ok(card)
    }

    async fn delete(&self, key: UserCardKey) -> Result<(), StoreError> {
        self.entries.remove(&key).map(|_| ()).ok_or_else(|| {
            StoreError::NotFound(format!("card {} for user {}", key.card_id, key.user_id))
        })
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<UserCard>, StoreError> {
        let mut cards: Vec<UserCard> = self
            .entries
            .iter()
            .filter(|entry| entry.key().user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        cards.sort_by_key(|c| c.card_id);
        Ok(cards)
    }
}
