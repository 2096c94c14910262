use std::sync::Arc;

use cardvault_core::{UserCard, UserCardChange, UserCardKey};
use tracing::{info, instrument};

use super::observer::CollectionObserver;
use crate::storage::{CollectionStore, StoreError};

/// Failure of a collection mutation.
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("user {user_id} already owns card {card_id}")]
    AlreadyOwned { user_id: i64, card_id: i64 },
    #[error("user {user_id} does not own card {card_id}")]
    NotOwned { user_id: i64, card_id: i64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Mutates users' collections: commit to the store, then notify observers.
///
/// Observers never run for a mutation whose store write failed, and nothing
/// they do can undo a committed write.
#[derive(Clone)]
pub struct CollectionService {
    store: Arc<dyn CollectionStore>,
    observer: Arc<dyn CollectionObserver>,
}

impl CollectionService {
    #[must_use]
    pub fn new(store: Arc<dyn CollectionStore>, observer: Arc<dyn CollectionObserver>) -> Self {
        Self { store, observer }
    }

    /// Adds a card the user does not own yet.
    ///
    /// # Errors
    ///
    /// [`CollectionError::AlreadyOwned`] if the user already owns the card,
    /// or a store error.
    #[instrument(skip(self, change))]
    pub async fn add_card(
        &self,
        user_id: i64,
        card_id: i64,
        change: UserCardChange,
    ) -> Result<UserCard, CollectionError> {
        let key = UserCardKey { user_id, card_id };
        if self.store.find(key).await?.is_some() {
            return Err(CollectionError::AlreadyOwned { user_id, card_id });
        }
        let saved = self
            .store
            .save(UserCard {
                user_id,
                card_id,
                quantity: change.quantity,
                condition: change.condition,
                is_reverse_holo: change.is_reverse_holo,
                notes: change.notes,
            })
            .await?;
        info!(quantity = saved.quantity, "card added");
        self.observer.on_added(&saved);
        Ok(saved)
    }

    /// Replaces quantity, condition and notes of an owned card.
    ///
    /// # Errors
    ///
    /// [`CollectionError::NotOwned`] if the user does not own the card, or a
    /// store error.
    #[instrument(skip(self, change))]
    pub async fn update_card(
        &self,
        user_id: i64,
        card_id: i64,
        change: UserCardChange,
    ) -> Result<UserCard, CollectionError> {
        let key = UserCardKey { user_id, card_id };
        let existing = self
            .store
            .find(key)
            .await?
            .ok_or(CollectionError::NotOwned { user_id, card_id })?;
        let saved = self
            .store
            .save(UserCard {
                quantity: change.quantity,
                condition: change.condition,
                is_reverse_holo: change.is_reverse_holo,
                notes: change.notes,
                ..existing.clone()
            })
            .await?;
        info!(quantity = saved.quantity, "card updated");
        self.observer.on_updated(&existing, &saved);
        Ok(saved)
    }

    /// Removes an owned card.
    ///
    /// # Errors
    ///
    /// [`CollectionError::NotOwned`] if the user does not own the card, or a
    /// store error.
    #[instrument(skip(self))]
    pub async fn remove_card(&self, user_id: i64, card_id: i64) -> Result<(), CollectionError> {
        let key = UserCardKey { user_id, card_id };
        let existing = self
            .store
            .find(key)
            .await?
            .ok_or(CollectionError::NotOwned { user_id, card_id })?;
        match self.store.delete(key).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                return Err(CollectionError::NotOwned { user_id, card_id })
            }
            Err(e) => return Err(e.into()),
        }
        info!("card removed");
        self.observer.on_removed(&existing);
        Ok(())
    }

    /// # Errors
    ///
    /// [`CollectionError::NotOwned`] if the user does not own the card, or a
    /// store error.
    pub async fn get_card(&self, user_id: i64, card_id: i64) -> Result<UserCard, CollectionError> {
        self.store
            .find(UserCardKey { user_id, card_id })
            .await?
            .ok_or(CollectionError::NotOwned { user_id, card_id })
    }

    /// Lists a user's collection ordered by card id.
    ///
    /// # Errors
    ///
    /// Returns a store error if the listing fails.
    pub async fn list(&self, user_id: i64) -> Result<Vec<UserCard>, CollectionError> {
        Ok(self.store.list_by_user(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use cardvault_core::{CardCondition, ManualClock, CARD_EVENTS_EXCHANGE, HLC};
    use parking_lot::Mutex;

    use super::*;
    use crate::collection::observer::EventPublishingObserver;
    use crate::events::{
        ActivityLogHandler, BrokerConfig, EventHandler, EventPublisher, InMemoryBroker, Topology,
    };
    use crate::storage::MemoryCollectionStore;

    #[derive(Default)]
    struct Journal(Mutex<Vec<&'static str>>);

    impl CollectionObserver for Journal {
        fn on_added(&self, _: &UserCard) {
            self.0.lock().push("added");
        }
        fn on_updated(&self, _: &UserCard, _: &UserCard) {
            self.0.lock().push("updated");
        }
        fn on_removed(&self, _: &UserCard) {
            self.0.lock().push("removed");
        }
    }

    struct FailingStore;

    #[async_trait]
    impl CollectionStore for FailingStore {
        async fn find(&self, _: UserCardKey) -> Result<Option<UserCard>, StoreError> {
            Ok(None)
        }
        async fn save(&self, _: UserCard) -> Result<UserCard, StoreError> {
            Err(StoreError::Backend(anyhow::anyhow!("disk full")))
        }
        async fn delete(&self, _: UserCardKey) -> Result<(), StoreError> {
            Err(StoreError::Backend(anyhow::anyhow!("disk full")))
        }
        async fn list_by_user(&self, _: i64) -> Result<Vec<UserCard>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn change(quantity: u32) -> UserCardChange {
        UserCardChange {
            quantity,
            condition: CardCondition::NearMint,
            is_reverse_holo: false,
            notes: None,
        }
    }

    fn service_with_journal() -> (CollectionService, Arc<Journal>) {
        let journal = Arc::new(Journal::default());
        let service = CollectionService::new(
            Arc::new(MemoryCollectionStore::new()),
            Arc::clone(&journal) as Arc<dyn CollectionObserver>,
        );
        (service, journal)
    }

    #[tokio::test]
    async fn add_update_remove_notify_in_order() {
        let (service, journal) = service_with_journal();
        service.add_card(1, 10, change(1)).await.unwrap();
        let updated = service.update_card(1, 10, change(4)).await.unwrap();
        assert_eq!(updated.quantity, 4);
        assert_eq!(service.get_card(1, 10).await.unwrap(), updated);
        service.remove_card(1, 10).await.unwrap();
        assert!(matches!(
            service.get_card(1, 10).await.unwrap_err(),
            CollectionError::NotOwned { .. }
        ));

        assert_eq!(*journal.0.lock(), vec!["added", "updated", "removed"]);
        assert!(service.list(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn adding_owned_card_conflicts_without_event() {
        let (service, journal) = service_with_journal();
        service.add_card(1, 10, change(1)).await.unwrap();
        let err = service.add_card(1, 10, change(2)).await.unwrap_err();
        assert!(matches!(err, CollectionError::AlreadyOwned { .. }));
        assert_eq!(journal.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn updating_or_removing_unowned_card_fails() {
        let (service, journal) = service_with_journal();
        assert!(matches!(
            service.update_card(1, 99, change(1)).await.unwrap_err(),
            CollectionError::NotOwned { .. }
        ));
        assert!(matches!(
            service.remove_card(1, 99).await.unwrap_err(),
            CollectionError::NotOwned { .. }
        ));
        assert!(journal.0.lock().is_empty());
    }

    #[tokio::test]
    async fn failed_commit_publishes_nothing() {
        let journal = Arc::new(Journal::default());
        let service = CollectionService::new(
            Arc::new(FailingStore),
            Arc::clone(&journal) as Arc<dyn CollectionObserver>,
        );
        assert!(matches!(
            service.add_card(1, 10, change(1)).await.unwrap_err(),
            CollectionError::Store(_)
        ));
        assert!(journal.0.lock().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_does_not_roll_back_mutation() {
        // Exchange never declared, so every publish fails.
        let broker = Arc::new(InMemoryBroker::new(BrokerConfig::default()));
        let observer = EventPublishingObserver::new(
            EventPublisher::new(broker, CARD_EVENTS_EXCHANGE),
            Arc::new(HLC::new("collection")),
        );
        let store = Arc::new(MemoryCollectionStore::new());
        let service = CollectionService::new(store.clone(), Arc::new(observer));

        service.add_card(3, 30, change(2)).await.unwrap();
        let key = UserCardKey { user_id: 3, card_id: 30 };
        assert!(store.find(key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn committed_mutations_reach_event_handlers() {
        let broker = Arc::new(InMemoryBroker::new(BrokerConfig::default()));
        let handlers: Vec<Arc<dyn EventHandler>> = vec![
            Arc::new(ActivityLogHandler::card_added()),
            Arc::new(ActivityLogHandler::card_removed()),
        ];
        let consumers = Topology::per_handler()
            .apply(broker.as_ref(), handlers)
            .unwrap();
        let observer = EventPublishingObserver::new(
            EventPublisher::new(broker.clone(), CARD_EVENTS_EXCHANGE),
            Arc::new(HLC::with_clock("collection", Box::new(ManualClock::new(10)))),
        );
        let service = CollectionService::new(
            Arc::new(MemoryCollectionStore::new()),
            Arc::new(observer),
        );

        service.add_card(1, 5, change(1)).await.unwrap();
        service.remove_card(1, 5).await.unwrap();
        broker.drain().await;

        assert_eq!(consumers[0].handled(), 1);
        assert_eq!(consumers[1].handled(), 1);
    }
}
