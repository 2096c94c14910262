//! The paginated, idempotent import pipeline.
//!
//! Per set: fetch metadata, reuse or create the set row, then walk card
//! pages in order, inserting only cards whose natural key is new.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cardvault_core::{CardSet, ImportBatchResult, ImportResult};
use futures_util::stream::{self, StreamExt};
use metrics::counter;
use tracing::{debug, error, info, instrument};

use super::config::ImporterConfig;
use super::mapping::{self, MalformedSet};
use super::source::{CatalogSource, SourceError};
use crate::storage::{CatalogStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("catalog source failed: {0}")]
    Source(#[from] SourceError),
    #[error("catalog source did not answer within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    MalformedSet(#[from] MalformedSet),
    /// A card page failed after earlier pages were stored.
    #[error("page {page} failed after {cards_imported} new cards: {source}")]
    Page {
        page: u32,
        cards_imported: u32,
        source: Box<ImportError>,
    },
    #[error("catalog store failed: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of a successful single-set import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetImport {
    pub set_code: String,
    pub set_name: String,
    /// Cards newly inserted by this run.
    pub cards_imported: u32,
    /// Cards skipped because their key already existed.
    pub cards_existing: u32,
    pub pages_fetched: u32,
}

impl SetImport {
    #[must_use]
    pub fn message(&self) -> String {
        format!(
            "Successfully imported {} cards for set {}",
            self.cards_imported, self.set_name
        )
    }
}

pub struct Importer {
    source: Arc<dyn CatalogSource>,
    store: Arc<dyn CatalogStore>,
    config: ImporterConfig,
}

impl Importer {
    #[must_use]
    pub fn new(source: Arc<dyn CatalogSource>, store: Arc<dyn CatalogStore>, config: ImporterConfig) -> Self {
        Self { source, store, config }
    }

    /// Bounds a source call by the configured timeout.
    async fn call<T>(&self, fut: impl Future<Output = Result<T, SourceError>>) -> Result<T, ImportError> {
        match tokio::time::timeout(self.config.source_timeout, fut).await {
            Ok(result) => result.map_err(ImportError::Source),
            Err(_) => Err(ImportError::Timeout(self.config.source_timeout)),
        }
    }

    /// Imports one set. Re-running it on an already imported set inserts
    /// nothing.
    ///
    /// # Errors
    ///
    /// Fails when the set metadata cannot be fetched or is malformed, when
    /// a card page cannot be fetched, or when the store fails.
    #[instrument(skip(self), fields(set_id = %set_id))]
    pub async fn import_set(&self, set_id: &str) -> Result<SetImport, ImportError> {
        info!("importing set");
        let raw = self.call(self.source.fetch_set(set_id)).await?;
        let set = self.reuse_or_create_set(mapping::map_set(&raw)?).await?;

        let mut outcome = SetImport {
            set_code: set.set_code.clone(),
            set_name: set.name.clone(),
            cards_imported: 0,
            cards_existing: 0,
            pages_fetched: 0,
        };

        let mut page = 1;
        loop {
            let batch = match self
                .call(self.source.fetch_cards(set_id, page, self.config.page_size))
                .await
            {
                Ok(batch) => batch,
                Err(e) if page == 1 => return Err(e),
                Err(e) => {
                    return Err(ImportError::Page {
                        page,
                        cards_imported: outcome.cards_imported,
                        source: Box::new(e),
                    })
                }
            };
            outcome.pages_fetched += 1;
            // A page of only undecodable records still counts as data.
            if batch.records() == 0 {
                debug!(page, "empty page, stopping");
                break;
            }

            for raw_card in &batch.cards {
                let Some(card) = mapping::map_card(&set.set_code, raw_card) else {
                    continue;
                };
                if self.store.find_card(&card.key()).await?.is_some() {
                    outcome.cards_existing += 1;
                    continue;
                }
                match self.store.save_card(card).await {
                    Ok(_) => outcome.cards_imported += 1,
                    // Inserted concurrently by another run.
                    Err(StoreError::Conflict(_)) => outcome.cards_existing += 1,
                    Err(e) => return Err(e.into()),
                }
            }

            let page_size = if batch.page_size > 0 {
                batch.page_size
            } else {
                self.config.page_size
            };
            debug!(
                page,
                records = batch.records(),
                skipped = batch.undecodable,
                total = batch.total_count,
                "page stored"
            );
            if u64::from(page) * u64::from(page_size) >= u64::from(batch.total_count) {
                break;
            }
            page += 1;
        }

        counter!("import_cards_inserted_total").increment(u64::from(outcome.cards_imported));
        info!(
            set_code = %outcome.set_code,
            imported = outcome.cards_imported,
            existing = outcome.cards_existing,
            pages = outcome.pages_fetched,
            "set import finished"
        );
        Ok(outcome)
    }

    async fn reuse_or_create_set(&self, mapped: CardSet) -> Result<CardSet, ImportError> {
        if let Some(existing) = self.store.find_set_by_code(&mapped.set_code).await? {
            return Ok(existing);
        }
        let set_code = mapped.set_code.clone();
        match self.store.save_set(mapped).await {
            Ok(saved) => {
                info!(set_code = %saved.set_code, name = %saved.name, "created set");
                Ok(saved)
            }
            Err(StoreError::Conflict(_)) => self
                .store
                .find_set_by_code(&set_code)
                .await?
                .ok_or_else(|| StoreError::NotFound(set_code).into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Single-set import captured as data for a batch.
    async fn import_captured(&self, set_id: String) -> ImportResult {
        match self.import_set(&set_id).await {
            Ok(done) => ImportResult::Imported {
                set_code: done.set_code,
                cards_imported: done.cards_imported,
            },
            Err(e) => {
                counter!("import_set_failures_total").increment(1);
                error!(set_id = %set_id, error = %e, "set import failed");
                ImportResult::Failed {
                    set_code: set_id,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Imports the `count` most recent sets. One failing set never stops
    /// the others; the result has one entry per listed set, in listing order.
    ///
    /// # Errors
    ///
    /// Fails only if the recent-set listing itself cannot be fetched.
    #[instrument(skip(self))]
    pub async fn import_recent_sets(&self, count: u32) -> Result<ImportBatchResult, ImportError> {
        if count == 0 {
            return Ok(ImportBatchResult::default());
        }
        let mut set_ids = self.call(self.source.recent_set_ids(count)).await?;
        // The source may list more than asked for.
        set_ids.truncate(usize::try_from(count).unwrap_or(usize::MAX));
        info!(sets = set_ids.len(), concurrency = self.config.concurrency, "importing recent sets");

        let results = if self.config.concurrency <= 1 {
            let mut results = Vec::with_capacity(set_ids.len());
            for set_id in set_ids {
                results.push(self.import_captured(set_id).await);
            }
            results
        } else {
            stream::iter(set_ids)
                .map(|set_id| self.import_captured(set_id))
                .buffered(self.config.concurrency)
                .collect::<Vec<_>>()
                .await
        };

        let batch = ImportBatchResult { results };
        info!(
            succeeded = batch.succeeded(),
            failed = batch.failed(),
            cards = batch.cards_imported(),
            "batch import finished"
        );
        Ok(batch)
    }
}
