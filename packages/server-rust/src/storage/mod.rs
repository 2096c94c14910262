//! Collaborator stores.
//!
//! The catalog and collection stores are external collaborators; this module
//! defines the contracts the server consumes ([`CatalogStore`],
//! [`CollectionStore`]) and `DashMap`-backed implementations used for
//! single-process runs and tests.

pub mod memory;
pub mod traits;

pub use memory::{MemoryCatalogStore, MemoryCollectionStore};
pub use traits::{CatalogStore, CollectionStore, StoreError};
