//! User collection mutations and their event side channel.

pub mod observer;
pub mod service;

pub use observer::{CollectionObserver, CompositeCollectionObserver, EventPublishingObserver};
pub use service::{CollectionError, CollectionService};
