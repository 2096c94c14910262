//! Bulk catalog import from the Pokémon TCG API.

pub mod client;
pub mod config;
pub mod mapping;
pub mod pipeline;
pub mod source;

pub use client::PokemonTcgClient;
pub use config::{ImporterConfig, SourceConfig, PAGE_SIZE};
pub use mapping::MalformedSet;
pub use pipeline::{ImportError, Importer, SetImport};
pub use source::{CardPage, CatalogSource, SourceCard, SourceError, SourceSet};
