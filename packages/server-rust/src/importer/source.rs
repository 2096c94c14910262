//! The external catalog source contract and its wire records.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source returned HTTP {status} for {url}")]
    Http { status: u16, url: String },
    #[error("source request timed out")]
    Timeout,
    #[error("source unreachable: {0}")]
    Transport(String),
    #[error("malformed source response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Http {
                status: status.as_u16(),
                url: e.url().map(ToString::to_string).unwrap_or_default(),
            }
        } else {
            Self::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SetImages {
    pub logo: Option<String>,
}

/// Set metadata as the source reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSet {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub series: Option<String>,
    /// `yyyy/MM/dd`.
    pub release_date: Option<String>,
    pub total: Option<u32>,
    pub images: Option<SetImages>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CardImages {
    pub small: Option<String>,
}

/// One card record. Every field is optional so that a sparse record can be
/// inspected and skipped instead of failing its whole page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCard {
    #[serde(default, deserialize_with = "text_or_number")]
    pub number: Option<String>,
    pub name: Option<String>,
    pub rarity: Option<String>,
    #[serde(default)]
    pub subtypes: Vec<String>,
    #[serde(default)]
    pub types: Vec<String>,
    pub images: Option<CardImages>,
    pub flavor_text: Option<String>,
    pub artist: Option<String>,
}

/// Accepts a JSON string or number as text; other shapes read as absent.
fn text_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// One page of card records plus the paging metadata reported with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardPage {
    pub cards: Vec<SourceCard>,
    /// Records in the page that could not be decoded at all.
    pub undecodable: usize,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u32,
}

impl CardPage {
    /// Records the source returned, decodable or not.
    #[must_use]
    pub fn records(&self) -> usize {
        self.cards.len() + self.undecodable
    }
}

/// A paged, read-only external catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Metadata of one set.
    async fn fetch_set(&self, set_id: &str) -> Result<SourceSet, SourceError>;

    /// Page `page` (1-based) of the cards belonging to `set_id`.
    async fn fetch_cards(&self, set_id: &str, page: u32, page_size: u32) -> Result<CardPage, SourceError>;

    /// Identifiers of the `count` most recently released sets, newest first.
    async fn recent_set_ids(&self, count: u32) -> Result<Vec<String>, SourceError>;
}
