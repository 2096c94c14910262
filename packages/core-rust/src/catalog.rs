//! Canonical catalog entities produced by the bulk importer.
//!
//! The catalog deduplicates on natural keys only: a set is identified by its
//! `set_code`, a card by `(set_code, card_number)`. Surrogate ids assigned by
//! the store never take part in deduplication.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Which trading card game a set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameType {
    Pokemon,
    OnePiece,
}

/// Card rarity tiers, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rarity {
    #[default]
    Common,
    Uncommon,
    Rare,
    HoloRare,
    UltraRare,
    SecretRare,
    Promo,
}

impl Rarity {
    /// The tier assigned when a source reports a rarity this catalog does not model.
    pub const FALLBACK: Rarity = Rarity::Common;

    pub const ALL_TIERS: [Rarity; 7] = [
        Rarity::Common,
        Rarity::Uncommon,
        Rarity::Rare,
        Rarity::HoloRare,
        Rarity::UltraRare,
        Rarity::SecretRare,
        Rarity::Promo,
    ];

    /// Strictly parses a source rarity label.
    ///
    /// Labels are normalized the way the external catalog spells them:
    /// `"Rare Holo"`, `"rare-holo"` and `"RARE_HOLO"` all normalize to
    /// `RARE_HOLO` before matching. Returns `None` for unknown labels.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        let normalized = normalize_label(label);
        let rarity = match normalized.as_str() {
            "COMMON" => Self::Common,
            "UNCOMMON" => Self::Uncommon,
            "RARE" => Self::Rare,
            "HOLO_RARE" => Self::HoloRare,
            "ULTRA_RARE" => Self::UltraRare,
            "SECRET_RARE" => Self::SecretRare,
            "PROMO" => Self::Promo,
            _ => return None,
        };
        Some(rarity)
    }

    /// Parses a label, substituting [`Rarity::FALLBACK`] for unknown values.
    ///
    /// Returns the rarity and whether the fallback was used.
    #[must_use]
    pub fn parse_lenient(label: &str) -> (Self, bool) {
        match Self::parse(label) {
            Some(r) => (r, false),
            None => (Self::FALLBACK, true),
        }
    }
}

fn normalize_label(label: &str) -> String {
    label
        .trim()
        .to_uppercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// Natural key of a card.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardKey {
    pub set_code: String,
    pub card_number: String,
}

impl CardKey {
    #[must_use]
    pub fn new(set_code: impl Into<String>, card_number: impl Into<String>) -> Self {
        Self {
            set_code: set_code.into(),
            card_number: card_number.into(),
        }
    }
}

impl fmt::Display for CardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.set_code, self.card_number)
    }
}

/// A card set. `set_code` is unique across the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSet {
    /// Store-assigned surrogate id. `None` until first saved.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<i64>,
    pub set_code: String,
    pub name: String,
    pub game_type: GameType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub release_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_cards: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub logo_url: Option<String>,
}

/// A single card. `(set_code, card_number)` is unique across the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<i64>,
    pub set_code: String,
    pub card_number: String,
    pub name: String,
    pub rarity: Rarity,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub variant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default, rename = "type")]
    pub card_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub artist: Option<String>,
}

impl Card {
    #[must_use]
    pub fn key(&self) -> CardKey {
        CardKey::new(self.set_code.clone(), self.card_number.clone())
    }
}

/// Outcome of importing one set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ImportResult {
    #[serde(rename = "success", rename_all = "camelCase")]
    Imported {
        set_code: String,
        cards_imported: u32,
    },
    #[serde(rename = "error", rename_all = "camelCase")]
    Failed { set_code: String, error: String },
}

impl ImportResult {
    #[must_use]
    pub fn set_code(&self) -> &str {
        match self {
            Self::Imported { set_code, .. } | Self::Failed { set_code, .. } => set_code,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Imported { .. })
    }
}

/// Ordered per-set outcomes of a batch import: one entry per requested set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatchResult {
    pub results: Vec<ImportResult>,
}

impl ImportBatchResult {
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    /// Total newly inserted cards across all successful sets.
    #[must_use]
    pub fn cards_imported(&self) -> u64 {
        self.results
            .iter()
            .map(|r| match r {
                ImportResult::Imported { cards_imported, .. } => u64::from(*cards_imported),
                ImportResult::Failed { .. } => 0,
            })
            .sum()
    }
}
