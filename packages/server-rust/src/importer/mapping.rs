//! Source record to canonical entity mapping.
//!
//! Set-level problems are fatal and reported as [`MalformedSet`]; card-level
//! anomalies are absorbed with a default or by skipping the record.

use cardvault_core::{Card, CardSet, GameType, Rarity};
use chrono::NaiveDate;
use tracing::warn;

use super::source::{SourceCard, SourceSet};

const RELEASE_DATE_FORMAT: &str = "%Y/%m/%d";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("malformed set metadata: {0}")]
pub struct MalformedSet(pub String);

/// Maps set metadata. The source `id` becomes the `set_code` natural key.
///
/// # Errors
///
/// Returns [`MalformedSet`] when the id or name is missing.
pub fn map_set(raw: &SourceSet) -> Result<CardSet, MalformedSet> {
    let set_code = raw.id.trim();
    if set_code.is_empty() {
        return Err(MalformedSet("missing set id".to_string()));
    }
    let name = raw.name.trim();
    if name.is_empty() {
        return Err(MalformedSet(format!("set {set_code} has no name")));
    }

    let release_date = raw.release_date.as_deref().and_then(|s| {
        NaiveDate::parse_from_str(s, RELEASE_DATE_FORMAT)
            .inspect_err(|_| warn!(set_code, release_date = s, "unparsable release date"))
            .ok()
    });

    Ok(CardSet {
        id: None,
        set_code: set_code.to_string(),
        name: name.to_string(),
        game_type: GameType::Pokemon,
        description: raw.series.clone(),
        release_date,
        total_cards: raw.total,
        logo_url: raw.images.as_ref().and_then(|i| i.logo.clone()),
    })
}

/// Maps one card record, or `None` when it lacks a number or a name.
#[must_use]
pub fn map_card(set_code: &str, raw: &SourceCard) -> Option<Card> {
    let (Some(number), Some(name)) = (raw.number.as_deref(), raw.name.as_deref()) else {
        warn!(set_code, number = ?raw.number, "skipping card without number or name");
        return None;
    };

    let rarity = match raw.rarity.as_deref() {
        None => Rarity::FALLBACK,
        Some(label) => {
            let (rarity, fell_back) = Rarity::parse_lenient(label);
            if fell_back {
                warn!(set_code, card_number = number, rarity = label, "unknown rarity, using default tier");
            }
            rarity
        }
    };

    Some(Card {
        id: None,
        set_code: set_code.to_string(),
        card_number: number.to_string(),
        name: name.to_string(),
        rarity,
        variant: raw.subtypes.first().cloned(),
        image_url: raw.images.as_ref().and_then(|i| i.small.clone()),
        description: raw.flavor_text.clone(),
        card_type: raw.types.first().cloned(),
        artist: raw.artist.clone(),
    })
}
