//! User collection records.
//!
//! A `UserCard` is one catalog card owned by one user. Mutating a user's
//! collection is what produces [`DomainEvent`](crate::events::DomainEvent)s.

use serde::{Deserialize, Serialize};

/// Physical grading of an owned card, best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardCondition {
    Mint,
    #[default]
    NearMint,
    Excellent,
    Good,
    LightPlayed,
    Played,
    Poor,
}

/// Natural key of a collection entry: a user owns a given card at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCardKey {
    pub user_id: i64,
    pub card_id: i64,
}

/// A card in a user's collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCard {
    pub user_id: i64,
    pub card_id: i64,
    pub quantity: u32,
    pub condition: CardCondition,
    pub is_reverse_holo: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub notes: Option<String>,
}

impl UserCard {
    #[must_use]
    pub fn key(&self) -> UserCardKey {
        UserCardKey {
            user_id: self.user_id,
            card_id: self.card_id,
        }
    }
}

/// Fields a caller may set when adding or updating a collection entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCardChange {
    pub quantity: u32,
    #[serde(default)]
    pub condition: CardCondition,
    #[serde(default)]
    pub is_reverse_holo: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_uses_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&CardCondition::LightPlayed).unwrap(),
            "\"LIGHT_PLAYED\""
        );
    }

    #[test]
    fn change_defaults_condition_to_near_mint() {
        let change: UserCardChange = serde_json::from_str(r#"{"quantity":3}"#).unwrap();
        assert_eq!(change.condition, CardCondition::NearMint);
        assert!(!change.is_reverse_holo);
    }
}
