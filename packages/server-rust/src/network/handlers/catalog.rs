//! Read-only catalog endpoints.
//!
//! - `GET /sets/{set_code}`
//! - `GET /sets/{set_code}/cards`

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use cardvault_core::{Card, CardSet};
use serde_json::json;
use tracing::error;

use crate::storage::{CatalogStore, StoreError};

/// Why a catalog read produced no body.
#[derive(Debug)]
enum CatalogReadError {
    UnknownSet(String),
    Store(StoreError),
}

impl From<StoreError> for CatalogReadError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl IntoResponse for CatalogReadError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::UnknownSet(code) => (StatusCode::NOT_FOUND, format!("unknown set {code}")),
            Self::Store(e) => {
                error!(error = %e, "catalog read failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn catalog_router(store: Arc<dyn CatalogStore>) -> Router {
    Router::new()
        .route("/sets/{set_code}", get(get_set))
        .route("/sets/{set_code}/cards", get(list_cards))
        .with_state(store)
}

async fn get_set(
    State(store): State<Arc<dyn CatalogStore>>,
    Path(set_code): Path<String>,
) -> Result<Json<CardSet>, CatalogReadError> {
    store
        .find_set_by_code(&set_code)
        .await?
        .map(Json)
        .ok_or(CatalogReadError::UnknownSet(set_code))
}

/// Cards of a known set, ordered by card number. An unknown set is a 404
/// rather than an empty list.
async fn list_cards(
    State(store): State<Arc<dyn CatalogStore>>,
    Path(set_code): Path<String>,
) -> Result<Json<Vec<Card>>, CatalogReadError> {
    if store.find_set_by_code(&set_code).await?.is_none() {
        return Err(CatalogReadError::UnknownSet(set_code));
    }
    Ok(Json(store.list_cards_by_set(&set_code).await?))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::extract::Request;
    use cardvault_core::{GameType, Rarity};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::storage::MemoryCatalogStore;

    async fn seeded() -> Router {
        let store = Arc::new(MemoryCatalogStore::new());
        store
            .save_set(CardSet {
                id: None,
                set_code: "sv1".into(),
                name: "Scarlet & Violet".into(),
                game_type: GameType::Pokemon,
                description: None,
                release_date: None,
                total_cards: Some(2),
                logo_url: None,
            })
            .await
            .unwrap();
        for number in ["2", "1"] {
            store
                .save_card(Card {
                    id: None,
                    set_code: "sv1".into(),
                    card_number: number.into(),
                    name: format!("Card {number}"),
                    rarity: Rarity::Common,
                    variant: None,
                    image_url: None,
                    description: None,
                    card_type: None,
                    artist: None,
                })
                .await
                .unwrap();
        }
        catalog_router(store)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn reads_set_and_ordered_cards() {
        let app = seeded().await;
        let (status, set) = get_json(app.clone(), "/sets/sv1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(set["name"], "Scarlet & Violet");
        assert_eq!(set["setCode"], "sv1");

        let (status, cards) = get_json(app, "/sets/sv1/cards").await;
        assert_eq!(status, StatusCode::OK);
        let numbers: Vec<_> = cards
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["cardNumber"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(numbers, ["1", "2"]);
    }

    #[tokio::test]
    async fn unknown_set_is_404() {
        let app = seeded().await;
        let (status, body) = get_json(app.clone(), "/sets/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "unknown set nope");

        let (status, _) = get_json(app, "/sets/nope/cards").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
