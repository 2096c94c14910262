//! Collection REST endpoints.
//!
//! - `GET    /api/collections/users/{user_id}/cards`
//! - `POST   /api/collections/users/{user_id}/cards`
//! - `GET    /api/collections/users/{user_id}/cards/{card_id}`
//! - `PUT    /api/collections/users/{user_id}/cards/{card_id}`
//! - `DELETE /api/collections/users/{user_id}/cards/{card_id}`

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use cardvault_core::{UserCard, UserCardChange};
use serde::Deserialize;
use serde_json::json;

use crate::collection::{CollectionError, CollectionService};
use crate::storage::StoreError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddCardRequest {
    card_id: i64,
    #[serde(flatten)]
    change: UserCardChange,
}

impl IntoResponse for CollectionError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::AlreadyOwned { .. } | Self::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            Self::NotOwned { .. } | Self::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Store(StoreError::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn collection_router(service: CollectionService) -> Router {
    Router::new()
        .route(
            "/api/collections/users/{user_id}/cards",
            get(list_cards).post(add_card),
        )
        .route(
            "/api/collections/users/{user_id}/cards/{card_id}",
            get(get_card).put(update_card).delete(remove_card),
        )
        .with_state(service)
}

async fn list_cards(
    State(service): State<CollectionService>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<UserCard>>, CollectionError> {
    Ok(Json(service.list(user_id).await?))
}

async fn add_card(
    State(service): State<CollectionService>,
    Path(user_id): Path<i64>,
    Json(body): Json<AddCardRequest>,
) -> Result<(StatusCode, Json<UserCard>), CollectionError> {
    let card = service.add_card(user_id, body.card_id, body.change).await?;
    Ok((StatusCode::CREATED, Json(card)))
}

async fn get_card(
    State(service): State<CollectionService>,
    Path((user_id, card_id)): Path<(i64, i64)>,
) -> Result<Json<UserCard>, CollectionError> {
    Ok(Json(service.get_card(user_id, card_id).await?))
}

async fn update_card(
    State(service): State<CollectionService>,
    Path((user_id, card_id)): Path<(i64, i64)>,
    Json(change): Json<UserCardChange>,
) -> Result<Json<UserCard>, CollectionError> {
    Ok(Json(service.update_card(user_id, card_id, change).await?))
}

async fn remove_card(
    State(service): State<CollectionService>,
    Path((user_id, card_id)): Path<(i64, i64)>,
) -> Result<StatusCode, CollectionError> {
    service.remove_card(user_id, card_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
