//! Operator-triggered import endpoints.
//!
//! - `POST /admin/import/set/{set_id}`
//! - `POST /admin/import/recent?count=N` (default 5)

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use cardvault_core::ImportResult;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::importer::Importer;

const DEFAULT_RECENT_COUNT: u32 = 5;

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum ImportReply {
    Success {
        message: String,
        cards_imported: u32,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Serialize)]
struct BatchReply {
    status: &'static str,
    requested: u32,
    succeeded: usize,
    failed: usize,
    results: Vec<ImportResult>,
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    count: Option<u32>,
}

/// Routes for the import endpoints.
pub fn admin_router(importer: Arc<Importer>) -> Router {
    Router::new()
        .route("/admin/import/set/{set_id}", post(import_set))
        .route("/admin/import/recent", post(import_recent))
        .with_state(importer)
}

async fn import_set(State(importer): State<Arc<Importer>>, Path(set_id): Path<String>) -> Response {
    info!(%set_id, "admin import of one set");
    match importer.import_set(&set_id).await {
        Ok(done) => Json(ImportReply::Success {
            message: done.message(),
            cards_imported: done.cards_imported,
        })
        .into_response(),
        Err(e) => {
            counter!("import_set_failures_total").increment(1);
            error!(%set_id, error = %e, "set import failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ImportReply::Error {
                    message: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn import_recent(State(importer): State<Arc<Importer>>, Query(query): Query<RecentQuery>) -> Response {
    let count = query.count.unwrap_or(DEFAULT_RECENT_COUNT);
    info!(count, "admin import of recent sets");
    match importer.import_recent_sets(count).await {
        Ok(batch) => Json(BatchReply {
            status: "success",
            requested: count,
            succeeded: batch.succeeded(),
            failed: batch.failed(),
            results: batch.results,
        })
        .into_response(),
        Err(e) => {
            error!(error = %e, "recent set listing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ImportReply::Error {
                    message: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::extract::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::importer::{CardPage, CatalogSource, ImporterConfig, SourceCard, SourceError, SourceSet};
    use crate::storage::MemoryCatalogStore;

    /// Knows set `sv1` with two cards; every other set is unreachable.
    struct OneSetSource;

    #[async_trait]
    impl CatalogSource for OneSetSource {
        async fn fetch_set(&self, set_id: &str) -> Result<SourceSet, SourceError> {
            if set_id != "sv1" {
                return Err(SourceError::Http {
                    status: 404,
                    url: format!("/sets/{set_id}"),
                });
            }
            Ok(SourceSet {
                id: "sv1".into(),
                name: "Scarlet & Violet".into(),
                ..SourceSet::default()
            })
        }

        async fn fetch_cards(&self, _: &str, page: u32, page_size: u32) -> Result<CardPage, SourceError> {
            let cards = (1..=2)
                .map(|i| SourceCard {
                    number: Some(i.to_string()),
                    name: Some(format!("Card {i}")),
                    ..SourceCard::default()
                })
                .collect();
            Ok(CardPage {
                cards,
                undecodable: 0,
                page,
                page_size,
                total_count: 2,
            })
        }

        async fn recent_set_ids(&self, count: u32) -> Result<Vec<String>, SourceError> {
            Ok(["sv1", "gone1", "gone2", "gone3", "gone4", "gone5"]
                .iter()
                .take(count as usize)
                .map(ToString::to_string)
                .collect())
        }
    }

    fn app() -> Router {
        let importer = Importer::new(
            Arc::new(OneSetSource),
            Arc::new(MemoryCatalogStore::new()),
            ImporterConfig::default(),
        );
        admin_router(Arc::new(importer))
    }

    async fn post_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::post(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn import_set_reports_count() {
        let (status, json) = post_json(app(), "/admin/import/set/sv1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "success");
        assert_eq!(json["cards_imported"], 2);
        assert_eq!(
            json["message"],
            "Successfully imported 2 cards for set Scarlet & Violet"
        );
    }

    #[tokio::test]
    async fn failed_set_is_a_500_with_message() {
        let (status, json) = post_json(app(), "/admin/import/set/nope").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["status"], "error");
        assert!(json["message"].as_str().unwrap().contains("404"));
    }

    #[tokio::test]
    async fn recent_defaults_to_five_entries() {
        let (status, json) = post_json(app(), "/admin/import/recent").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["requested"], 5);
        assert_eq!(json["results"].as_array().unwrap().len(), 5);
        assert_eq!(json["succeeded"], 1);
        assert_eq!(json["results"][0]["status"], "success");
        assert_eq!(json["results"][1]["status"], "error");
    }

    #[tokio::test]
    async fn recent_honours_count() {
        let (_, json) = post_json(app(), "/admin/import/recent?count=2").await;
        assert_eq!(json["results"].as_array().unwrap().len(), 2);
    }
}
