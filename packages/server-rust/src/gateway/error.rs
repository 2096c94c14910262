//! Client-facing gateway failures.

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde::Serialize;

use super::correlation;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no route matches {0}")]
    RouteNotFound(String),
    /// Discovery returned no endpoints. Transient; clients may retry.
    #[error("service {0} is currently unavailable")]
    ServiceUnavailable(String),
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("invalid upstream uri {0}")]
    InvalidUpstreamUri(String),
}

impl GatewayError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteNotFound(_) => StatusCode::NOT_FOUND,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) | Self::InvalidUpstreamUri(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Label used for the `outcome` metric dimension and the JSON `error` field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RouteNotFound(_) => "route_not_found",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Upstream(_) => "upstream_error",
            Self::InvalidUpstreamUri(_) => "invalid_upstream_uri",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
            correlation_id: correlation::current().map(|id| id.to_string()),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
