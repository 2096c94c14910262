//! HTTP handlers: probes on every process, plus the per-process APIs.

pub mod admin;
pub mod catalog;
pub mod collection;
pub mod health;

pub use admin::admin_router;
pub use catalog::catalog_router;
pub use collection::collection_router;
pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use super::ShutdownController;

/// State shared by the probe handlers.
#[derive(Clone)]
pub struct AppState {
    /// Name reported by `/health`, e.g. `gateway`.
    pub service: &'static str,
    pub shutdown: Arc<ShutdownController>,
    /// Process start time, used for uptime.
    pub start_time: Instant,
}
