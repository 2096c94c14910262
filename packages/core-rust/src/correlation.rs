//! Per-request correlation identifiers.
//!
//! A correlation id follows one inbound request through the gateway, into the
//! forwarded request, back out on the response, and into every log line
//! written while the request is being processed.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the correlation id on inbound, forwarded, and response messages.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Opaque per-request identifier.
///
/// Inbound values are accepted verbatim (never normalized), so a caller that
/// supplied an id gets exactly the same bytes back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a fresh random id (UUID v4, 122 random bits).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Interprets raw inbound header bytes. Empty means absent.
    ///
    /// Header values may carry obs-text bytes that are not UTF-8; those are
    /// shown with replacement characters. Callers that forward the header
    /// must forward the original bytes, not this text.
    #[must_use]
    pub fn from_header_bytes(value: &[u8]) -> Option<Self> {
        if value.is_empty() {
            return None;
        }
        Some(Self(String::from_utf8_lossy(value).into_owned()))
    }

    /// Reuses the inbound value when present, otherwise generates one.
    ///
    /// Returns the id and whether it was freshly generated.
    #[must_use]
    pub fn resolve(inbound: Option<&[u8]>) -> (Self, bool) {
        match inbound.and_then(Self::from_header_bytes) {
            Some(existing) => (existing, false),
            None => (Self::generate(), true),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
