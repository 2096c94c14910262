//! Load-balancing policies over a freshly resolved endpoint list.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use rand::Rng;

use super::discovery::Endpoint;

/// Picks one endpoint out of a resolution. Returns `None` only for an empty list.
pub trait LoadBalancer: Send + Sync {
    fn choose<'a>(&self, service_name: &str, endpoints: &'a [Endpoint]) -> Option<&'a Endpoint>;
}

/// Rotates through endpoints, one cursor per service.
///
/// The cursor survives across resolutions, so when membership changes the
/// rotation continues from the same position modulo the new length.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursors: DashMap<String, AtomicUsize>,
}

impl RoundRobin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn choose<'a>(&self, service_name: &str, endpoints: &'a [Endpoint]) -> Option<&'a Endpoint> {
        if endpoints.is_empty() {
            return None;
        }
        let turn = match self.cursors.get(service_name) {
            Some(cursor) => cursor.fetch_add(1, Ordering::Relaxed),
            None => self
                .cursors
                .entry(service_name.to_string())
                .or_default()
                .fetch_add(1, Ordering::Relaxed),
        };
        endpoints.get(turn % endpoints.len())
    }
}

/// Uniformly random choice.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomChoice;

impl LoadBalancer for RandomChoice {
    fn choose<'a>(&self, _service_name: &str, endpoints: &'a [Endpoint]) -> Option<&'a Endpoint> {
        if endpoints.is_empty() {
            return None;
        }
        endpoints.get(rand::rng().random_range(0..endpoints.len()))
    }
}
