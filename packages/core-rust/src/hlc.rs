//! Hybrid Logical Clock (HLC) for event timestamps.
//!
//! Domain events are stamped when they are constructed. Two events built in
//! the same millisecond on the same process must still be ordered, and a
//! wall clock that steps backwards must not make a later event look older.
//! The HLC combines physical milliseconds with a logical counter to give a
//! strictly increasing [`Timestamp`] per process.
//!
//! # Wire format
//!
//! Timestamps serialize as a JSON object `{"millis":..,"counter":..,"nodeId":..}`.
//! `millis` is plain Unix-epoch milliseconds, so consumers that only care about
//! wall time can read that field and ignore the rest.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A hybrid logical timestamp combining physical time, logical counter, and node identity.
///
/// Ordering is defined as: millis first, then counter, then `node_id` (lexicographic byte order).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timestamp {
    /// Physical wall-clock milliseconds since Unix epoch.
    pub millis: u64,
    /// Logical counter for events within the same millisecond.
    pub counter: u32,
    /// Identifier of the process that generated this timestamp.
    pub node_id: String,
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.millis
            .cmp(&other.millis)
            .then_with(|| self.counter.cmp(&other.counter))
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.millis, self.counter, self.node_id)
    }
}

/// Abstraction over the system clock for dependency injection.
///
/// Allows deterministic testing by replacing the real clock with a manual one.
pub trait ClockSource: Send + Sync {
    /// Returns the current time as milliseconds since Unix epoch.
    fn now(&self) -> u64;
}

/// Default clock source that reads the real system time.
#[derive(Debug, Clone)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> u64 {
        // A clock before 1970 is treated as the epoch; the HLC counter keeps ordering intact.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Clock source whose time only moves when told to. Used by tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(start_millis)),
        }
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, AtomicOrdering::SeqCst);
    }

    pub fn advance(&self, delta_millis: u64) {
        self.millis.fetch_add(delta_millis, AtomicOrdering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> u64 {
        self.millis.load(AtomicOrdering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct ClockState {
    last_millis: u64,
    last_counter: u32,
}

/// Hybrid Logical Clock implementation.
///
/// When the system clock advances, the counter resets to 0. When the system
/// clock is unchanged or behind, the counter increments. The clock is shared
/// across tasks, so state sits behind a mutex held only for the arithmetic.
pub struct HLC {
    state: Mutex<ClockState>,
    node_id: String,
    clock_source: Box<dyn ClockSource>,
}

impl HLC {
    /// Creates a clock for `node_id` reading the real system time.
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self::with_clock(node_id, Box::new(SystemClock))
    }

    /// Creates a clock with an injected time source.
    #[must_use]
    pub fn with_clock(node_id: impl Into<String>, clock_source: Box<dyn ClockSource>) -> Self {
        Self {
            state: Mutex::new(ClockState::default()),
            node_id: node_id.into(),
            clock_source,
        }
    }

    /// The node identity stamped into every timestamp.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Generates the next timestamp. Every call returns a value strictly
    /// greater than the previous call on the same clock.
    pub fn now(&self) -> Timestamp {
        let physical = self.clock_source.now();
        let mut state = self.state.lock();

        if physical > state.last_millis {
            state.last_millis = physical;
            state.last_counter = 0;
        } else if state.last_counter == u32::MAX {
            state.last_millis += 1;
            state.last_counter = 0;
        } else {
            state.last_counter += 1;
        }

        Timestamp {
            millis: state.last_millis,
            counter: state.last_counter,
            node_id: self.node_id.clone(),
        }
    }
}

impl fmt::Debug for HLC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HLC").field("node_id", &self.node_id).finish_non_exhaustive()
    }
}
