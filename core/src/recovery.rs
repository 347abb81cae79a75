//! Recovery supervisor vocabulary
//!
//! A supervisor intercepts failures escalated by a wrapped consumer, renders
//! a fallback in its place, and offers two independent reset pathways: an
//! explicit manual reset (the "try again" affordance inside the fallback) and
//! an automatic reset when a watched key changes underneath the failure.

use crate::error::FetchError;
use chrono::{DateTime, Utc};

/// A captured failure, frozen at capture time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure<K> {
    /// The escalated error
    pub error: FetchError,

    /// Snapshot of the watched key set in effect when the failure was
    /// captured; compared element-wise against later observations
    pub watched_keys: Vec<K>,

    /// When the failure was captured, per the injected clock
    pub captured_at: DateTime<Utc>,
}

/// Supervisor-level state: `Clear -> Failed` (capture) `-> Clear` (reset)
///
/// While `failure` is `Some`, the wrapped consumer tree is not rendered;
/// only the fallback is, until a reset clears it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryState<K> {
    /// The live watched key set, refreshed each evaluation cycle
    pub watched_keys: Vec<K>,

    /// The captured failure, if the supervisor is in the failed state
    pub failure: Option<Failure<K>>,
}

impl<K> RecoveryState<K> {
    /// A clear supervisor watching the given key set
    #[must_use]
    pub const fn watching(watched_keys: Vec<K>) -> Self {
        Self {
            watched_keys,
            failure: None,
        }
    }

    /// Whether a failure is currently captured
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

impl<K> Default for RecoveryState<K> {
    fn default() -> Self {
        Self::watching(Vec::new())
    }
}

/// All possible inputs to the recovery reducer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction<K> {
    /// A wrapped subtree escalated a terminal error
    Captured {
        /// The escalated error
        error: FetchError,
    },

    /// Explicit user action from the fallback's retry affordance
    ///
    /// Idempotent: on a clear supervisor this is a no-op and fires nothing.
    ResetManual,

    /// The per-cycle key observation
    ///
    /// If failed and `keys` differs from the capture-time snapshot, the
    /// failure auto-clears. The live watched set is refreshed either way.
    KeysObserved {
        /// The watched key set as of this evaluation cycle
        keys: Vec<K>,
    },
}
