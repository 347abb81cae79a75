//! Request lifecycle vocabulary
//!
//! The lifecycle record for one subject key, modeled so that invalid field
//! combinations are unrepresentable: a value exists only while `Resolved`, an
//! error only while `Rejected`, and an `Idle` record carries no key at all.
//! There is no fifth status; code that would need one does not compile.

use crate::error::FetchError;

/// Monotonically increasing counter marking which issued fetch is current
///
/// Every time a new fetch is issued for a controller, the generation is
/// bumped and the fetch effect is tagged with the new value. On settlement
/// the reducer compares the tag against the state's generation; a mismatch
/// means the completion belongs to a superseded fetch and is discarded.
///
/// The comparison is by generation, not by issue order: promise settlement
/// order is not guaranteed to match issue order, so "last write wins" would
/// let a slow, stale fetch overwrite a fresh result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    /// The generation a freshly created controller starts at
    #[must_use]
    pub const fn initial() -> Self {
        Self(0)
    }

    /// The next generation
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The raw counter value
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The status of a request lifecycle, with exactly the fields valid for it
///
/// # Type Parameters
///
/// - `K`: subject key type
/// - `V`: fetched value type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase<K, V> {
    /// No subject key; nothing to fetch
    Idle,

    /// A fetch for `key` is in flight
    Pending {
        /// The subject key the in-flight fetch belongs to
        key: K,
    },

    /// The current generation's fetch succeeded
    Resolved {
        /// The subject key the value belongs to
        key: K,
        /// The fetched value
        value: V,
    },

    /// The current generation's fetch failed
    Rejected {
        /// The subject key the failure belongs to
        key: K,
        /// The captured failure
        error: FetchError,
    },
}

impl<K, V> Phase<K, V> {
    /// Whether the phase is `Idle`
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Whether a fetch is in flight
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// Whether the phase holds a resolved value
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    /// Whether the phase holds a captured failure
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Whether the phase has settled (resolved or rejected)
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.is_resolved() || self.is_rejected()
    }

    /// The subject key, absent only while `Idle`
    #[must_use]
    pub const fn key(&self) -> Option<&K> {
        match self {
            Self::Idle => None,
            Self::Pending { key }
            | Self::Resolved { key, .. }
            | Self::Rejected { key, .. } => Some(key),
        }
    }

    /// The resolved value, present only while `Resolved`
    #[must_use]
    pub const fn value(&self) -> Option<&V> {
        match self {
            Self::Resolved { value, .. } => Some(value),
            _ => None,
        }
    }

    /// The captured failure, present only while `Rejected`
    #[must_use]
    pub const fn error(&self) -> Option<&FetchError> {
        match self {
            Self::Rejected { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// The lifecycle record for one subject key
///
/// Replaced wholesale by the reducer on every transition; `generation` and
/// `phase` always change together, so no observer can see a half-applied
/// update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestState<K, V> {
    /// The controller's current generation
    pub generation: Generation,

    /// The current lifecycle status and its payload
    pub phase: Phase<K, V>,
}

impl<K, V> RequestState<K, V> {
    /// A fresh record: initial generation, idle
    #[must_use]
    pub const fn new() -> Self {
        Self {
            generation: Generation::initial(),
            phase: Phase::Idle,
        }
    }

    /// A record seeded from a persisted value, resolved at the initial
    /// generation
    #[must_use]
    pub const fn seeded(key: K, value: V) -> Self {
        Self {
            generation: Generation::initial(),
            phase: Phase::Resolved { key, value },
        }
    }
}

impl<K, V> Default for RequestState<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// All possible inputs to the request lifecycle reducer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestAction<K, V> {
    /// The subject key changed
    ///
    /// A blank key (per [`SubjectKey::is_blank`](crate::key::SubjectKey))
    /// behaves like [`RequestAction::KeyCleared`].
    KeyChanged {
        /// The new subject key
        key: K,
    },

    /// The subject key was removed; transition to idle without issuing work
    KeyCleared,

    /// A fetch issued at `generation` resolved with `value`
    FetchResolved {
        /// The generation the fetch was issued at
        generation: Generation,
        /// The fetched value
        value: V,
    },

    /// A fetch issued at `generation` failed with `error`
    FetchRejected {
        /// The generation the fetch was issued at
        generation: Generation,
        /// The failure reported by the fetcher
        error: FetchError,
    },
}
