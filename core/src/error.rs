//! Error types for fetch operations
//!
//! A fetch can fail in exactly four ways, and the taxonomy is closed: the
//! consumer matches on it, the supervisor stores it, and nothing else is
//! representable. Errors are `Clone + PartialEq` so they can live inside
//! lifecycle state and be asserted on directly in tests.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by a [`Fetcher`](crate::environment::Fetcher)
///
/// A transient fetch failure transitions the request to `Rejected` and is
/// then the consumer's responsibility to surface, typically by escalating to
/// a supervisor. Failures are never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The subject key names nothing the producer knows about
    #[error("no value found for key `{key}`")]
    NotFound {
        /// Display form of the key that missed
        key: String,
    },

    /// The upstream producer failed (transport error, refused request, ...)
    #[error("upstream fetch failed: {0}")]
    Upstream(String),

    /// The fetched payload decoded but failed validation
    ///
    /// A validating fetcher rejects malformed or partial data instead of
    /// resolving with it, so a `Resolved` state always holds a usable value.
    #[error("fetched value failed validation: {0}")]
    Invalid(String),

    /// The configured fetch deadline elapsed before settlement
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    /// Build a `NotFound` error from any displayable key
    #[must_use]
    pub fn not_found(key: impl std::fmt::Display) -> Self {
        Self::NotFound {
            key: key.to_string(),
        }
    }

    /// Whether this error is worth offering a retry affordance for
    ///
    /// Timeouts and upstream failures are transient; a missing or invalid
    /// value will not fix itself by retrying with the same key.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::Timeout(_))
    }
}
