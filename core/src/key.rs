//! Subject keys
//!
//! The subject key is the externally supplied identifier driving what value
//! to fetch: a pokemon name, a move index, a storage slot. Keys can change at
//! any time, including while a fetch is in flight.

/// A subject key that can drive a request lifecycle
///
/// Blankness is the typed rendition of the "empty/absent key" rule: a blank
/// key always transitions the lifecycle to `Idle` and never issues a fetch.
/// String-like keys are blank when they trim to empty; index keys never are
/// and are cleared through the explicit clear operation instead.
pub trait SubjectKey: Clone + Eq + std::fmt::Debug + Send + Sync + 'static {
    /// Whether this key counts as empty/absent
    fn is_blank(&self) -> bool {
        false
    }
}

impl SubjectKey for String {
    fn is_blank(&self) -> bool {
        self.trim().is_empty()
    }
}

impl SubjectKey for usize {}
impl SubjectKey for u32 {}
impl SubjectKey for u64 {}
