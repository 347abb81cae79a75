//! # Keyfetch Core
//!
//! Core traits and types for the keyfetch request lifecycle architecture.
//!
//! This crate provides the vocabulary for building race-safe asynchronous
//! resource loading: a *subject key* that can change at any time drives an
//! asynchronous fetch, and a small status state machine is exposed to
//! whatever view layer consumes the result.
//!
//! ## Core Concepts
//!
//! - **State**: the lifecycle record for a feature ([`request::RequestState`],
//!   [`recovery::RecoveryState`])
//! - **Action**: all possible inputs to a reducer (key changes, settlements,
//!   resets)
//! - **Reducer**: pure function `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: side effect descriptions (not execution)
//! - **Environment**: injected dependencies via traits ([`environment::Fetcher`],
//!   [`environment::SlotStore`], [`environment::Clock`])
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell
//! - Unidirectional Data Flow
//! - Explicit Effects (no hidden I/O)
//! - Dependency Injection via Environment
//! - Invalid states are unrepresentable (closed sum types)
//!
//! ## Example
//!
//! ```ignore
//! use keyfetch_core::prelude::*;
//!
//! // The lifecycle of a fetch is a closed sum type: exactly the fields
//! // valid for each status exist, and nothing else.
//! match state.phase {
//!     Phase::Idle => render_placeholder(),
//!     Phase::Pending { ref key } => render_spinner(key),
//!     Phase::Resolved { ref value, .. } => render_value(value),
//!     Phase::Rejected { ref error, .. } => escalate(error),
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use smallvec::{SmallVec, smallvec};

pub mod error;
pub mod key;
pub mod recovery;
pub mod request;

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`
///
/// They contain all lifecycle logic and are deterministic and testable.
/// A reducer replaces state in a single pass under a single lock acquisition,
/// so a transition is atomic: no observer can see a half-applied update.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for lifecycle logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for RequestReducer {
    ///     type State = RequestState<String, Pokemon>;
    ///     type Action = RequestAction<String, Pokemon>;
    ///     type Environment = RequestEnvironment<String, Pokemon>;
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut Self::State,
    ///         action: Self::Action,
    ///         env: &Self::Environment,
    ///     ) -> SmallVec<[Effect<Self::Action>; 4]> {
    ///         // Lifecycle logic goes here
    ///         smallvec![Effect::None]
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action against the current state
        /// 2. Replaces state in place
        /// 3. Returns effect descriptions to be executed
        ///
        /// # Arguments
        ///
        /// - `state`: Mutable reference to current state
        /// - `action`: The action to process
        /// - `env`: Reference to injected dependencies
        ///
        /// # Returns
        ///
        /// Effects to be executed by the runtime
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the runtime.
/// They are values (not execution) and are returned from reducers.
pub mod effect {
    use futures::future::BoxFuture;

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are descriptions of what
    /// should happen, returned from reducers and executed by the Store
    /// runtime.
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if `Some`, the action is fed back into
        /// the reducer. A fetch effect resolves to the settlement action
        /// tagged with the generation that issued it.
        Future(BoxFuture<'static, Option<Action>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Whether this effect is the no-op effect
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter. Production wiring supplies real
/// implementations; tests supply deterministic mocks.
pub mod environment {
    use crate::error::FetchError;
    use chrono::{DateTime, Utc};
    use futures::future::BoxFuture;

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// struct SystemClock;
    /// impl Clock for SystemClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         Utc::now()
    ///     }
    /// }
    ///
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Fetcher trait - the asynchronous producer for a subject key
    ///
    /// A fetcher maps a key to an eventual value. Failures are reported as
    /// `Err`, never as sentinel values: a fetcher that decodes an upstream
    /// payload validates it and rejects malformed data with
    /// [`FetchError::Invalid`].
    ///
    /// The returned future is `'static`: implementations clone whatever they
    /// need out of `key` before going async, because the subject key may
    /// change while the fetch is in flight.
    pub trait Fetcher<K, V>: Send + Sync {
        /// Start a fetch for `key`
        fn fetch(&self, key: &K) -> BoxFuture<'static, Result<V, FetchError>>;
    }

    /// SlotStore trait - a key-value persistence collaborator
    ///
    /// Used only to seed an initial resolved state and to persist accepted
    /// resolutions. Last-write-wins; no transactional guarantees.
    pub trait SlotStore<K, V>: Send + Sync {
        /// Read the value stored under `slot`, if any
        fn get(&self, slot: &K) -> Option<V>;

        /// Store `value` under `slot`, replacing any previous value
        fn set(&self, slot: &K, value: V);
    }

    /// FailureSink trait - the escalation seam
    ///
    /// A component that detects a terminal error hands it to the sink rather
    /// than rendering around it, so a single supervisor can own recovery
    /// policy for many failure-prone subtrees. Escalation is fire-and-forget.
    pub trait FailureSink: Send + Sync {
        /// Hand a terminal error to the supervisor
        fn escalate(&self, error: FetchError);
    }
}

/// Commonly used imports for downstream crates
pub mod prelude {
    pub use crate::effect::Effect;
    pub use crate::environment::{Clock, FailureSink, Fetcher, SlotStore};
    pub use crate::error::FetchError;
    pub use crate::key::SubjectKey;
    pub use crate::recovery::{Failure, RecoveryAction, RecoveryState};
    pub use crate::reducer::Reducer;
    pub use crate::request::{Generation, Phase, RequestAction, RequestState};
    pub use crate::{SmallVec, smallvec};
}
