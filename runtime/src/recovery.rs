//! Recovery supervisor
//!
//! Intercepts failures escalated by a wrapped consumer, renders a fallback in
//! its place, and offers two independent reset pathways that must not
//! conflict: an explicit manual reset and an automatic reset when a watched
//! key changes underneath the failure. Both pathways drive the same
//! `Clear -> Failed -> Clear` transition; reducer runs serialize under the
//! store's write lock, so whichever fires first wins and the other lands on a
//! clear state as a no-op.

use crate::{EffectHandle, Store, StoreError};
use keyfetch_core::environment::{Clock, FailureSink};
use keyfetch_core::error::FetchError;
use keyfetch_core::key::SubjectKey;
use keyfetch_core::prelude::{Effect, Failure, RecoveryAction, RecoveryState, Reducer};
use keyfetch_core::{SmallVec, smallvec};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// A reset callback supplied by the supervisor's owner
///
/// `on_reset` repairs the condition that caused the failure (typically by
/// resetting the subject key) before the wrapped subtree re-renders;
/// `on_keys_changed` reacts to an auto-reset.
pub type ResetHook = Arc<dyn Fn() + Send + Sync>;

/// Injected dependencies for the recovery supervisor
#[derive(Clone)]
pub struct RecoveryHooks<C> {
    clock: C,
    on_reset: Option<ResetHook>,
    on_keys_changed: Option<ResetHook>,
}

impl<C: Clock> RecoveryHooks<C> {
    /// Create hooks with the given clock and no callbacks
    #[must_use]
    pub const fn new(clock: C) -> Self {
        Self {
            clock,
            on_reset: None,
            on_keys_changed: None,
        }
    }

    /// Set the callback fired by a manual reset
    #[must_use]
    pub fn with_on_reset(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_reset = Some(Arc::new(hook));
        self
    }

    /// Set the callback fired by a key-driven auto-reset
    #[must_use]
    pub fn with_on_keys_changed(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_keys_changed = Some(Arc::new(hook));
        self
    }

    /// Effect invoking the manual-reset callback
    fn reset_effect<K>(&self) -> Effect<RecoveryAction<K>> {
        Self::fire(self.on_reset.clone())
    }

    /// Effect invoking the auto-reset callback
    fn keys_changed_effect<K>(&self) -> Effect<RecoveryAction<K>> {
        Self::fire(self.on_keys_changed.clone())
    }

    fn fire<K>(hook: Option<ResetHook>) -> Effect<RecoveryAction<K>> {
        match hook {
            Some(hook) => Effect::Future(Box::pin(async move {
                hook();
                None
            })),
            None => Effect::None,
        }
    }
}

/// The recovery reducer: `Clear -> Failed` (capture) `-> Clear` (reset)
pub struct RecoveryReducer<K, C> {
    _marker: PhantomData<(K, C)>,
}

impl<K, C> RecoveryReducer<K, C> {
    /// Create a new recovery reducer
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

// Manual impls: derives would put unwanted bounds on K and C
impl<K, C> Clone for RecoveryReducer<K, C> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<K, C> Default for RecoveryReducer<K, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, C> Reducer for RecoveryReducer<K, C>
where
    K: SubjectKey,
    C: Clock,
{
    type State = RecoveryState<K>;
    type Action = RecoveryAction<K>;
    type Environment = RecoveryHooks<C>;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            RecoveryAction::Captured { error } => {
                tracing::warn!(%error, "Failure captured, fallback takes over");
                metrics::counter!("recovery.captured").increment(1);

                // Snapshot the watched key set as of capture time; later
                // observations compare against this, not the live set
                state.failure = Some(Failure {
                    error,
                    watched_keys: state.watched_keys.clone(),
                    captured_at: env.clock.now(),
                });
                smallvec![Effect::None]
            }
            RecoveryAction::ResetManual => {
                if state.failure.take().is_some() {
                    tracing::info!("Manual reset, clearing failure");
                    metrics::counter!("recovery.reset.manual").increment(1);
                    smallvec![env.reset_effect()]
                } else {
                    // Already clear: a no-op, and no second side effect
                    tracing::debug!("Manual reset on clear supervisor, ignoring");
                    smallvec![Effect::None]
                }
            }
            RecoveryAction::KeysObserved { keys } => {
                let changed_under_failure = state
                    .failure
                    .as_ref()
                    .is_some_and(|failure| failure.watched_keys != keys);

                if changed_under_failure {
                    tracing::info!("Watched keys changed under failure, auto-clearing");
                    metrics::counter!("recovery.reset.keys").increment(1);
                    state.failure = None;
                    state.watched_keys = keys;
                    smallvec![env.keys_changed_effect()]
                } else {
                    state.watched_keys = keys;
                    smallvec![Effect::None]
                }
            }
        }
    }
}

/// The failure supervisor
///
/// Wraps a consumer/controller pairing: the pairing escalates terminal
/// errors here instead of rendering around them, and while a failure is
/// captured only the fallback is rendered. Two reset pathways exist because
/// the data that caused the failure may be owned outside the failed subtree
/// (a sibling fixes the key, so [`RecoveryCoordinator::observe_keys`]
/// auto-recovers) or only inside it (the fallback's retry affordance calls
/// [`RecoveryCoordinator::reset_manual`], whose `on_reset` hook repairs the
/// owning state first).
///
/// # Example
///
/// ```ignore
/// let hooks = RecoveryHooks::new(SystemClock)
///     .with_on_reset(move || owner.clear_subject());
/// let coordinator = RecoveryCoordinator::watching(vec!["ditto".to_string()], hooks);
///
/// coordinator.capture(error).await?;
/// assert!(coordinator.is_failed().await);
/// ```
pub struct RecoveryCoordinator<K, C>
where
    K: SubjectKey,
    C: Clock + Clone + Send + Sync + 'static,
{
    store: Store<RecoveryState<K>, RecoveryAction<K>, RecoveryHooks<C>, RecoveryReducer<K, C>>,
}

impl<K, C> Clone for RecoveryCoordinator<K, C>
where
    K: SubjectKey,
    C: Clock + Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<K, C> RecoveryCoordinator<K, C>
where
    K: SubjectKey,
    C: Clock + Clone + Send + Sync + 'static,
{
    /// Create a clear supervisor with an empty watched key set
    #[must_use]
    pub fn new(hooks: RecoveryHooks<C>) -> Self {
        Self {
            store: Store::new(RecoveryState::default(), RecoveryReducer::new(), hooks),
        }
    }

    /// Create a clear supervisor watching the given key set
    #[must_use]
    pub fn watching(watched_keys: Vec<K>, hooks: RecoveryHooks<C>) -> Self {
        Self {
            store: Store::new(
                RecoveryState::watching(watched_keys),
                RecoveryReducer::new(),
                hooks,
            ),
        }
    }

    /// Capture an escalated failure
    ///
    /// Snapshots the live watched key set and the clock time; the fallback
    /// renders from here until a reset clears the failure.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] if the supervisor is
    /// shutting down.
    pub async fn capture(&self, error: FetchError) -> Result<EffectHandle, StoreError> {
        self.store.send(RecoveryAction::Captured { error }).await
    }

    /// Explicit reset from the fallback's retry affordance
    ///
    /// Clears the failure and fires the `on_reset` hook so the owner can
    /// repair the offending condition before the wrapped subtree re-renders.
    /// Idempotent: on a clear supervisor this is a no-op and fires nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] if the supervisor is
    /// shutting down.
    pub async fn reset_manual(&self) -> Result<EffectHandle, StoreError> {
        self.store.send(RecoveryAction::ResetManual).await
    }

    /// Per-cycle key observation
    ///
    /// If failed and `keys` differs element-wise from the capture-time
    /// snapshot, clears the failure and fires `on_keys_changed`. The live
    /// watched set is refreshed either way. Called after the cycle's key
    /// changes are visible, so a key change and the reset it triggers are
    /// observed together.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] if the supervisor is
    /// shutting down.
    pub async fn observe_keys(&self, keys: Vec<K>) -> Result<EffectHandle, StoreError> {
        self.store.send(RecoveryAction::KeysObserved { keys }).await
    }

    /// The captured failure, if any; this is the fallback renderer's contract
    pub async fn failure(&self) -> Option<Failure<K>> {
        self.store.state(|s| s.failure.clone()).await
    }

    /// Whether a failure is currently captured
    pub async fn is_failed(&self) -> bool {
        self.store.state(RecoveryState::is_failed).await
    }

    /// The live watched key set
    pub async fn watched_keys(&self) -> Vec<K> {
        self.store.state(|s| s.watched_keys.clone()).await
    }

    /// Subscribe to supervisor snapshots, one per transition
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RecoveryState<K>> {
        self.store.subscribe_state()
    }

    /// Initiate graceful shutdown, draining hook effects
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if effects are still running
    /// when the timeout elapses.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        self.store.shutdown(timeout).await
    }
}

impl<K, C> FailureSink for RecoveryCoordinator<K, C>
where
    K: SubjectKey,
    C: Clock + Clone + Send + Sync + 'static,
{
    fn escalate(&self, error: FetchError) {
        // Fire-and-forget: escalation must not block the failing component
        let coordinator = self.clone();
        tokio::spawn(async move {
            if coordinator.capture(error).await.is_err() {
                tracing::warn!("Escalation dropped: supervisor is shutting down");
            }
        });
    }
}
