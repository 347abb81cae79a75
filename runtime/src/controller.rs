//! Request lifecycle controller
//!
//! Owns the [`RequestState`] for a single subject key and guarantees that
//! only the most recent fetch's result is ever observed. Every fetch effect
//! is tagged with the generation that issued it; the reducer discards any
//! settlement whose tag no longer matches. The comparison is by generation,
//! not issue order, because settlement order is not guaranteed to match
//! issue order.

use crate::{EffectHandle, Store, StoreError};
use keyfetch_core::environment::{FailureSink, Fetcher, SlotStore};
use keyfetch_core::error::FetchError;
use keyfetch_core::key::SubjectKey;
use keyfetch_core::prelude::{Effect, Generation, Phase, Reducer, RequestAction, RequestState};
use keyfetch_core::{SmallVec, smallvec};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Injected dependencies for the request lifecycle
///
/// The fetcher is required; the slot store and fetch deadline are optional.
/// Environment methods return [`Effect`] descriptions, never perform I/O
/// themselves.
#[derive(Clone)]
pub struct RequestEnvironment<K, V> {
    fetcher: Arc<dyn Fetcher<K, V>>,
    slot_store: Option<Arc<dyn SlotStore<K, V>>>,
    fetch_timeout: Option<Duration>,
}

impl<K, V> RequestEnvironment<K, V>
where
    K: SubjectKey,
    V: Clone + Send + Sync + 'static,
{
    /// Create an environment around a fetcher
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher<K, V>>) -> Self {
        Self {
            fetcher,
            slot_store: None,
            fetch_timeout: None,
        }
    }

    /// Attach a slot store for seeding and persisting resolved values
    #[must_use]
    pub fn with_slot_store(mut self, slot_store: Arc<dyn SlotStore<K, V>>) -> Self {
        self.slot_store = Some(slot_store);
        self
    }

    /// Set a deadline for each fetch
    ///
    /// An elapsed deadline settles the generation as `Rejected` with
    /// [`FetchError::Timeout`].
    #[must_use]
    pub const fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Read the persisted value for `key`, if a slot store is attached
    #[must_use]
    pub fn stored_value(&self, key: &K) -> Option<V> {
        self.slot_store.as_ref().and_then(|store| store.get(key))
    }

    /// Build the fetch effect for `key`, tagged with `generation`
    fn issue_fetch(&self, key: &K, generation: Generation) -> Effect<RequestAction<K, V>> {
        metrics::counter!("request.fetch.issued").increment(1);

        let fut = self.fetcher.fetch(key);
        let deadline = self.fetch_timeout;

        Effect::Future(Box::pin(async move {
            let result = match deadline {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(settled) => settled,
                    Err(_) => Err(FetchError::Timeout(limit)),
                },
                None => fut.await,
            };

            Some(match result {
                Ok(value) => RequestAction::FetchResolved { generation, value },
                Err(error) => RequestAction::FetchRejected { generation, error },
            })
        }))
    }

    /// Build the persistence effect for an accepted resolution
    ///
    /// Fire-and-forget, last-write-wins; produces no feedback action.
    fn persist(&self, key: K, value: V) -> Effect<RequestAction<K, V>> {
        match &self.slot_store {
            Some(slot_store) => {
                let slot_store = Arc::clone(slot_store);
                Effect::Future(Box::pin(async move {
                    slot_store.set(&key, value);
                    None
                }))
            }
            None => Effect::None,
        }
    }
}

/// The request lifecycle reducer
///
/// Pure: all asynchrony lives in the effects it returns.
pub struct RequestReducer<K, V> {
    _marker: PhantomData<(K, V)>,
}

impl<K, V> RequestReducer<K, V> {
    /// Create a new request reducer
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

// Manual impls: derives would put unwanted bounds on K and V
impl<K, V> Clone for RequestReducer<K, V> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<K, V> Default for RequestReducer<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Reducer for RequestReducer<K, V>
where
    K: SubjectKey,
    V: Clone + Send + Sync + 'static,
{
    type State = RequestState<K, V>;
    type Action = RequestAction<K, V>;
    type Environment = RequestEnvironment<K, V>;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            RequestAction::KeyChanged { key } if key.is_blank() => {
                // Empty/absent subject key: idle, and no work issued
                tracing::debug!("Blank subject key, going idle");
                *state = RequestState {
                    generation: state.generation,
                    phase: Phase::Idle,
                };
                smallvec![Effect::None]
            }
            RequestAction::KeyChanged { key } => {
                let generation = state.generation.next();
                tracing::debug!(%generation, ?key, "Subject key changed, issuing fetch");

                let fetch = env.issue_fetch(&key, generation);
                *state = RequestState {
                    generation,
                    phase: Phase::Pending { key },
                };
                smallvec![fetch]
            }
            RequestAction::KeyCleared => {
                tracing::debug!("Subject key cleared, going idle");
                *state = RequestState {
                    generation: state.generation,
                    phase: Phase::Idle,
                };
                smallvec![Effect::None]
            }
            RequestAction::FetchResolved { generation, value } => match &state.phase {
                Phase::Pending { key } if generation == state.generation => {
                    tracing::debug!(%generation, "Fetch resolved");
                    let key = key.clone();
                    let persist = env.persist(key.clone(), value.clone());
                    *state = RequestState {
                        generation,
                        phase: Phase::Resolved { key, value },
                    };
                    smallvec![persist]
                }
                _ => {
                    // Stale: a newer key change superseded this fetch.
                    // Expected race outcome, not a failure.
                    tracing::trace!(
                        %generation,
                        current = %state.generation,
                        "Discarding stale resolution"
                    );
                    metrics::counter!("request.fetch.stale_dropped").increment(1);
                    smallvec![Effect::None]
                }
            },
            RequestAction::FetchRejected { generation, error } => match &state.phase {
                Phase::Pending { key } if generation == state.generation => {
                    tracing::debug!(%generation, %error, "Fetch rejected");
                    metrics::counter!("request.fetch.rejected").increment(1);
                    let key = key.clone();
                    *state = RequestState {
                        generation,
                        phase: Phase::Rejected { key, error },
                    };
                    smallvec![Effect::None]
                }
                _ => {
                    tracing::trace!(
                        %generation,
                        current = %state.generation,
                        "Discarding stale rejection"
                    );
                    metrics::counter!("request.fetch.stale_dropped").increment(1);
                    smallvec![Effect::None]
                }
            },
        }
    }
}

/// The lifecycle controller for one subject key
///
/// A thin facade over a [`Store`] running the [`RequestReducer`]. The
/// controller owns its state exclusively; consumers read snapshots through
/// [`RequestController::subscribe`] and never mutate.
///
/// # Example
///
/// ```ignore
/// let env = RequestEnvironment::new(fetcher);
/// let controller = RequestController::new(env);
///
/// let mut handle = controller.set_key("pikachu".to_string()).await?;
/// handle.wait().await;
/// assert!(controller.snapshot().await.phase.is_resolved());
/// ```
pub struct RequestController<K, V>
where
    K: SubjectKey,
    V: Clone + Send + Sync + 'static,
{
    store: Store<RequestState<K, V>, RequestAction<K, V>, RequestEnvironment<K, V>, RequestReducer<K, V>>,
}

impl<K, V> Clone for RequestController<K, V>
where
    K: SubjectKey,
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<K, V> RequestController<K, V>
where
    K: SubjectKey,
    V: Clone + Send + Sync + 'static,
{
    /// Create a controller starting idle
    #[must_use]
    pub fn new(environment: RequestEnvironment<K, V>) -> Self {
        Self {
            store: Store::new(RequestState::new(), RequestReducer::new(), environment),
        }
    }

    /// Create a controller seeded from the environment's slot store
    ///
    /// If the store holds a value for `key`, the controller starts
    /// `Resolved` at the initial generation; otherwise it starts idle and
    /// the caller kicks off the first fetch with [`RequestController::set_key`].
    #[must_use]
    pub fn seeded(environment: RequestEnvironment<K, V>, key: K) -> Self {
        let initial = match environment.stored_value(&key) {
            Some(value) => RequestState::seeded(key, value),
            None => RequestState::new(),
        };

        Self {
            store: Store::new(initial, RequestReducer::new(), environment),
        }
    }

    /// Change the subject key
    ///
    /// A blank key transitions to idle without issuing work; any other key
    /// bumps the generation and starts a fetch. The returned handle resolves
    /// once the fetch has settled and its settlement has been applied (or
    /// discarded as stale).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] if the controller is
    /// shutting down.
    pub async fn set_key(&self, key: K) -> Result<EffectHandle, StoreError> {
        self.store.send(RequestAction::KeyChanged { key }).await
    }

    /// Remove the subject key, transitioning to idle
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] if the controller is
    /// shutting down.
    pub async fn clear_key(&self) -> Result<EffectHandle, StoreError> {
        self.store.send(RequestAction::KeyCleared).await
    }

    /// Change the subject key and wait for its settlement
    ///
    /// Request-response helper: returns the settled state for `key` once the
    /// fetch it triggered has been applied. Settlements of superseded
    /// generations are ignored while waiting.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Timeout`]: no settlement for `key` within `timeout`
    /// - [`StoreError::ChannelClosed`]: the controller's broadcast closed
    /// - [`StoreError::ShutdownInProgress`]: the controller is shutting down
    pub async fn set_key_and_settle(
        &self,
        key: K,
        timeout: Duration,
    ) -> Result<RequestState<K, V>, StoreError> {
        if key.is_blank() {
            self.store.send(RequestAction::KeyChanged { key }).await?;
            return Ok(self.snapshot().await);
        }

        // Subscribe before sending so the settlement cannot slip past
        let mut rx = self.store.subscribe_actions();
        self.store
            .send(RequestAction::KeyChanged { key: key.clone() })
            .await?;

        tokio::time::timeout(timeout, async {
            loop {
                match rx.recv().await {
                    Ok(
                        RequestAction::FetchResolved { .. } | RequestAction::FetchRejected { .. },
                    ) => {
                        let snapshot = self.snapshot().await;
                        if snapshot.phase.is_settled() && snapshot.phase.key() == Some(&key) {
                            return Ok(snapshot);
                        }
                        // A settlement for a superseded generation; keep waiting
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Settlement observer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(StoreError::ChannelClosed);
                    }
                }
            }
        })
        .await
        .map_err(|_| StoreError::Timeout)?
    }

    /// Clone the current lifecycle snapshot
    pub async fn snapshot(&self) -> RequestState<K, V> {
        self.store.snapshot().await
    }

    /// Read current state via a closure
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&RequestState<K, V>) -> T,
    {
        self.store.state(f).await
    }

    /// Subscribe to lifecycle snapshots, one per transition
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RequestState<K, V>> {
        self.store.subscribe_state()
    }

    /// Escalate a captured rejection to a supervisor
    ///
    /// If the current phase is `Rejected`, hands the error to `sink` and
    /// returns `true`; otherwise does nothing and returns `false`. The
    /// rejected state itself is left untouched: recovery is the
    /// supervisor's decision.
    pub async fn escalate_rejection(&self, sink: &dyn FailureSink) -> bool {
        let snapshot = self.snapshot().await;
        match snapshot.phase {
            Phase::Rejected { error, .. } => {
                sink.escalate(error);
                true
            }
            _ => false,
        }
    }

    /// Initiate graceful shutdown, draining in-flight fetches
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if effects are still running
    /// when the timeout elapses.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        self.store.shutdown(timeout).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use keyfetch_testing::assertions::{assert_has_future_effect, assert_no_effects};
    use keyfetch_testing::mocks::StaticFetcher;
    use keyfetch_testing::reducer_test::ReducerTest;

    fn env() -> RequestEnvironment<String, u32> {
        RequestEnvironment::new(Arc::new(StaticFetcher::<String, u32>::new()))
    }

    #[test]
    fn test_blank_key_goes_idle_without_work() {
        ReducerTest::new(RequestReducer::new())
            .with_env(env())
            .given_state(RequestState::default())
            .when_action(RequestAction::KeyChanged {
                key: "   ".to_string(),
            })
            .then_state(|state: &RequestState<String, u32>| {
                assert!(state.phase.is_idle());
                assert_eq!(state.generation, Generation::initial());
            })
            .then_effects(|effects| {
                assert_no_effects(effects);
            })
            .run();
    }

    #[test]
    fn test_key_change_bumps_generation_and_issues_fetch() {
        ReducerTest::new(RequestReducer::new())
            .with_env(env())
            .given_state(RequestState::default())
            .when_action(RequestAction::KeyChanged {
                key: "pikachu".to_string(),
            })
            .then_state(|state: &RequestState<String, u32>| {
                assert_eq!(state.generation, Generation::initial().next());
                assert!(state.phase.is_pending());
                assert_eq!(state.phase.key().map(String::as_str), Some("pikachu"));
            })
            .then_effects(|effects| {
                assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn test_current_generation_resolution_is_applied() {
        let generation = Generation::initial().next();
        ReducerTest::new(RequestReducer::new())
            .with_env(env())
            .given_state(RequestState {
                generation,
                phase: Phase::Pending {
                    key: "pikachu".to_string(),
                },
            })
            .when_action(RequestAction::FetchResolved {
                generation,
                value: 25u32,
            })
            .then_state(move |state: &RequestState<String, u32>| {
                assert_eq!(state.generation, generation);
                assert_eq!(state.phase.value(), Some(&25));
            })
            .run();
    }

    #[test]
    fn test_stale_resolution_is_discarded() {
        let stale = Generation::initial().next();
        let current = stale.next();
        ReducerTest::new(RequestReducer::new())
            .with_env(env())
            .given_state(RequestState {
                generation: current,
                phase: Phase::Pending {
                    key: "pikachu".to_string(),
                },
            })
            .when_action(RequestAction::FetchResolved {
                generation: stale,
                value: 132u32,
            })
            .then_state(move |state: &RequestState<String, u32>| {
                // The superseded fetch must not be visible
                assert_eq!(state.generation, current);
                assert!(state.phase.is_pending());
            })
            .then_effects(|effects| {
                assert_no_effects(effects);
            })
            .run();
    }

    #[test]
    fn test_current_generation_rejection_is_applied() {
        let generation = Generation::initial().next();
        ReducerTest::new(RequestReducer::new())
            .with_env(env())
            .given_state(RequestState {
                generation,
                phase: Phase::Pending {
                    key: "missingno".to_string(),
                },
            })
            .when_action(RequestAction::FetchRejected {
                generation,
                error: FetchError::not_found("missingno"),
            })
            .then_state(|state: &RequestState<String, u32>| {
                assert!(state.phase.is_rejected());
                assert_eq!(
                    state.phase.error(),
                    Some(&FetchError::not_found("missingno"))
                );
            })
            .run();
    }

    #[test]
    fn test_settlement_after_clear_is_discarded() {
        let generation = Generation::initial().next();
        ReducerTest::new(RequestReducer::new())
            .with_env(env())
            .given_state(RequestState {
                generation,
                phase: Phase::Idle,
            })
            .when_action(RequestAction::FetchResolved {
                generation,
                value: 25u32,
            })
            .then_state(|state: &RequestState<String, u32>| {
                // Key was cleared while the fetch was in flight
                assert!(state.phase.is_idle());
            })
            .then_effects(|effects| {
                assert_no_effects(effects);
            })
            .run();
    }
}
