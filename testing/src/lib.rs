//! # Keyfetch Testing
//!
//! Testing utilities and mock environments for the keyfetch architecture.
//!
//! This crate provides:
//! - Mock implementations of the environment traits (clock, fetcher, slot
//!   store)
//! - A fluent Given-When-Then harness for reducers ([`ReducerTest`])
//! - Assertion helpers for effects
//!
//! ## Example
//!
//! ```ignore
//! use keyfetch_testing::mocks::{GatedFetcher, test_clock};
//!
//! let fetcher = Arc::new(GatedFetcher::new());
//! let controller = RequestController::new(RequestEnvironment::new(fetcher.clone()));
//!
//! controller.set_key("ditto".to_string()).await?;
//! controller.set_key("pikachu".to_string()).await?;
//!
//! // The test, not the scheduler, decides settlement order
//! fetcher.resolve(&"pikachu".to_string(), pikachu());
//! fetcher.resolve(&"ditto".to_string(), ditto());
//! ```

use chrono::{DateTime, Utc};
use keyfetch_core::environment::Clock;


/// Mock implementations of the environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use futures::future::BoxFuture;
    use keyfetch_core::environment::{Fetcher, SlotStore};
    use keyfetch_core::error::FetchError;
    use keyfetch_core::key::SubjectKey;
    use std::collections::{HashMap, VecDeque};
    use std::hash::Hash;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard};
    use tokio::sync::oneshot;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use keyfetch_testing::mocks::FixedClock;
    /// use keyfetch_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Recover the inner value from a possibly poisoned mutex
    ///
    /// Tests want the state even if another test thread panicked with the
    /// lock held.
    fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Scripted fetcher with an immediate, per-key result table
    ///
    /// Keys without a scripted entry reject with [`FetchError::NotFound`].
    /// The call counter lets tests assert a fetch was (or wasn't) issued.
    pub struct StaticFetcher<K, V> {
        results: Mutex<HashMap<K, Result<V, FetchError>>>,
        calls: AtomicUsize,
    }

    impl<K, V> StaticFetcher<K, V>
    where
        K: SubjectKey + Hash,
        V: Clone,
    {
        /// Create an empty fetcher; every key rejects as not found
        #[must_use]
        pub fn new() -> Self {
            Self {
                results: Mutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
            }
        }

        /// Script `key` to resolve with `value`
        #[must_use]
        pub fn resolves(self, key: K, value: V) -> Self {
            lock_unpoisoned(&self.results).insert(key, Ok(value));
            self
        }

        /// Script `key` to reject with `error`
        #[must_use]
        pub fn rejects(self, key: K, error: FetchError) -> Self {
            lock_unpoisoned(&self.results).insert(key, Err(error));
            self
        }

        /// Number of fetches issued so far
        #[must_use]
        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl<K, V> Default for StaticFetcher<K, V>
    where
        K: SubjectKey + Hash,
        V: Clone,
    {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<K, V> Fetcher<K, V> for StaticFetcher<K, V>
    where
        K: SubjectKey + Hash,
        V: Clone + Send + 'static,
    {
        fn fetch(&self, key: &K) -> BoxFuture<'static, Result<V, FetchError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let result = lock_unpoisoned(&self.results)
                .get(key)
                .cloned()
                .unwrap_or_else(|| Err(FetchError::not_found(format!("{key:?}"))));
            Box::pin(async move { result })
        }
    }

    /// Fetcher whose settlements are released by the test, not the scheduler
    ///
    /// Each fetch parks on a gate until the test releases it with
    /// [`GatedFetcher::resolve`] or [`GatedFetcher::reject`]. Releases are
    /// per key, oldest fetch first, so a test can settle fetches in any
    /// order it likes. That is the lever for exercising the
    /// stale-completion race.
    pub struct GatedFetcher<K, V> {
        gates: Mutex<HashMap<K, VecDeque<oneshot::Sender<Result<V, FetchError>>>>>,
    }

    impl<K, V> GatedFetcher<K, V>
    where
        K: SubjectKey + Hash,
        V: Send + 'static,
    {
        /// Create a fetcher with no parked fetches
        #[must_use]
        pub fn new() -> Self {
            Self {
                gates: Mutex::new(HashMap::new()),
            }
        }

        /// Number of fetches currently parked for `key`
        #[must_use]
        pub fn pending(&self, key: &K) -> usize {
            lock_unpoisoned(&self.gates)
                .get(key)
                .map_or(0, VecDeque::len)
        }

        /// Release the oldest parked fetch for `key` with `result`
        ///
        /// Returns `false` if no fetch is parked for `key`.
        pub fn release(&self, key: &K, result: Result<V, FetchError>) -> bool {
            let gate = lock_unpoisoned(&self.gates)
                .get_mut(key)
                .and_then(VecDeque::pop_front);

            match gate {
                Some(tx) => tx.send(result).is_ok(),
                None => false,
            }
        }

        /// Release the oldest parked fetch for `key` with a resolution
        pub fn resolve(&self, key: &K, value: V) -> bool {
            self.release(key, Ok(value))
        }

        /// Release the oldest parked fetch for `key` with a rejection
        pub fn reject(&self, key: &K, error: FetchError) -> bool {
            self.release(key, Err(error))
        }
    }

    impl<K, V> Default for GatedFetcher<K, V>
    where
        K: SubjectKey + Hash,
        V: Send + 'static,
    {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<K, V> Fetcher<K, V> for GatedFetcher<K, V>
    where
        K: SubjectKey + Hash,
        V: Send + 'static,
    {
        fn fetch(&self, key: &K) -> BoxFuture<'static, Result<V, FetchError>> {
            let (tx, rx) = oneshot::channel();
            lock_unpoisoned(&self.gates)
                .entry(key.clone())
                .or_default()
                .push_back(tx);

            Box::pin(async move {
                match rx.await {
                    Ok(result) => result,
                    // Fetcher dropped with the fetch still parked
                    Err(_) => Err(FetchError::Upstream("fetch gate dropped".to_string())),
                }
            })
        }
    }

    /// In-memory slot store
    ///
    /// Last-write-wins key-value storage for seeding and persistence tests.
    pub struct MemorySlotStore<K, V> {
        slots: Mutex<HashMap<K, V>>,
    }

    impl<K, V> MemorySlotStore<K, V>
    where
        K: SubjectKey + Hash,
        V: Clone,
    {
        /// Create an empty store
        #[must_use]
        pub fn new() -> Self {
            Self {
                slots: Mutex::new(HashMap::new()),
            }
        }

        /// Pre-populate a slot (for seeding tests)
        pub fn insert(&self, slot: K, value: V) {
            lock_unpoisoned(&self.slots).insert(slot, value);
        }

        /// Number of occupied slots
        #[must_use]
        pub fn len(&self) -> usize {
            lock_unpoisoned(&self.slots).len()
        }

        /// Whether the store is empty
        #[must_use]
        pub fn is_empty(&self) -> bool {
            lock_unpoisoned(&self.slots).is_empty()
        }
    }

    impl<K, V> Default for MemorySlotStore<K, V>
    where
        K: SubjectKey + Hash,
        V: Clone,
    {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<K, V> SlotStore<K, V> for MemorySlotStore<K, V>
    where
        K: SubjectKey + Hash,
        V: Clone + Send + Sync,
    {
        fn get(&self, slot: &K) -> Option<V> {
            lock_unpoisoned(&self.slots).get(slot).cloned()
        }

        fn set(&self, slot: &K, value: V) {
            lock_unpoisoned(&self.slots).insert(slot.clone(), value);
        }
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, GatedFetcher, MemorySlotStore, StaticFetcher, test_clock};
pub use reducer_test::{ReducerTest, assertions};
