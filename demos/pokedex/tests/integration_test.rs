//! Integration tests for the pokedex demo
//!
//! These tests drive the full controller/coordinator pairing against the
//! embedded pokedex, end to end.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use keyfetch_core::environment::SlotStore;
use keyfetch_core::error::FetchError;
use keyfetch_runtime::{
    RecoveryCoordinator, RecoveryHooks, RequestController, RequestEnvironment, SystemClock,
};
use keyfetch_testing::mocks::MemorySlotStore;
use pokedex_demo::{Pokemon, PokedexFetcher, render};
use std::sync::Arc;
use std::time::Duration;

const SETTLE: Duration = Duration::from_secs(2);

fn fast_fetcher() -> PokedexFetcher {
    PokedexFetcher::new()
        .unwrap()
        .with_latency(Duration::from_millis(5))
}

fn controller_for(fetcher: PokedexFetcher) -> RequestController<String, Pokemon> {
    RequestController::new(RequestEnvironment::new(Arc::new(fetcher)))
}

#[tokio::test]
async fn test_lookup_resolves_and_renders() {
    let controller = controller_for(fast_fetcher());

    let state = controller
        .set_key_and_settle("pikachu".to_string(), SETTLE)
        .await
        .unwrap();

    assert_eq!(state.phase.value().map(|p| p.number), Some(25));
    assert!(render(&state).contains("pikachu"));
}

#[tokio::test]
async fn test_slow_lookup_never_overwrites_fast_one() {
    let fetcher = fast_fetcher().with_slow_entry("slowpoke", Duration::from_millis(200));
    let controller = controller_for(fetcher);

    let mut slow = controller.set_key("slowpoke".to_string()).await.unwrap();
    let mut fast = controller.set_key("ditto".to_string()).await.unwrap();
    fast.wait().await;
    slow.wait().await;

    let state = controller.snapshot().await;
    assert_eq!(state.phase.key().map(String::as_str), Some("ditto"));
    assert_eq!(state.phase.value().map(|p| p.number), Some(132));
}

#[tokio::test]
async fn test_glitched_entry_escalates_and_manual_reset_recovers() {
    let controller = controller_for(fast_fetcher());

    let state = controller
        .set_key_and_settle("missingno".to_string(), SETTLE)
        .await
        .unwrap();
    assert!(matches!(state.phase.error(), Some(FetchError::Invalid(_))));

    let repair = controller.clone();
    let hooks = RecoveryHooks::new(SystemClock).with_on_reset(move || {
        let repair = repair.clone();
        tokio::spawn(async move {
            let _ = repair.set_key("pikachu".to_string()).await;
        });
    });
    let coordinator = RecoveryCoordinator::watching(vec!["missingno".to_string()], hooks);

    assert!(controller.escalate_rejection(&coordinator).await);
    for _ in 0..200 {
        if coordinator.is_failed().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(coordinator.is_failed().await);

    let mut handle = coordinator.reset_manual().await.unwrap();
    handle.wait().await;

    for _ in 0..200 {
        if controller.snapshot().await.phase.is_resolved() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let state = controller.snapshot().await;
    assert_eq!(state.phase.value().map(|p| p.number), Some(25));
    assert!(!coordinator.is_failed().await);
}

#[tokio::test]
async fn test_resolved_pokemon_persist_to_slot_store() {
    let slots: Arc<MemorySlotStore<String, Pokemon>> = Arc::new(MemorySlotStore::new());
    let environment: RequestEnvironment<String, Pokemon> =
        RequestEnvironment::new(Arc::new(fast_fetcher())).with_slot_store(slots.clone());
    let controller = RequestController::new(environment);

    controller
        .set_key_and_settle("mew".to_string(), SETTLE)
        .await
        .unwrap();

    for _ in 0..200 {
        if slots.get(&"mew".to_string()).is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let stored = slots.get(&"mew".to_string()).unwrap();
    assert_eq!(stored.number, 151);

    // Seeding a fresh controller from the persisted value skips the fetch
    let environment: RequestEnvironment<String, Pokemon> =
        RequestEnvironment::new(Arc::new(fast_fetcher())).with_slot_store(slots);
    let seeded = RequestController::seeded(environment, "mew".to_string());
    let state = seeded.snapshot().await;
    assert_eq!(state.phase.value().map(|p| p.number), Some(151));
}
