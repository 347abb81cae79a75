//! Integration tests for the recovery supervisor
//!
//! Covers the capture/fallback contract, both reset pathways and their
//! no-conflict rule, the decoupling of reset from the wrapped controller's
//! state, and the full resolve → reject → escalate → reset → resolve cycle.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use keyfetch_core::environment::Clock;
use keyfetch_core::error::FetchError;
use keyfetch_runtime::{
    RecoveryCoordinator, RecoveryHooks, RequestController, RequestEnvironment,
};
use keyfetch_testing::mocks::{FixedClock, GatedFetcher, StaticFetcher, test_clock};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct HookCounters {
    resets: Arc<AtomicUsize>,
    key_changes: Arc<AtomicUsize>,
}

fn counting_hooks() -> (RecoveryHooks<FixedClock>, HookCounters) {
    let resets = Arc::new(AtomicUsize::new(0));
    let key_changes = Arc::new(AtomicUsize::new(0));

    let hooks = RecoveryHooks::new(test_clock())
        .with_on_reset({
            let resets = Arc::clone(&resets);
            move || {
                resets.fetch_add(1, Ordering::SeqCst);
            }
        })
        .with_on_keys_changed({
            let key_changes = Arc::clone(&key_changes);
            move || {
                key_changes.fetch_add(1, Ordering::SeqCst);
            }
        });

    (hooks, HookCounters { resets, key_changes })
}

fn key(s: &str) -> String {
    s.to_string()
}

#[tokio::test]
async fn test_capture_freezes_error_keys_and_time() {
    let (hooks, _counters) = counting_hooks();
    let coordinator = RecoveryCoordinator::watching(vec![key("missingno")], hooks);

    let mut handle = coordinator
        .capture(FetchError::not_found("missingno"))
        .await
        .unwrap();
    handle.wait().await;

    assert!(coordinator.is_failed().await);
    let failure = coordinator.failure().await.unwrap();
    assert_eq!(failure.error, FetchError::not_found("missingno"));
    assert_eq!(failure.watched_keys, vec![key("missingno")]);
    assert_eq!(failure.captured_at, test_clock().now());
}

#[tokio::test]
async fn test_manual_reset_is_idempotent() {
    let (hooks, counters) = counting_hooks();
    let coordinator = RecoveryCoordinator::watching(vec![key("missingno")], hooks);

    coordinator
        .capture(FetchError::not_found("missingno"))
        .await
        .unwrap();

    // Twice in a row ends in the same state as once, and the hook fires once
    let mut first = coordinator.reset_manual().await.unwrap();
    first.wait().await;
    let mut second = coordinator.reset_manual().await.unwrap();
    second.wait().await;

    assert!(!coordinator.is_failed().await);
    assert_eq!(counters.resets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_key_change_auto_recovers_without_manual_reset() {
    let (hooks, counters) = counting_hooks();
    let coordinator = RecoveryCoordinator::watching(vec![key("missingno")], hooks);

    coordinator
        .capture(FetchError::not_found("missingno"))
        .await
        .unwrap();
    assert!(coordinator.is_failed().await);

    // A sibling fixed the subject key; the next observation auto-clears
    let mut handle = coordinator.observe_keys(vec![key("pikachu")]).await.unwrap();
    handle.wait().await;

    assert!(!coordinator.is_failed().await);
    assert_eq!(coordinator.watched_keys().await, vec![key("pikachu")]);
    assert_eq!(counters.key_changes.load(Ordering::SeqCst), 1);
    assert_eq!(counters.resets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unchanged_keys_leave_failure_in_place() {
    let (hooks, counters) = counting_hooks();
    let coordinator = RecoveryCoordinator::watching(vec![key("missingno")], hooks);

    coordinator
        .capture(FetchError::not_found("missingno"))
        .await
        .unwrap();

    let mut handle = coordinator
        .observe_keys(vec![key("missingno")])
        .await
        .unwrap();
    handle.wait().await;

    assert!(coordinator.is_failed().await);
    assert_eq!(counters.key_changes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_reset_pathways_never_double_fire() {
    // Manual first: the later key observation lands on a clear supervisor
    let (hooks, counters) = counting_hooks();
    let coordinator = RecoveryCoordinator::watching(vec![key("missingno")], hooks);

    coordinator
        .capture(FetchError::not_found("missingno"))
        .await
        .unwrap();

    let mut handle = coordinator.reset_manual().await.unwrap();
    handle.wait().await;
    let mut handle = coordinator.observe_keys(vec![key("pikachu")]).await.unwrap();
    handle.wait().await;

    assert!(!coordinator.is_failed().await);
    assert_eq!(counters.resets.load(Ordering::SeqCst), 1);
    assert_eq!(counters.key_changes.load(Ordering::SeqCst), 0);

    // Key observation first: the later manual reset is a no-op
    let (hooks, counters) = counting_hooks();
    let coordinator = RecoveryCoordinator::watching(vec![key("missingno")], hooks);

    coordinator
        .capture(FetchError::not_found("missingno"))
        .await
        .unwrap();

    let mut handle = coordinator.observe_keys(vec![key("pikachu")]).await.unwrap();
    handle.wait().await;
    let mut handle = coordinator.reset_manual().await.unwrap();
    handle.wait().await;

    assert!(!coordinator.is_failed().await);
    assert_eq!(counters.resets.load(Ordering::SeqCst), 0);
    assert_eq!(counters.key_changes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_manual_reset_leaves_wrapped_controller_untouched() {
    // Reset and remount are decoupled: clearing the supervisor must not
    // disturb the controller's history by itself
    let fetcher = Arc::new(GatedFetcher::<String, u32>::new());
    let controller: RequestController<String, u32> =
        RequestController::new(RequestEnvironment::new(fetcher.clone()));

    let mut handle = controller.set_key(key("missingno")).await.unwrap();
    assert!(fetcher.reject(&key("missingno"), FetchError::not_found("missingno")));
    handle.wait().await;
    assert!(controller.snapshot().await.phase.is_rejected());

    let (hooks, _counters) = counting_hooks();
    let coordinator = RecoveryCoordinator::watching(vec![key("missingno")], hooks);

    assert!(controller.escalate_rejection(&coordinator).await);
    // Escalation is fire-and-forget; wait for the capture to land
    for _ in 0..200 {
        if coordinator.is_failed().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(coordinator.is_failed().await);

    let mut handle = coordinator.reset_manual().await.unwrap();
    handle.wait().await;

    // Supervisor is clear, the controller still shows its last outcome
    assert!(!coordinator.is_failed().await);
    let state = controller.snapshot().await;
    assert!(state.phase.is_rejected());
    assert_eq!(state.generation.value(), 1);
}

#[tokio::test]
async fn test_escalation_ignores_non_rejected_phases() {
    let fetcher = Arc::new(StaticFetcher::new().resolves(key("pikachu"), 25u32));
    let controller: RequestController<String, u32> =
        RequestController::new(RequestEnvironment::new(fetcher));

    controller
        .set_key_and_settle(key("pikachu"), Duration::from_secs(1))
        .await
        .unwrap();

    let (hooks, _counters) = counting_hooks();
    let coordinator = RecoveryCoordinator::<String, _>::new(hooks);

    assert!(!controller.escalate_rejection(&coordinator).await);
    assert!(!coordinator.is_failed().await);
}

#[tokio::test]
async fn test_full_cycle_resolve_reject_escalate_reset_resolve() {
    let fetcher = Arc::new(
        StaticFetcher::new()
            .resolves(key("pikachu"), 25u32)
            .rejects(key("xxxxx-invalid"), FetchError::not_found("xxxxx-invalid")),
    );
    let controller: RequestController<String, u32> =
        RequestController::new(RequestEnvironment::new(fetcher));

    // Starts idle
    assert!(controller.snapshot().await.phase.is_idle());

    // Happy path
    let state = controller
        .set_key_and_settle(key("pikachu"), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(state.phase.value(), Some(&25));

    // Broken subject key
    let state = controller
        .set_key_and_settle(key("xxxxx-invalid"), Duration::from_secs(1))
        .await
        .unwrap();
    assert!(state.phase.is_rejected());

    // The retry affordance repairs the key before the subtree re-renders
    let repair = controller.clone();
    let hooks = RecoveryHooks::new(test_clock()).with_on_reset(move || {
        let repair = repair.clone();
        tokio::spawn(async move {
            let _ = repair.set_key(key("pikachu")).await;
        });
    });
    let coordinator = RecoveryCoordinator::watching(vec![key("xxxxx-invalid")], hooks);

    assert!(controller.escalate_rejection(&coordinator).await);
    for _ in 0..200 {
        if coordinator.is_failed().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let failure = coordinator.failure().await.unwrap();
    assert_eq!(failure.error, FetchError::not_found("xxxxx-invalid"));

    // User clicks retry
    let mut handle = coordinator.reset_manual().await.unwrap();
    handle.wait().await;
    assert!(!coordinator.is_failed().await);

    // The repaired key resolves again
    for _ in 0..200 {
        if controller.snapshot().await.phase.is_resolved() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let state = controller.snapshot().await;
    assert_eq!(state.phase.value(), Some(&25));
}
