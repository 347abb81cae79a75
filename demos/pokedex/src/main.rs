//! Pokedex demo binary
//!
//! Walks the full lifecycle on a terminal: resolve, a settlement-order race,
//! a validation failure escalated to the recovery coordinator, both reset
//! pathways, and persistence through the slot store.

use anyhow::Result;
use keyfetch_core::environment::SlotStore;
use keyfetch_runtime::{
    RecoveryCoordinator, RecoveryHooks, RequestController, RequestEnvironment, SystemClock,
};
use keyfetch_testing::mocks::MemorySlotStore;
use pokedex_demo::{Pokemon, PokedexFetcher, render};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SETTLE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pokedex=info,keyfetch_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Pokedex: Keyfetch Lifecycle Walkthrough ===\n");
    tracing::info!("starting pokedex walkthrough");

    let fetcher = Arc::new(
        PokedexFetcher::new()?
            .with_latency(Duration::from_millis(120))
            // Slowpoke lives up to the name; used for the race below
            .with_slow_entry("slowpoke", Duration::from_millis(400)),
    );
    let slots: Arc<MemorySlotStore<String, Pokemon>> = Arc::new(MemorySlotStore::new());

    let environment: RequestEnvironment<String, Pokemon> = RequestEnvironment::new(fetcher)
        .with_slot_store(slots.clone())
        .with_fetch_timeout(Duration::from_secs(2));
    let controller = RequestController::new(environment);

    // A consumer: re-renders on every lifecycle snapshot
    let mut snapshots = controller.subscribe();
    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            println!("  [view] {}", render(&snapshot));
        }
    });

    println!("Initially: {}", render(&controller.snapshot().await));

    // Plain resolution
    println!("\n>>> Selecting: pikachu");
    let state = controller
        .set_key_and_settle("pikachu".to_string(), SETTLE)
        .await?;
    println!("Settled as: {}", render(&state));

    // The race: a slow lookup issued first, a fast one issued second.
    // The slow settlement arrives last and is discarded by generation.
    println!("\n>>> Selecting: slowpoke, then immediately: ditto");
    let mut slow = controller.set_key("slowpoke".to_string()).await?;
    let mut fast = controller.set_key("ditto".to_string()).await?;
    fast.wait().await;
    slow.wait().await;
    println!("Settled as: {}", render(&controller.snapshot().await));

    // A validation failure, escalated to a supervisor
    println!("\n>>> Selecting: missingno (a glitched entry)");
    let state = controller
        .set_key_and_settle("missingno".to_string(), SETTLE)
        .await?;
    println!("Settled as: {}", render(&state));

    let repair = controller.clone();
    let hooks = RecoveryHooks::new(SystemClock).with_on_reset(move || {
        // Repair the subject key before the wrapped subtree re-renders
        let repair = repair.clone();
        tokio::spawn(async move {
            let _ = repair.set_key("pikachu".to_string()).await;
        });
    });
    let coordinator =
        RecoveryCoordinator::watching(vec!["missingno".to_string()], hooks);

    controller.escalate_rejection(&coordinator).await;
    wait_until(|| {
        let coordinator = coordinator.clone();
        async move { coordinator.is_failed().await }
    })
    .await;

    if let Some(failure) = coordinator.failure().await {
        println!("  [fallback] something went wrong: {}", failure.error);
        println!("  [fallback] (try again)");
    }

    // The user clicks retry; on_reset repairs the key
    println!("\n>>> Manual reset from the fallback");
    coordinator.reset_manual().await?;
    wait_until(|| {
        let controller = controller.clone();
        async move { controller.snapshot().await.phase.is_resolved() }
    })
    .await;
    println!("Recovered to: {}", render(&controller.snapshot().await));

    // The other pathway: a sibling changes the watched key, auto-recovering
    println!("\n>>> Selecting: xxxxx (nothing by that name), then fixing the key from outside");
    let state = controller
        .set_key_and_settle("xxxxx".to_string(), SETTLE)
        .await?;
    println!("Settled as: {}", render(&state));

    controller.escalate_rejection(&coordinator).await;
    wait_until(|| {
        let coordinator = coordinator.clone();
        async move { coordinator.is_failed().await }
    })
    .await;

    let state = controller.set_key_and_settle("mew".to_string(), SETTLE).await?;
    println!("Settled as: {}", render(&state));
    coordinator.observe_keys(vec!["mew".to_string()]).await?;
    wait_until(|| {
        let coordinator = coordinator.clone();
        async move { !coordinator.is_failed().await }
    })
    .await;
    println!("Supervisor auto-cleared without a manual reset");

    // Resolved values were persisted along the way
    println!("\nSlot store now holds {} pokemon", slots.len());
    println!("  pikachu persisted: {}", slots.get(&"pikachu".to_string()).is_some());

    controller.shutdown(Duration::from_secs(5)).await?;
    coordinator.shutdown(Duration::from_secs(5)).await?;

    println!("\n=== Walkthrough Complete ===");
    println!("\nKey concepts demonstrated:");
    println!("  • State: RequestState (a closed lifecycle sum type)");
    println!("  • Generation guard: the slow lookup's settlement was discarded");
    println!("  • Escalation: rejections handed to the RecoveryCoordinator");
    println!("  • Two reset pathways: manual retry and watched-key auto-recovery");
    println!("  • Persistence: resolved values written through the slot store");

    Ok(())
}

/// Poll until a condition holds (the demo's stand-in for a render loop)
async fn wait_until<F, Fut>(mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if probe().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tracing::warn!("condition not reached while polling, continuing anyway");
}
