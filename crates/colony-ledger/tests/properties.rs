//! Concurrency and ordering properties of the ledger, exercised on a
//! multi-threaded runtime against the sharded in-memory store.

#![allow(clippy::expect_used)]

use std::sync::Arc;

use colony_ledger::{DrugDelivery, Ledger, LedgerError, MemoryStore, Page};
use colony_types::{CallerId, Notification, NotificationKind, PayloadAmount, Position3, RunKey, RunSummary};
use futures::future::join_all;

fn caller(name: &str) -> CallerId {
    CallerId::new(name).expect("caller")
}

fn shared() -> Arc<Ledger<MemoryStore>> {
    Arc::new(Ledger::new(MemoryStore::new()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_initialization_has_exactly_one_winner() {
    let ledger = shared();
    let key = RunKey::from_label("contested");

    let attempts = (0..32).map(|i| {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move { ledger.initialize_simulation(&caller(&format!("U{i}")), key).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.expect("join")).collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, LedgerError::RunAlreadyExists { .. }))
    );

    let stored = ledger.simulation_run(key).await.expect("read");
    assert_eq!(stored.submitter, winners.first().and_then(|run| run.submitter.clone()));

    let initialized = ledger
        .notifications_since(0, 100)
        .await
        .expect("feed")
        .into_iter()
        .filter(|r| r.notification.kind() == NotificationKind::SimulationInitialized)
        .count();
    assert_eq!(initialized, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completion_has_exactly_one_winner() {
    let ledger = shared();
    let key = RunKey::from_label("race-to-finish");
    let owner = caller("U1");
    ledger.initialize_simulation(&owner, key).await.expect("init");

    let attempts = (0..16_u32).map(|i| {
        let ledger = Arc::clone(&ledger);
        let owner = owner.clone();
        tokio::spawn(async move {
            let summary = RunSummary {
                total_steps: i,
                cells_killed: 0,
                drug_deliveries: 0,
            };
            ledger.complete_simulation(&owner, key, summary).await
        })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.expect("join")).collect();

    let winner = results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|run| run.total_steps)
        .collect::<Vec<_>>();
    assert_eq!(winner.len(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, LedgerError::RunAlreadyCompleted { .. }))
    );

    let stored = ledger.simulation_run(key).await.expect("read");
    assert!(stored.completed);
    assert_eq!(Some(&stored.total_steps), winner.first());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_visits_to_one_cell_notify_once() {
    let ledger = shared();

    let visits = (0..64).map(|i| {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move { ledger.mark_visited(&caller(&format!("ant-{i}")), 7, 9).await })
    });
    let firsts = join_all(visits)
        .await
        .into_iter()
        .map(|r| r.expect("join").expect("visit"))
        .filter(Option::is_some)
        .count();

    assert_eq!(firsts, 1);
    assert!(ledger.has_visited(7, 9).await.expect("read"));
    assert_eq!(ledger.latest_sequence().await.expect("seq"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_caller_order_is_preserved_and_counts_match() {
    let ledger = shared();
    let key = RunKey::from_label("busy-run");
    let per_bot = 50_u32;

    let bots = (0..4).map(|b| {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            let bot = caller(&format!("nanobot-{b}"));
            for timestamp in 0..per_bot {
                let delivery = DrugDelivery {
                    position: Position3::new(b, 0, 0),
                    timestamp,
                    payload: PayloadAmount::from_raw(10),
                };
                ledger.record_drug_delivery(&bot, key, delivery).await.expect("delivery");
            }
        })
    });
    for result in join_all(bots).await {
        result.expect("join");
    }

    let all = ledger.deliveries(key, Page::first(1000)).await.expect("list");
    assert_eq!(all.len(), 200);
    assert_eq!(ledger.delivery_count(key).await.expect("count"), 200);

    for b in 0..4 {
        let own: Vec<u32> = all
            .iter()
            .filter(|d| d.position.x == b)
            .map(|d| d.timestamp)
            .collect();
        assert_eq!(own, (0..per_bot).collect::<Vec<_>>());
    }

    let feed = ledger.notifications_since(0, 1000).await.expect("feed");
    assert_eq!(feed.len(), 200);
    assert!(feed.windows(2).all(|w| matches!(w, [a, b] if a.sequence < b.sequence)));
    assert!(
        feed.iter()
            .all(|r| matches!(r.notification, Notification::DrugDelivered { run_key, .. } if run_key == key))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn subscribers_receive_commits_in_sequence_order() {
    let ledger = shared();
    let mut sub = ledger.subscribe();

    // Writers on distinct cells and runs land in different shards, so
    // their commits genuinely race.
    let writers = (0..64_u32).map(|i| {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            ledger.mark_visited(&caller("ant"), i, i).await.expect("visit");
            let run = RunKey::from_label(&format!("run-{i}"));
            ledger.initialize_simulation(&caller("U1"), run).await.expect("init");
            let delivery = DrugDelivery {
                position: Position3::new(i, i, 0),
                timestamp: i,
                payload: PayloadAmount::from_raw(1),
            };
            ledger.record_drug_delivery(&caller("bot"), run, delivery).await.expect("delivery");
        })
    });
    for result in join_all(writers).await {
        result.expect("join");
    }

    for expected in 1..=192_u64 {
        let record = sub.recv().await.expect("notification");
        assert_eq!(record.sequence, expected, "feed must not reorder commits");
    }
}
