// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Durable-queue invariants of the SQLite message store: idempotent
//! enqueue, FIFO claims, single-claim exclusivity, requeue ordering,
//! crash recovery and bounded retention.

use std::sync::Arc;
use std::time::Duration;

use aviary_core::domain::message::EnqueueOutcome;
use aviary_core::domain::store::MessageStore;
use aviary_core::infrastructure::db::Database;
use aviary_core::infrastructure::message_store::SqliteMessageStore;

const AGENT: &str = "alpha";

async fn open_store() -> (Arc<SqliteMessageStore>, Database) {
    let db = Database::open_in_memory().await.unwrap();
    let store = SqliteMessageStore::new(db.clone()).await.unwrap();
    (Arc::new(store), db)
}

async fn enqueue(store: &SqliteMessageStore, id: &str) -> EnqueueOutcome {
    store.enqueue(id, AGENT, "bob", &format!("@{AGENT} {id}")).await.unwrap()
}

#[tokio::test]
async fn enqueue_is_idempotent_per_id_and_agent() {
    let (store, _db) = open_store().await;

    assert_eq!(enqueue(&store, "m1").await, EnqueueOutcome::Accepted);
    assert_eq!(enqueue(&store, "m1").await, EnqueueOutcome::Duplicate);
    assert_eq!(enqueue(&store, "m1").await, EnqueueOutcome::Duplicate);

    let stats = store.stats(AGENT).await.unwrap();
    assert_eq!(stats.pending, 1);
}

#[tokio::test]
async fn same_id_for_two_agents_is_two_rows() {
    let (store, _db) = open_store().await;

    store.enqueue("m1", "alpha", "bob", "@alpha @beta hi").await.unwrap();
    store.enqueue("m1", "beta", "bob", "@alpha @beta hi").await.unwrap();

    let alpha_claim = store.claim("alpha").await.unwrap().unwrap();
    let beta_claim = store.claim("beta").await.unwrap().unwrap();
    assert_eq!(alpha_claim.id, "m1");
    assert_eq!(beta_claim.id, "m1");
    assert_eq!(alpha_claim.agent, "alpha");
    assert_eq!(beta_claim.agent, "beta");
}

#[tokio::test]
async fn claims_follow_enqueue_order() {
    let (store, _db) = open_store().await;
    for id in ["m1", "m2", "m3", "m4", "m5"] {
        enqueue(&store, id).await;
    }

    let mut claimed = Vec::new();
    while let Some(message) = store.claim(AGENT).await.unwrap() {
        claimed.push(message.id.clone());
        store.complete(&message.id, AGENT).await.unwrap();
    }
    assert_eq!(claimed, vec!["m1", "m2", "m3", "m4", "m5"]);
}

#[tokio::test]
async fn arrival_ties_break_by_id() {
    let (store, db) = open_store().await;
    enqueue(&store, "zz").await;
    enqueue(&store, "aa").await;

    // Force identical arrival stamps; the tiebreak must be lexicographic.
    sqlx::query("UPDATE messages SET arrived_at = 1000")
        .execute(db.pool())
        .await
        .unwrap();

    let first = store.claim(AGENT).await.unwrap().unwrap();
    assert_eq!(first.id, "aa");
}

#[tokio::test]
async fn at_most_one_processing_row_per_agent() {
    let (store, _db) = open_store().await;
    enqueue(&store, "m1").await;
    enqueue(&store, "m2").await;

    let first = store.claim(AGENT).await.unwrap().unwrap();
    assert_eq!(first.id, "m1");
    // A second claim while one is in flight yields nothing, even though m2
    // is Pending.
    assert!(store.claim(AGENT).await.unwrap().is_none());

    store.complete(&first.id, AGENT).await.unwrap();
    let second = store.claim(AGENT).await.unwrap().unwrap();
    assert_eq!(second.id, "m2");
}

#[tokio::test]
async fn competing_claimants_never_share_a_row() {
    let (store, _db) = open_store().await;
    for i in 0..20 {
        enqueue(&store, &format!("m{i:02}")).await;
    }

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            loop {
                match store.claim(AGENT).await.unwrap() {
                    Some(message) => {
                        claimed.push(message.id.clone());
                        store.complete(&message.id, AGENT).await.unwrap();
                    }
                    None => {
                        let stats = store.stats(AGENT).await.unwrap();
                        if stats.pending == 0 && stats.processing == 0 {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                }
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for task in tasks {
        all.extend(task.await.unwrap());
    }
    all.sort();
    let expected: Vec<String> = (0..20).map(|i| format!("m{i:02}")).collect();
    assert_eq!(all, expected, "every message claimed exactly once");
}

#[tokio::test]
async fn requeue_returns_to_the_head_of_the_queue() {
    let (store, _db) = open_store().await;
    enqueue(&store, "m1").await;
    enqueue(&store, "m2").await;

    let first = store.claim(AGENT).await.unwrap().unwrap();
    assert_eq!(first.id, "m1");
    store.fail(&first.id, AGENT, true).await.unwrap();

    // Original arrival time kept, so m1 is claimed again before m2.
    let again = store.claim(AGENT).await.unwrap().unwrap();
    assert_eq!(again.id, "m1");
    assert_eq!(again.arrived_at, first.arrived_at);
}

#[tokio::test]
async fn failure_tombstones_are_terminal_and_invisible_to_history() {
    let (store, _db) = open_store().await;
    enqueue(&store, "m1").await;
    enqueue(&store, "m2").await;

    let first = store.claim(AGENT).await.unwrap().unwrap();
    store.fail(&first.id, AGENT, false).await.unwrap();

    let stats = store.stats(AGENT).await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 1);

    // The queue keeps moving and the failure never shows up as context.
    let second = store.claim(AGENT).await.unwrap().unwrap();
    assert_eq!(second.id, "m2");
    store.complete(&second.id, AGENT).await.unwrap();

    let history = store.history(AGENT, 10).await.unwrap();
    let ids: Vec<&str> = history.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m2"]);
}

#[tokio::test]
async fn purge_clears_pending_rows_only() {
    let (store, _db) = open_store().await;
    for id in ["m1", "m2", "m3"] {
        enqueue(&store, id).await;
    }
    let claimed = store.claim(AGENT).await.unwrap().unwrap();
    store.complete(&claimed.id, AGENT).await.unwrap();

    let purged = store.purge_pending(AGENT).await.unwrap();
    assert_eq!(purged, 2);

    let stats = store.stats(AGENT).await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.completed_last_24h, 1, "tombstones survive the purge");
}

#[tokio::test]
async fn recover_stale_requeues_abandoned_claims() {
    let (store, db) = open_store().await;
    enqueue(&store, "m1").await;
    let claimed = store.claim(AGENT).await.unwrap().unwrap();

    // Fresh claims are left alone.
    assert_eq!(store.recover_stale(AGENT, Duration::from_secs(300)).await.unwrap(), 0);

    // Back-date the claim as if the process died five minutes ago.
    sqlx::query("UPDATE messages SET started_at = started_at - 600000 WHERE id = ?1")
        .bind(&claimed.id)
        .execute(db.pool())
        .await
        .unwrap();

    assert_eq!(store.recover_stale(AGENT, Duration::from_secs(300)).await.unwrap(), 1);
    let recovered = store.claim(AGENT).await.unwrap().unwrap();
    assert_eq!(recovered.id, "m1");
    assert_eq!(recovered.arrived_at, claimed.arrived_at);
}

#[tokio::test]
async fn retention_sweep_is_bounded_per_pass() {
    let (store, db) = open_store().await;
    for id in ["m1", "m2", "m3"] {
        enqueue(&store, id).await;
        let claimed = store.claim(AGENT).await.unwrap().unwrap();
        store.complete(&claimed.id, AGENT).await.unwrap();
    }
    enqueue(&store, "fresh").await;

    // Age every tombstone past the seven-day retention.
    sqlx::query("UPDATE messages SET completed_at = completed_at - 8 * 86400000 WHERE state = 'completed'")
        .execute(db.pool())
        .await
        .unwrap();

    let retention = Duration::from_secs(7 * 24 * 3600);
    assert_eq!(store.sweep_completed(retention, 2).await.unwrap(), 2);
    assert_eq!(store.sweep_completed(retention, 2).await.unwrap(), 1);
    assert_eq!(store.sweep_completed(retention, 2).await.unwrap(), 0);

    // Pending rows are never swept.
    assert_eq!(store.stats(AGENT).await.unwrap().pending, 1);
}

#[tokio::test]
async fn history_returns_last_k_oldest_first() {
    let (store, _db) = open_store().await;
    for i in 0..5 {
        let id = format!("m{i}");
        enqueue(&store, &id).await;
        let claimed = store.claim(AGENT).await.unwrap().unwrap();
        store.complete(&claimed.id, AGENT).await.unwrap();
    }

    let history = store.history(AGENT, 3).await.unwrap();
    let ids: Vec<&str> = history.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m2", "m3", "m4"]);
}

#[tokio::test]
async fn round_trip_leaves_only_a_tombstone() {
    let (store, _db) = open_store().await;
    enqueue(&store, "m1").await;
    let claimed = store.claim(AGENT).await.unwrap().unwrap();
    assert!(claimed.started_at.is_some());
    store.complete(&claimed.id, AGENT).await.unwrap();

    let stats = store.stats(AGENT).await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.completed_last_24h, 1);
    assert!(stats.avg_process_ms.is_some());

    assert_eq!(
        store.enqueue("m1", AGENT, "bob", "again").await.unwrap(),
        EnqueueOutcome::Duplicate,
        "tombstones keep deduplicating"
    );
}

#[tokio::test]
async fn processing_age_tracks_the_claim() {
    let (store, _db) = open_store().await;
    assert!(store.processing_age(AGENT).await.unwrap().is_none());

    enqueue(&store, "m1").await;
    let claimed = store.claim(AGENT).await.unwrap().unwrap();
    assert!(store.processing_age(AGENT).await.unwrap().is_some());

    store.complete(&claimed.id, AGENT).await.unwrap();
    assert!(store.processing_age(AGENT).await.unwrap().is_none());
}

#[tokio::test]
async fn peek_operations_do_not_mutate() {
    let (store, _db) = open_store().await;
    enqueue(&store, "m1").await;
    enqueue(&store, "m2").await;

    let peeked = store.peek_next(AGENT).await.unwrap().unwrap();
    assert_eq!(peeked.id, "m1");

    let batch = store.peek_batch(AGENT, 10).await.unwrap();
    assert_eq!(batch.len(), 2);

    let stats = store.stats(AGENT).await.unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.processing, 0);
}
