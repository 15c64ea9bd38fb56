//! SQLite record store: journaling, projections and restore

mod common;

use std::sync::Arc;

use tempfile::TempDir;

use adaptive_training_engine::db::{
    DurableRecord, MasteryRecord, QValueRecord, RecordFilter, RecordStore, SqliteRecordStore,
};
use adaptive_training_engine::training::config::TrainingConfig;
use adaptive_training_engine::training::{EngineOptions, TrainingEngine};

async fn open_store(dir: &TempDir) -> SqliteRecordStore {
    let url = format!("sqlite://{}", dir.path().join("training.db").display());
    SqliteRecordStore::connect(&url).await.unwrap()
}

fn mastery(user: &str, skill: &str, probability: f64, seq: u64) -> DurableRecord {
    DurableRecord::Mastery(MasteryRecord {
        user_id: user.to_string(),
        skill_category: skill.to_string(),
        probability,
        updated_at: seq as i64,
        seq,
    })
}

#[tokio::test]
async fn snapshot_keeps_latest_mastery() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    store.append(&mastery("u1", "COMMUNICATION", 0.3, 1)).await.unwrap();
    store.append(&mastery("u1", "COMMUNICATION", 0.7, 2)).await.unwrap();
    store.append(&mastery("u2", "SAFETY_PROTOCOLS", 0.5, 3)).await.unwrap();

    let snapshot = store.load_snapshot().await.unwrap();
    assert_eq!(snapshot.mastery.len(), 2);
    let u1 = snapshot
        .mastery
        .iter()
        .find(|m| m.user_id == "u1")
        .unwrap();
    assert!((u1.probability - 0.7).abs() < 1e-12);

    let journal = store.query(&RecordFilter::User("u1".to_string())).await.unwrap();
    assert_eq!(journal.len(), 2);
}

#[tokio::test]
async fn stale_projection_never_overwrites_newer_one() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    store.append(&mastery("u1", "COMMUNICATION", 0.7, 2)).await.unwrap();
    store.append(&mastery("u1", "COMMUNICATION", 0.3, 1)).await.unwrap();
    store
        .append(&DurableRecord::QValue(QValueRecord {
            state_key: "k1_p1_s0".to_string(),
            action_key: "0|THEORY|GUIDED".to_string(),
            value: 0.25,
            updated_at: 5,
            seq: 4,
        }))
        .await
        .unwrap();
    store
        .append(&DurableRecord::QValue(QValueRecord {
            state_key: "k1_p1_s0".to_string(),
            action_key: "0|THEORY|GUIDED".to_string(),
            value: 0.1,
            updated_at: 6,
            seq: 3,
        }))
        .await
        .unwrap();

    let snapshot = store.load_snapshot().await.unwrap();
    assert_eq!(snapshot.mastery.len(), 1);
    assert_eq!(snapshot.mastery[0].seq, 2);
    assert!((snapshot.mastery[0].probability - 0.7).abs() < 1e-12);
    assert_eq!(snapshot.q_values.len(), 1);
    assert_eq!(snapshot.q_values[0].seq, 4);
    assert!((snapshot.q_values[0].value - 0.25).abs() < 1e-12);

    // Both copies stay in the journal.
    let journal = store.query(&RecordFilter::User("u1".to_string())).await.unwrap();
    assert_eq!(journal.len(), 2);
}

#[tokio::test]
async fn session_records_are_queryable_and_deduplicated() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir).await);
    let engine = TrainingEngine::new(
        TrainingConfig::default(),
        EngineOptions::default(),
        store.clone(),
    );

    let session = engine.open_session("u1", "communication").await.unwrap();
    for ts in 1..=3 {
        engine
            .ingest(&session, common::answer(&session, ts, "COMMUNICATION", true))
            .await
            .unwrap();
    }
    engine.close_session(&session).await.unwrap();
    engine.writer().flush().await.unwrap();

    let records = store
        .query(&RecordFilter::Session(session.clone()))
        .await
        .unwrap();
    let events = records
        .iter()
        .filter(|r| matches!(r, DurableRecord::Event(_)))
        .count();
    assert_eq!(events, 3);

    let closed = records
        .iter()
        .find(|r| matches!(r, DurableRecord::SessionClosed(_)))
        .cloned()
        .unwrap();
    store.append(&closed).await.unwrap();
    let again = store
        .query(&RecordFilter::Session(session.clone()))
        .await
        .unwrap();
    assert_eq!(again.len(), records.len());

    let recent = store.query(&RecordFilter::Since(0)).await.unwrap();
    assert!(recent.len() >= records.len());
    let future = store.query(&RecordFilter::Since(i64::MAX)).await.unwrap();
    assert!(future.is_empty());
}

#[tokio::test]
async fn dead_letters_are_counted() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    store
        .dead_letter(&mastery("u1", "COMMUNICATION", 0.4, 1), "disk full")
        .await
        .unwrap();
    assert_eq!(store.dead_letter_count().await.unwrap(), 1);
}

#[tokio::test]
async fn restart_restores_learned_state() {
    let dir = TempDir::new().unwrap();

    let (q_before, mastery_before) = {
        let store = Arc::new(open_store(&dir).await);
        let engine = TrainingEngine::restore(
            TrainingConfig::default(),
            EngineOptions::default(),
            store,
        )
        .await
        .unwrap();

        let session = engine.open_session("u1", "physical").await.unwrap();
        for ts in 1..=8 {
            engine
                .ingest(
                    &session,
                    common::answer(&session, ts, "EQUIPMENT_HANDLING", ts % 2 == 0),
                )
                .await
                .unwrap();
        }
        engine.shutdown().await;

        let mastery = engine
            .get_skill_mastery("u1", "EQUIPMENT_HANDLING")
            .unwrap()
            .probability;
        let mut q = engine.policy().entries();
        q.sort_by_key(|((s, a), _)| (s.key(), a.index()));
        (q, mastery)
    };

    let store = Arc::new(open_store(&dir).await);
    let engine = TrainingEngine::restore(TrainingConfig::default(), EngineOptions::default(), store)
        .await
        .unwrap();

    let mastery_after = engine
        .get_skill_mastery("u1", "EQUIPMENT_HANDLING")
        .unwrap()
        .probability;
    assert!((mastery_after - mastery_before).abs() < 1e-12);

    let mut q_after = engine.policy().entries();
    q_after.sort_by_key(|((s, a), _)| (s.key(), a.index()));
    assert_eq!(q_after.len(), q_before.len());
    for ((key_a, a), (key_b, b)) in q_before.iter().zip(q_after.iter()) {
        assert_eq!(key_a, key_b);
        assert!((a - b).abs() < 1e-12);
    }
}

#[tokio::test]
async fn corrupt_rows_refuse_to_restore() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    sqlx::query(
        r#"INSERT INTO "q_values" ("state_key", "action_key", "value", "updated_at") VALUES (?, ?, ?, ?)"#,
    )
    .bind("k9_p0_s0")
    .bind("0|THEORY|GUIDED")
    .bind(0.5f64)
    .bind(1i64)
    .execute(store.pool())
    .await
    .unwrap();

    let result = TrainingEngine::restore(
        TrainingConfig::default(),
        EngineOptions::default(),
        Arc::new(store),
    )
    .await;
    let Err(err) = result else {
        panic!("corrupt snapshot was accepted");
    };
    assert_eq!(err.code(), "CORRUPT_STORE");
}

#[tokio::test]
async fn out_of_range_mastery_refuses_to_restore() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    store.append(&mastery("u1", "COMMUNICATION", 1.5, 1)).await.unwrap();

    let result = TrainingEngine::restore(
        TrainingConfig::default(),
        EngineOptions::default(),
        Arc::new(store),
    )
    .await;
    assert!(matches!(result, Err(ref e) if e.code() == "CORRUPT_STORE"));
}
