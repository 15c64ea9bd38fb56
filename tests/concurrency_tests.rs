//! Concurrent read-modify-write tests
//!
//! Every update applied to one key is the same function, so the final value
//! depends only on how many updates landed. A lost update shows up as a
//! different value.

mod common;

use std::sync::Arc;

use adaptive_training_engine::training::config::{BktParams, PolicyParams, TrainingConfig};
use adaptive_training_engine::training::knowledge::{bkt_step, KnowledgeTracker, MASTERY_PRIOR};
use adaptive_training_engine::training::policy::{discretize, PolicyEngine};
use adaptive_training_engine::training::types::AdaptiveAction;
use adaptive_training_engine::training::LiveParams;

const TASKS: usize = 8;
const UPDATES_PER_TASK: usize = 25;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mastery_updates_are_not_lost() {
    // slip = guess = 0.5 makes the posterior equal the prior, so each update is p + (1-p)*0.1.
    let bkt = BktParams {
        p_learn: 0.1,
        p_slip: 0.5,
        p_guess: 0.5,
        p_forget: 0.0,
    };
    let tracker = Arc::new(KnowledgeTracker::in_memory(Arc::new(LiveParams::new(
        bkt,
        PolicyParams::default(),
    ))));

    let mut handles = Vec::new();
    for _ in 0..TASKS {
        let tracker = Arc::clone(&tracker);
        handles.push(tokio::spawn(async move {
            for _ in 0..UPDATES_PER_TASK {
                tracker
                    .update_knowledge_state("shared", "EQUIPMENT_HANDLING", true)
                    .unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut expected = MASTERY_PRIOR;
    for _ in 0..TASKS * UPDATES_PER_TASK {
        expected = bkt_step(expected, true, &bkt);
    }
    let actual = tracker
        .get_skill_mastery("shared", "EQUIPMENT_HANDLING")
        .unwrap()
        .probability;
    assert!((actual - expected).abs() < 1e-12, "{actual} != {expected}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_q_updates_are_not_lost() {
    let policy = PolicyParams {
        alpha: 0.05,
        gamma: 0.0,
        epsilon: 0.0,
    };
    let engine = Arc::new(PolicyEngine::in_memory(Arc::new(LiveParams::new(
        BktParams::default(),
        policy,
    ))));
    let state = discretize(0.5, 0.5, 0.5);
    let next = discretize(0.9, 0.9, 0.9);
    let action = AdaptiveAction::from_index(13).unwrap();

    let mut handles = Vec::new();
    for _ in 0..TASKS {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            for _ in 0..UPDATES_PER_TASK {
                engine.update_q_value(&state, &action, &next, 1.0).unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // With gamma = 0 every update is q + 0.05 * (1 - q).
    let n = (TASKS * UPDATES_PER_TASK) as i32;
    let expected = 1.0 - 0.95f64.powi(n);
    let actual = engine.q_value(&state, &action);
    assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_self_transitions_are_not_lost() {
    let policy = PolicyParams {
        alpha: 0.05,
        gamma: 0.9,
        epsilon: 0.0,
    };
    let engine = Arc::new(PolicyEngine::in_memory(Arc::new(LiveParams::new(
        BktParams::default(),
        policy,
    ))));
    let state = discretize(0.5, 0.5, 0.5);
    let action = AdaptiveAction::from_index(7).unwrap();

    let mut handles = Vec::new();
    for _ in 0..TASKS {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            for _ in 0..UPDATES_PER_TASK {
                engine.update_q_value(&state, &action, &state, 1.0).unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // The updated cell is the only non-zero one in the state, so max Q(s,.) is the cell
    // itself and every update is q + 0.05 * (1 + 0.9q - q).
    let mut expected = 0.0f64;
    for _ in 0..TASKS * UPDATES_PER_TASK {
        expected += policy.alpha * (1.0 + policy.gamma * expected - expected);
    }
    let actual = engine.q_value(&state, &action);
    assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sessions_of_different_users_run_in_parallel() {
    let (engine, _) = common::engine_with(TrainingConfig::default());
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for user in 0..6 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let user_id = format!("user-{user}");
            let session = engine.open_session(&user_id, "procedural").await.unwrap();
            for ts in 0..20 {
                engine
                    .ingest(&session, common::answer(&session, ts, "SAFETY_PROTOCOLS", ts % 3 != 0))
                    .await
                    .unwrap();
            }
            engine.close_session(&session).await.unwrap()
        }));
    }

    for handle in handles {
        let report = handle.await.unwrap();
        assert_eq!(report.event_count, 20);
    }
}
