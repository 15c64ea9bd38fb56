#![allow(dead_code)]

use std::sync::Arc;

use adaptive_training_engine::db::MemoryRecordStore;
use adaptive_training_engine::training::config::TrainingConfig;
use adaptive_training_engine::training::types::TelemetryEvent;
use adaptive_training_engine::training::{EngineOptions, TrainingEngine};

pub fn engine_with(config: TrainingConfig) -> (TrainingEngine, Arc<MemoryRecordStore>) {
    let store = Arc::new(MemoryRecordStore::new());
    let engine = TrainingEngine::new(config, EngineOptions::default(), store.clone());
    (engine, store)
}

pub fn greedy_config() -> TrainingConfig {
    let mut config = TrainingConfig::default();
    config.policy.epsilon = 0.0;
    config
}

pub fn answer(session_id: &str, timestamp: i64, skill: &str, correct: bool) -> TelemetryEvent {
    let mut event = TelemetryEvent::new(session_id, "answer", timestamp);
    event.skill_category = Some(skill.to_string());
    event.correct = Some(correct);
    event
}

pub fn scored_step(
    session_id: &str,
    timestamp: i64,
    correct: f64,
    total: f64,
    elapsed_ms: f64,
    confidence: f64,
) -> TelemetryEvent {
    let mut event = TelemetryEvent::new(session_id, "step", timestamp);
    event.interaction_count = Some(correct);
    event.total_interactions = Some(total);
    event.elapsed_ms = Some(elapsed_ms);
    event.self_reported_confidence = Some(confidence);
    event
}
