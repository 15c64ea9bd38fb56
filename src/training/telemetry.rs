use crate::error::EngineError;
use crate::training::config::{NormalizationConfig, RewardWeights};
use crate::training::types::{Biometrics, SessionMetrics, SkillCategory, TelemetryEvent};

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub metrics: SessionMetrics,
    pub skill: Option<SkillCategory>,
    pub is_correct: bool,
    pub stress: f64,
    pub timestamp: i64,
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn linear_unit(value: Option<f64>, min: f64, max: f64) -> f64 {
    match finite(value) {
        Some(v) if max > min => unit((v - min) / (max - min)),
        _ => 0.0,
    }
}

fn has_interpretable_field(event: &TelemetryEvent) -> bool {
    let biometric = event.biometrics.as_ref().is_some_and(|b| {
        finite(b.heart_rate).is_some()
            || finite(b.skin_response).is_some()
            || finite(b.focus_score).is_some()
    });

    event.correct.is_some()
        || finite(event.elapsed_ms).is_some()
        || finite(event.interaction_count).is_some()
        || finite(event.total_interactions).is_some()
        || finite(event.self_reported_confidence).is_some()
        || biometric
}

/// Validates the payload and turns it into clamped metrics. Fails before any state is
/// touched; absent numeric fields read as 0 (confidence falls back to the midpoint).
pub fn normalize_event(
    event: &TelemetryEvent,
    config: &NormalizationConfig,
) -> Result<NormalizedEvent, EngineError> {
    if !has_interpretable_field(event) {
        return Err(EngineError::MalformedEvent(
            "event carries no interpretable telemetry".to_string(),
        ));
    }

    let skill = match event.skill_category.as_deref() {
        Some(raw) => Some(
            SkillCategory::parse(raw)
                .ok_or_else(|| EngineError::UnknownSkillCategory(raw.to_string()))?,
        ),
        None => None,
    };

    let (correct_count, total) = match finite(event.total_interactions) {
        Some(total) => (
            finite(event.interaction_count).unwrap_or(0.0).max(0.0),
            total.max(0.0),
        ),
        None => match event.correct {
            Some(true) => (1.0, 1.0),
            Some(false) => (0.0, 1.0),
            None => (0.0, 0.0),
        },
    };
    let accuracy = if total > 0.0 {
        unit(correct_count / total)
    } else {
        0.0
    };

    let elapsed_ms = finite(event.elapsed_ms).unwrap_or(0.0).max(0.0);
    let interactions = finite(event.total_interactions)
        .or(finite(event.interaction_count))
        .unwrap_or(0.0)
        .max(0.0);
    let rate = if elapsed_ms > 0.0 {
        interactions / (elapsed_ms / 1000.0)
    } else {
        0.0
    };
    let attention_score = attention_from_rate(rate, config.attention_half_rate);

    let confidence_level = finite(event.self_reported_confidence)
        .map(unit)
        .unwrap_or_else(|| unit(config.default_confidence));

    let is_correct = event.correct.unwrap_or(accuracy >= 0.5);

    Ok(NormalizedEvent {
        metrics: SessionMetrics {
            accuracy,
            completion_time: elapsed_ms,
            attention_score,
            confidence_level,
        },
        skill,
        is_correct,
        stress: stress_composite(event.biometrics.as_ref(), config),
        timestamp: event.timestamp,
    })
}

/// Saturating map of interactions-per-second into [0, 1).
pub fn attention_from_rate(rate: f64, half_rate: f64) -> f64 {
    if !rate.is_finite() || rate <= 0.0 {
        return 0.0;
    }
    if half_rate <= 0.0 {
        return 1.0;
    }
    unit(rate / (rate + half_rate))
}

/// Equal-weighted mean of normalized heart rate, skin response and focus score.
pub fn stress_composite(biometrics: Option<&Biometrics>, config: &NormalizationConfig) -> f64 {
    let Some(b) = biometrics else {
        return 0.0;
    };
    let heart = linear_unit(b.heart_rate, config.heart_rate_min, config.heart_rate_max);
    let skin = linear_unit(b.skin_response, config.skin_response_min, config.skin_response_max);
    let focus = finite(b.focus_score).map(unit).unwrap_or(0.0);
    (heart + skin + focus) / 3.0
}

pub fn compute_reward(metrics: &SessionMetrics, weights: &RewardWeights) -> f64 {
    let reward = weights.accuracy * unit(metrics.accuracy)
        + weights.attention * unit(metrics.attention_score)
        + weights.confidence * unit(metrics.confidence_level);
    unit(reward)
}
