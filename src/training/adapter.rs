use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::{EventBus, ParametersRecalibratedPayload, TrainingEvent};
use crate::db::{DurableRecord, DurableWriter, RecalibrationRecord, RecordFilter, RecordStore};
use crate::error::EngineError;
use crate::track_algorithm;
use crate::training::config::{AdapterConfig, BktParams, PolicyParams};
use crate::training::metrics::{registry, AlgorithmId};
use crate::training::params::{LiveParams, ModelParams};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub reward_samples: usize,
    pub mean_reward: Option<f64>,
    pub guess_samples: usize,
    pub low_confidence_correct_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalibrationOutcome {
    pub committed: bool,
    pub params: ModelParams,
    pub summary: HistorySummary,
}

/// Aggregates rewarded events and low-confidence answers from an event history.
pub fn summarize(records: &[DurableRecord], config: &AdapterConfig) -> HistorySummary {
    let mut reward_sum = 0.0;
    let mut reward_samples = 0usize;
    let mut guess_samples = 0usize;
    let mut guess_correct = 0usize;

    for record in records {
        let DurableRecord::Event(event) = record else {
            continue;
        };
        if let Some(reward) = event.reward.filter(|r| r.is_finite()) {
            reward_sum += reward;
            reward_samples += 1;
        }

        let low_confidence = event.event.self_reported_confidence.is_some()
            && event.metrics.confidence_level < config.low_confidence;
        if low_confidence {
            if let Some(correct) = event.event.correct {
                guess_samples += 1;
                if correct {
                    guess_correct += 1;
                }
            }
        }
    }

    HistorySummary {
        reward_samples,
        mean_reward: (reward_samples > 0).then(|| reward_sum / reward_samples as f64),
        guess_samples,
        low_confidence_correct_rate: (guess_samples > 0)
            .then(|| guess_correct as f64 / guess_samples as f64),
    }
}

/// Next parameter set; anything without enough evidence is carried over unchanged.
pub fn recalibrate(
    current: &ModelParams,
    summary: &HistorySummary,
    config: &AdapterConfig,
) -> (BktParams, PolicyParams) {
    let mut bkt = current.bkt;
    let mut policy = current.policy;

    if summary.reward_samples >= config.min_reward_samples {
        if let Some(mean) = summary.mean_reward {
            let step = if mean > config.high_reward {
                config.alpha_step
            } else if mean < config.low_reward {
                -config.alpha_step
            } else {
                0.0
            };
            policy.alpha = (policy.alpha + step).clamp(config.alpha_min, config.alpha_max);
        }
    }

    if summary.guess_samples >= config.min_guess_samples {
        if let Some(rate) = summary.low_confidence_correct_rate {
            bkt.p_guess = rate.clamp(config.p_guess_min, config.p_guess_max);
        }
    }

    (bkt, policy)
}

pub struct ParameterAdapter {
    params: Arc<LiveParams>,
    store: Arc<dyn RecordStore>,
    writer: DurableWriter,
    bus: Arc<EventBus>,
    config: AdapterConfig,
}

impl ParameterAdapter {
    pub fn new(
        params: Arc<LiveParams>,
        store: Arc<dyn RecordStore>,
        writer: DurableWriter,
        bus: Arc<EventBus>,
        config: AdapterConfig,
    ) -> Self {
        Self {
            params,
            store,
            writer,
            bus,
            config,
        }
    }

    pub async fn run_cycle(&self) -> Result<RecalibrationOutcome, EngineError> {
        let start = Instant::now();
        let current = self.params.snapshot();
        let since = Utc::now().timestamp_millis() - self.config.history_window_ms;

        let history = match self.store.query(&RecordFilter::Since(since)).await {
            Ok(records) => records,
            Err(e) => {
                registry().record_error(AlgorithmId::Recalibration);
                return Err(e.into());
            }
        };

        let summary = summarize(&history, &self.config);
        let (bkt, policy) = track_algorithm!(
            AlgorithmId::Recalibration,
            recalibrate(&current, &summary, &self.config)
        );

        if bkt == current.bkt && policy == current.policy {
            debug!(
                reward_samples = summary.reward_samples,
                guess_samples = summary.guess_samples,
                "recalibration left parameters unchanged"
            );
            return Ok(RecalibrationOutcome {
                committed: false,
                params: current.as_ref().clone(),
                summary,
            });
        }

        let committed = match self.params.commit_if_version(current.version, bkt, policy) {
            Ok(next) => next,
            Err(latest) => {
                warn!(
                    expected = current.version,
                    found = latest.version,
                    "parameters changed during recalibration, skipping commit"
                );
                return Ok(RecalibrationOutcome {
                    committed: false,
                    params: latest.as_ref().clone(),
                    summary,
                });
            }
        };

        self.writer
            .submit(DurableRecord::Recalibration(RecalibrationRecord {
                params: committed.as_ref().clone(),
                reward_samples: summary.reward_samples,
                guess_samples: summary.guess_samples,
                recorded_at: Utc::now().timestamp_millis(),
            }));
        self.bus
            .publish(TrainingEvent::ParametersRecalibrated(
                ParametersRecalibratedPayload {
                    params: committed.as_ref().clone(),
                    reward_samples: summary.reward_samples,
                    guess_samples: summary.guess_samples,
                    timestamp: Utc::now(),
                },
            ))
            .await;

        info!(
            version = committed.version,
            alpha = committed.policy.alpha,
            p_guess = committed.bkt.p_guess,
            reward_samples = summary.reward_samples,
            guess_samples = summary.guess_samples,
            duration_ms = start.elapsed().as_millis() as u64,
            "parameters recalibrated"
        );

        Ok(RecalibrationOutcome {
            committed: true,
            params: committed.as_ref().clone(),
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current() -> ModelParams {
        LiveParams::default().snapshot().as_ref().clone()
    }

    fn summary(reward_samples: usize, mean_reward: f64) -> HistorySummary {
        HistorySummary {
            reward_samples,
            mean_reward: Some(mean_reward),
            guess_samples: 0,
            low_confidence_correct_rate: None,
        }
    }

    #[test]
    fn high_reward_raises_alpha() {
        let (_, policy) = recalibrate(&current(), &summary(10, 0.9), &AdapterConfig::default());
        assert!((policy.alpha - 0.12).abs() < 1e-12);
    }

    #[test]
    fn low_reward_lowers_alpha_within_bounds() {
        let (_, policy) = recalibrate(&current(), &summary(10, 0.1), &AdapterConfig::default());
        assert_eq!(policy.alpha, 0.1);
    }

    #[test]
    fn mid_reward_keeps_alpha() {
        let (_, policy) = recalibrate(&current(), &summary(50, 0.6), &AdapterConfig::default());
        assert_eq!(policy.alpha, 0.1);
    }

    #[test]
    fn too_few_samples_change_nothing() {
        let config = AdapterConfig::default();
        let mut s = summary(9, 0.95);
        s.guess_samples = 19;
        s.low_confidence_correct_rate = Some(0.25);
        let (bkt, policy) = recalibrate(&current(), &s, &config);
        assert_eq!(bkt, current().bkt);
        assert_eq!(policy, current().policy);
    }

    #[test]
    fn guess_rate_is_bounded() {
        let config = AdapterConfig::default();
        let mut s = summary(0, 0.0);
        s.guess_samples = 40;
        s.low_confidence_correct_rate = Some(0.9);
        let (bkt, _) = recalibrate(&current(), &s, &config);
        assert_eq!(bkt.p_guess, 0.3);

        s.low_confidence_correct_rate = Some(0.25);
        let (bkt, _) = recalibrate(&current(), &s, &config);
        assert_eq!(bkt.p_guess, 0.25);
    }
}
