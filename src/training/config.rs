use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BktParams {
    pub p_learn: f64,
    pub p_slip: f64,
    pub p_guess: f64,
    pub p_forget: f64,
}

impl Default for BktParams {
    fn default() -> Self {
        Self {
            p_learn: 0.2,
            p_slip: 0.1,
            p_guess: 0.2,
            p_forget: 0.1,
        }
    }
}

impl BktParams {
    pub fn sanitized(self) -> Self {
        let unit = |v: f64, fallback: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { fallback };
        let defaults = Self::default();
        Self {
            p_learn: unit(self.p_learn, defaults.p_learn),
            p_slip: unit(self.p_slip, defaults.p_slip),
            p_guess: unit(self.p_guess, defaults.p_guess),
            p_forget: unit(self.p_forget, defaults.p_forget),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyParams {
    pub alpha: f64,
    pub gamma: f64,
    pub epsilon: f64,
}

impl Default for PolicyParams {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            gamma: 0.9,
            epsilon: 0.2,
        }
    }
}

impl PolicyParams {
    pub fn sanitized(self) -> Self {
        let unit = |v: f64, fallback: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { fallback };
        let defaults = Self::default();
        Self {
            alpha: unit(self.alpha, defaults.alpha),
            gamma: unit(self.gamma, defaults.gamma),
            epsilon: unit(self.epsilon, defaults.epsilon),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardWeights {
    pub accuracy: f64,
    pub attention: f64,
    pub confidence: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            accuracy: 0.4,
            attention: 0.3,
            confidence: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackThresholds {
    pub accuracy: f64,
    pub attention: f64,
    pub confidence: f64,
}

impl Default for FeedbackThresholds {
    fn default() -> Self {
        Self {
            accuracy: 0.7,
            attention: 0.6,
            confidence: 0.5,
        }
    }
}

/// Placeholder calibration for the stress composite and attention curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationConfig {
    pub heart_rate_min: f64,
    pub heart_rate_max: f64,
    pub skin_response_min: f64,
    pub skin_response_max: f64,
    /// Interactions per second at which attention reaches 0.5.
    pub attention_half_rate: f64,
    pub default_confidence: f64,
    pub recent_window: usize,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            heart_rate_min: 60.0,
            heart_rate_max: 120.0,
            skin_response_min: 0.0,
            skin_response_max: 100.0,
            attention_half_rate: 1.0,
            default_confidence: 0.5,
            recent_window: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterConfig {
    pub history_window_ms: i64,
    pub high_reward: f64,
    pub low_reward: f64,
    pub alpha_step: f64,
    pub alpha_min: f64,
    pub alpha_max: f64,
    pub p_guess_min: f64,
    pub p_guess_max: f64,
    pub low_confidence: f64,
    pub min_reward_samples: usize,
    pub min_guess_samples: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            history_window_ms: 24 * 60 * 60 * 1000,
            high_reward: 0.8,
            low_reward: 0.4,
            alpha_step: 0.02,
            alpha_min: 0.1,
            alpha_max: 0.5,
            p_guess_min: 0.1,
            p_guess_max: 0.3,
            low_confidence: 0.5,
            min_reward_samples: 10,
            min_guess_samples: 20,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingConfig {
    pub bkt: BktParams,
    pub policy: PolicyParams,
    pub reward: RewardWeights,
    pub feedback: FeedbackThresholds,
    pub normalization: NormalizationConfig,
    pub adapter: AdapterConfig,
}

impl TrainingConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let read = |name: &str| -> Option<f64> {
            std::env::var(name).ok().and_then(|v| v.trim().parse::<f64>().ok())
        };

        if let Some(v) = read("BKT_P_LEARN") {
            config.bkt.p_learn = v;
        }
        if let Some(v) = read("BKT_P_SLIP") {
            config.bkt.p_slip = v;
        }
        if let Some(v) = read("BKT_P_GUESS") {
            config.bkt.p_guess = v;
        }
        if let Some(v) = read("BKT_P_FORGET") {
            config.bkt.p_forget = v;
        }
        if let Some(v) = read("RL_ALPHA") {
            config.policy.alpha = v;
        }
        if let Some(v) = read("RL_GAMMA") {
            config.policy.gamma = v;
        }
        if let Some(v) = read("RL_EPSILON") {
            config.policy.epsilon = v;
        }

        config.bkt = config.bkt.sanitized();
        config.policy = config.policy.sanitized();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = TrainingConfig::default();
        assert_eq!(config.policy.alpha, 0.1);
        assert_eq!(config.policy.gamma, 0.9);
        assert_eq!(config.policy.epsilon, 0.2);
        let total = config.reward.accuracy + config.reward.attention + config.reward.confidence;
        assert!((total - 1.0).abs() < 1e-12);
        assert_eq!(config.normalization.recent_window, 5);
    }

    #[test]
    fn sanitize_replaces_non_finite_and_clamps() {
        let params = BktParams {
            p_learn: f64::NAN,
            p_slip: 1.5,
            p_guess: -0.2,
            p_forget: 0.05,
        }
        .sanitized();
        assert_eq!(params.p_learn, BktParams::default().p_learn);
        assert_eq!(params.p_slip, 1.0);
        assert_eq!(params.p_guess, 0.0);
        assert_eq!(params.p_forget, 0.05);
    }
}
