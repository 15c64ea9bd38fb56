use crate::training::config::FeedbackThresholds;
use crate::training::types::{FeedbackMessage, FeedbackPriority, FeedbackType, SessionMetrics};

/// Fixed threshold rules, evaluated on every event independently of the policy.
pub struct FeedbackRules {
    thresholds: FeedbackThresholds,
}

impl FeedbackRules {
    pub fn new(thresholds: FeedbackThresholds) -> Self {
        Self { thresholds }
    }

    pub fn evaluate(&self, metrics: &SessionMetrics) -> Vec<FeedbackMessage> {
        let mut feedback = Vec::new();

        if metrics.accuracy < self.thresholds.accuracy {
            feedback.push(FeedbackMessage {
                feedback_type: FeedbackType::AccuracyHint,
                message: "Accuracy is below target. Review the step checklist before the next attempt."
                    .to_string(),
                priority: FeedbackPriority::High,
            });
        }

        if metrics.attention_score < self.thresholds.attention {
            feedback.push(FeedbackMessage {
                feedback_type: FeedbackType::BreakSuggestion,
                message: "Engagement is dropping. Consider a short break.".to_string(),
                priority: FeedbackPriority::Medium,
            });
        }

        if metrics.confidence_level < self.thresholds.confidence {
            feedback.push(FeedbackMessage {
                feedback_type: FeedbackType::Encouragement,
                message: "You are making progress. Keep going at your own pace.".to_string(),
                priority: FeedbackPriority::Low,
            });
        }

        feedback
    }
}

impl Default for FeedbackRules {
    fn default() -> Self {
        Self::new(FeedbackThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(accuracy: f64, attention_score: f64, confidence_level: f64) -> SessionMetrics {
        SessionMetrics {
            accuracy,
            completion_time: 0.0,
            attention_score,
            confidence_level,
        }
    }

    #[test]
    fn no_feedback_when_all_thresholds_met() {
        let rules = FeedbackRules::default();
        assert!(rules.evaluate(&metrics(0.9, 0.8, 0.8)).is_empty());
        assert!(rules.evaluate(&metrics(0.7, 0.6, 0.5)).is_empty());
    }

    #[test]
    fn every_breached_threshold_produces_one_message() {
        let rules = FeedbackRules::default();
        let feedback = rules.evaluate(&metrics(0.2, 0.1, 0.1));
        let types: Vec<_> = feedback.iter().map(|f| f.feedback_type).collect();
        assert_eq!(
            types,
            vec![
                FeedbackType::AccuracyHint,
                FeedbackType::BreakSuggestion,
                FeedbackType::Encouragement
            ]
        );
        assert_eq!(feedback[0].priority, FeedbackPriority::High);
        assert_eq!(feedback[2].priority, FeedbackPriority::Low);
    }

    #[test]
    fn single_rule_fires_alone() {
        let rules = FeedbackRules::default();
        let feedback = rules.evaluate(&metrics(0.95, 0.3, 0.9));
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].feedback_type, FeedbackType::BreakSuggestion);
    }
}
