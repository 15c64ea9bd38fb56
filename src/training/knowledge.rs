use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::training::config::BktParams;
use crate::training::params::LiveParams;
use crate::training::store::{cas_update, KeyValueStore, ShardedStore};
use crate::training::types::{KnowledgeGap, MasteryLabel, SkillCategory, SkillMastery};

pub const MASTERY_PRIOR: f64 = 0.5;
const GAP_THRESHOLD: f64 = 0.6;
const EPSILON: f64 = 1e-12;

pub type MasteryKey = (String, SkillCategory);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryEntry {
    pub probability: f64,
    pub updated_at: i64,
    /// Number of updates applied to this key.
    #[serde(default)]
    pub seq: u64,
}

/// One BKT observation followed by learn/forget drift, clamped to [0, 1].
pub fn bkt_step(prior: f64, is_correct: bool, params: &BktParams) -> f64 {
    let p = if prior.is_finite() {
        prior.clamp(0.0, 1.0)
    } else {
        MASTERY_PRIOR
    };

    let (numerator, denominator) = if is_correct {
        let known = p * (1.0 - params.p_slip);
        (known, known + (1.0 - p) * params.p_guess)
    } else {
        let known = p * params.p_slip;
        (known, known + (1.0 - p) * (1.0 - params.p_guess))
    };

    let posterior = if denominator > EPSILON {
        numerator / denominator
    } else {
        p
    };

    let next = posterior + (1.0 - posterior) * params.p_learn - posterior * params.p_forget;
    if next.is_finite() {
        next.clamp(0.0, 1.0)
    } else {
        p
    }
}

pub struct KnowledgeTracker {
    store: Arc<dyn KeyValueStore<MasteryKey, MasteryEntry>>,
    params: Arc<LiveParams>,
}

impl KnowledgeTracker {
    pub fn new(
        store: Arc<dyn KeyValueStore<MasteryKey, MasteryEntry>>,
        params: Arc<LiveParams>,
    ) -> Self {
        Self { store, params }
    }

    pub fn in_memory(params: Arc<LiveParams>) -> Self {
        Self::new(Arc::new(ShardedStore::new()), params)
    }

    pub fn update_knowledge_state(
        &self,
        user_id: &str,
        skill_category: &str,
        is_correct: bool,
    ) -> Result<f64, EngineError> {
        let skill = SkillCategory::parse(skill_category)
            .ok_or_else(|| EngineError::UnknownSkillCategory(skill_category.to_string()))?;
        let params = self.params.snapshot();
        Ok(self.observe(user_id, skill, is_correct, &params.bkt).probability)
    }

    /// Applies one observation atomically for the (user, skill) key under a fixed
    /// parameter snapshot.
    pub fn observe(
        &self,
        user_id: &str,
        skill: SkillCategory,
        is_correct: bool,
        params: &BktParams,
    ) -> MasteryEntry {
        let key = (user_id.to_string(), skill);
        let now = chrono::Utc::now().timestamp_millis();
        let updated = cas_update(self.store.as_ref(), &key, |current| {
            let (prior, seq) = current
                .map(|e| (e.probability, e.seq))
                .unwrap_or((MASTERY_PRIOR, 0));
            Some(MasteryEntry {
                probability: bkt_step(prior, is_correct, params),
                updated_at: now,
                seq: seq + 1,
            })
        });

        let entry = updated.unwrap_or(MasteryEntry {
            probability: MASTERY_PRIOR,
            updated_at: now,
            seq: 0,
        });
        tracing::debug!(
            user_id = %user_id,
            skill = skill.as_str(),
            is_correct,
            "mastery updated"
        );
        entry
    }

    pub fn mastery(&self, user_id: &str, skill: SkillCategory) -> f64 {
        self.store
            .get(&(user_id.to_string(), skill))
            .map(|e| e.probability)
            .unwrap_or(MASTERY_PRIOR)
    }

    pub fn skill_mastery(&self, user_id: &str, skill: SkillCategory) -> SkillMastery {
        let probability = self.mastery(user_id, skill);
        SkillMastery {
            skill_category: skill,
            probability,
            label: MasteryLabel::from_probability(probability),
        }
    }

    pub fn get_skill_mastery(
        &self,
        user_id: &str,
        skill_category: &str,
    ) -> Result<SkillMastery, EngineError> {
        let skill = SkillCategory::parse(skill_category)
            .ok_or_else(|| EngineError::UnknownSkillCategory(skill_category.to_string()))?;
        Ok(self.skill_mastery(user_id, skill))
    }

    pub fn identify_knowledge_gaps(&self, user_id: &str) -> Vec<KnowledgeGap> {
        let mut gaps: Vec<KnowledgeGap> = SkillCategory::all()
            .iter()
            .filter_map(|skill| {
                let mastery = self.mastery(user_id, *skill);
                if mastery >= GAP_THRESHOLD {
                    return None;
                }
                Some(KnowledgeGap {
                    skill_category: *skill,
                    mastery,
                    priority_score: (1.0 - mastery) * skill.importance_weight(),
                })
            })
            .collect();

        gaps.sort_by(|a, b| b.priority_score.total_cmp(&a.priority_score));
        gaps
    }

    pub fn entries(&self) -> Vec<(MasteryKey, MasteryEntry)> {
        self.store.snapshot()
    }
}
