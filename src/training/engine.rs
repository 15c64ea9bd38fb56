use std::sync::Arc;

use tracing::{info, warn};

use crate::core::EventBus;
use crate::db::{DurableWriter, RecordStore, RetryPolicy, StoreSnapshot};
use crate::error::EngineError;
use crate::training::adapter::ParameterAdapter;
use crate::training::config::TrainingConfig;
use crate::training::feedback::FeedbackRules;
use crate::training::knowledge::{KnowledgeTracker, MasteryEntry, MasteryKey};
use crate::training::orchestrator::{OrchestratorConfig, SessionOrchestrator};
use crate::training::params::LiveParams;
use crate::training::policy::{PolicyEngine, QEntry, QKey};
use crate::training::session::SessionDeps;
use crate::training::store::ShardedStore;
use crate::training::types::{
    AdaptiveAction, CloseReason, IngestOutcome, KnowledgeGap, PolicyState, SessionReport,
    SkillCategory, SkillMastery, TelemetryEvent,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    pub orchestrator: OrchestratorConfig,
    pub retry: RetryPolicy,
}

/// Validated contents of a persisted snapshot, ready to seed the live stores.
pub struct RestoredState {
    pub q_values: Vec<(QKey, QEntry)>,
    pub mastery: Vec<(MasteryKey, MasteryEntry)>,
}

/// Rejects the whole snapshot on the first entry that could not have been written by a
/// healthy engine.
pub fn validate_snapshot(snapshot: &StoreSnapshot) -> Result<RestoredState, EngineError> {
    let mut q_values = Vec::with_capacity(snapshot.q_values.len());
    for record in &snapshot.q_values {
        let state = PolicyState::parse_key(&record.state_key).ok_or_else(|| {
            EngineError::CorruptStore(format!("invalid state key {:?}", record.state_key))
        })?;
        let action = AdaptiveAction::parse_key(&record.action_key).ok_or_else(|| {
            EngineError::CorruptStore(format!("invalid action key {:?}", record.action_key))
        })?;
        if !record.value.is_finite() {
            return Err(EngineError::CorruptStore(format!(
                "non-finite q value for {}/{}",
                record.state_key, record.action_key
            )));
        }
        q_values.push((
            (state, action),
            QEntry {
                value: record.value,
                seq: record.seq,
            },
        ));
    }

    let mut mastery = Vec::with_capacity(snapshot.mastery.len());
    for record in &snapshot.mastery {
        let skill = SkillCategory::parse(&record.skill_category).ok_or_else(|| {
            EngineError::CorruptStore(format!("invalid skill {:?}", record.skill_category))
        })?;
        if !(0.0..=1.0).contains(&record.probability) {
            return Err(EngineError::CorruptStore(format!(
                "mastery out of range for user {} skill {}",
                record.user_id, record.skill_category
            )));
        }
        mastery.push((
            (record.user_id.clone(), skill),
            MasteryEntry {
                probability: record.probability,
                updated_at: record.updated_at,
                seq: record.seq,
            },
        ));
    }

    Ok(RestoredState { q_values, mastery })
}

pub struct TrainingEngine {
    params: Arc<LiveParams>,
    tracker: Arc<KnowledgeTracker>,
    policy: Arc<PolicyEngine>,
    orchestrator: SessionOrchestrator,
    adapter: ParameterAdapter,
    writer: DurableWriter,
    bus: Arc<EventBus>,
    store: Arc<dyn RecordStore>,
}

impl TrainingEngine {
    /// Starts with empty Q and mastery tables. Must run inside a tokio runtime.
    pub fn new(config: TrainingConfig, options: EngineOptions, store: Arc<dyn RecordStore>) -> Self {
        Self::build(
            config,
            options,
            store,
            RestoredState {
                q_values: Vec::new(),
                mastery: Vec::new(),
            },
        )
    }

    /// Seeds the live tables from the store's latest snapshot. A snapshot with any invalid
    /// entry fails with `CorruptStore` and nothing is served.
    pub async fn restore(
        config: TrainingConfig,
        options: EngineOptions,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self, EngineError> {
        let snapshot = store.load_snapshot().await?;
        let restored = match validate_snapshot(&snapshot) {
            Ok(restored) => restored,
            Err(e) => {
                warn!(error = %e, "snapshot rejected");
                return Err(e);
            }
        };
        info!(
            q_values = restored.q_values.len(),
            mastery = restored.mastery.len(),
            "engine state restored"
        );
        Ok(Self::build(config, options, store, restored))
    }

    fn build(
        config: TrainingConfig,
        options: EngineOptions,
        store: Arc<dyn RecordStore>,
        restored: RestoredState,
    ) -> Self {
        let params = Arc::new(LiveParams::new(config.bkt, config.policy));
        let tracker = Arc::new(KnowledgeTracker::new(
            Arc::new(ShardedStore::from_entries(restored.mastery)),
            Arc::clone(&params),
        ));
        let policy = Arc::new(PolicyEngine::new(
            Arc::new(ShardedStore::from_entries(restored.q_values)),
            Arc::clone(&params),
        ));
        let writer = DurableWriter::spawn(Arc::clone(&store), options.retry);
        let bus = Arc::new(EventBus::new());

        let adapter = ParameterAdapter::new(
            Arc::clone(&params),
            Arc::clone(&store),
            writer.clone(),
            Arc::clone(&bus),
            config.adapter,
        );
        let deps = Arc::new(SessionDeps {
            tracker: Arc::clone(&tracker),
            policy: Arc::clone(&policy),
            params: Arc::clone(&params),
            feedback: FeedbackRules::new(config.feedback),
            config,
            writer: writer.clone(),
            store: Arc::clone(&store),
            bus: Arc::clone(&bus),
        });

        Self {
            params,
            tracker,
            policy,
            orchestrator: SessionOrchestrator::new(deps, options.orchestrator),
            adapter,
            writer,
            bus,
            store,
        }
    }

    pub async fn open_session(&self, user_id: &str, module_type: &str) -> Result<String, EngineError> {
        self.orchestrator.open_session(user_id, module_type).await
    }

    pub async fn ingest(
        &self,
        session_id: &str,
        event: TelemetryEvent,
    ) -> Result<IngestOutcome, EngineError> {
        self.orchestrator.ingest(session_id, event).await
    }

    pub async fn close_session(&self, session_id: &str) -> Result<SessionReport, EngineError> {
        self.orchestrator.close_session(session_id).await
    }

    pub fn get_skill_mastery(
        &self,
        user_id: &str,
        skill_category: &str,
    ) -> Result<SkillMastery, EngineError> {
        self.tracker.get_skill_mastery(user_id, skill_category)
    }

    pub fn identify_knowledge_gaps(&self, user_id: &str) -> Vec<KnowledgeGap> {
        self.tracker.identify_knowledge_gaps(user_id)
    }

    /// Closes every live session, then waits for the writer to drain.
    pub async fn shutdown(&self) -> Vec<SessionReport> {
        let reports = self.orchestrator.close_all(CloseReason::Shutdown).await;
        if let Err(e) = self.writer.flush().await {
            warn!(error = %e, "writer flush failed during shutdown");
        }
        info!(closed = reports.len(), "engine shut down");
        reports
    }

    pub fn orchestrator(&self) -> &SessionOrchestrator {
        &self.orchestrator
    }

    pub fn tracker(&self) -> &Arc<KnowledgeTracker> {
        &self.tracker
    }

    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    pub fn params(&self) -> &Arc<LiveParams> {
        &self.params
    }

    pub fn adapter(&self) -> &ParameterAdapter {
        &self.adapter
    }

    pub fn writer(&self) -> &DurableWriter {
        &self.writer
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MasteryRecord, QValueRecord};

    fn q(state_key: &str, value: f64) -> QValueRecord {
        QValueRecord {
            state_key: state_key.to_string(),
            action_key: "0|SIMULATION|GUIDED".to_string(),
            value,
            updated_at: 1,
            seq: 3,
        }
    }

    #[test]
    fn valid_snapshot_is_accepted() {
        let snapshot = StoreSnapshot {
            q_values: vec![q("k1_p2_s0", 0.4)],
            mastery: vec![MasteryRecord {
                user_id: "u1".to_string(),
                skill_category: "DECISION_MAKING".to_string(),
                probability: 0.7,
                updated_at: 1,
                seq: 2,
            }],
        };
        let restored = validate_snapshot(&snapshot).unwrap();
        assert_eq!(restored.q_values.len(), 1);
        assert_eq!(restored.q_values[0].1.seq, 3);
        assert_eq!(restored.mastery[0].1.seq, 2);
        assert_eq!(restored.mastery[0].0 .1, SkillCategory::DecisionMaking);
    }

    #[test]
    fn bad_key_or_value_is_corrupt() {
        for bad in [q("k9_p0_s0", 0.1), q("k0_p0_s0", f64::NAN), q("garbage", 0.0)] {
            let snapshot = StoreSnapshot {
                q_values: vec![bad],
                mastery: Vec::new(),
            };
            let err = validate_snapshot(&snapshot).err().unwrap();
            assert_eq!(err.kind(), "corrupt_store");
        }
    }

    #[test]
    fn mastery_out_of_range_is_corrupt() {
        let snapshot = StoreSnapshot {
            q_values: Vec::new(),
            mastery: vec![MasteryRecord {
                user_id: "u1".to_string(),
                skill_category: "COMMUNICATION".to_string(),
                probability: 1.5,
                updated_at: 1,
                seq: 1,
            }],
        };
        assert!(matches!(
            validate_snapshot(&snapshot),
            Err(EngineError::CorruptStore(_))
        ));
    }
}
