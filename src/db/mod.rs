mod memory;
mod sqlite;
mod writer;

pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;
pub use writer::{DurableWriter, RetryPolicy, WriterStats};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::training::params::ModelParams;
use crate::training::types::{
    AdaptiveAction, FeedbackMessage, ModuleType, PolicyState, SessionMetrics, SessionReport,
    SkillCategory, TelemetryEvent,
};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// One processed telemetry event with everything the live path derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub module_type: ModuleType,
    pub event: TelemetryEvent,
    pub metrics: SessionMetrics,
    pub feedback: Vec<FeedbackMessage>,
    pub adaptive_action: AdaptiveAction,
    pub state: PolicyState,
    pub reward: Option<f64>,
    pub skill: Option<SkillCategory>,
    pub is_correct: bool,
    pub recorded_at: i64,
}

/// Keys are kept in their string form so a damaged store is caught on restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QValueRecord {
    pub state_key: String,
    pub action_key: String,
    pub value: f64,
    pub updated_at: i64,
    /// Per-key update count; a copy with a lower `seq` never replaces a newer one.
    #[serde(default)]
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryRecord {
    pub user_id: String,
    pub skill_category: String,
    pub probability: f64,
    pub updated_at: i64,
    #[serde(default)]
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalibrationRecord {
    pub params: ModelParams,
    pub reward_samples: usize,
    pub guess_samples: usize,
    pub recorded_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum DurableRecord {
    #[serde(rename = "EVENT")]
    Event(Box<EventRecord>),
    #[serde(rename = "Q_VALUE")]
    QValue(QValueRecord),
    #[serde(rename = "MASTERY")]
    Mastery(MasteryRecord),
    #[serde(rename = "SESSION_CLOSED")]
    SessionClosed(SessionReport),
    #[serde(rename = "RECALIBRATION")]
    Recalibration(RecalibrationRecord),
}

impl DurableRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            DurableRecord::Event(_) => "EVENT",
            DurableRecord::QValue(_) => "Q_VALUE",
            DurableRecord::Mastery(_) => "MASTERY",
            DurableRecord::SessionClosed(_) => "SESSION_CLOSED",
            DurableRecord::Recalibration(_) => "RECALIBRATION",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            DurableRecord::Event(r) => Some(&r.session_id),
            DurableRecord::SessionClosed(r) => Some(&r.session_id),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            DurableRecord::Event(r) => Some(&r.user_id),
            DurableRecord::Mastery(r) => Some(&r.user_id),
            DurableRecord::SessionClosed(r) => Some(&r.user_id),
            _ => None,
        }
    }

    pub fn recorded_at(&self) -> i64 {
        match self {
            DurableRecord::Event(r) => r.recorded_at,
            DurableRecord::QValue(r) => r.updated_at,
            DurableRecord::Mastery(r) => r.updated_at,
            DurableRecord::SessionClosed(r) => r.closed_at,
            DurableRecord::Recalibration(r) => r.recorded_at,
        }
    }

    /// Stable id for records that must not be stored twice on retry.
    pub fn record_id(&self) -> Option<String> {
        match self {
            DurableRecord::Event(r) => Some(r.id.clone()),
            DurableRecord::SessionClosed(r) => Some(format!("closed:{}", r.session_id)),
            DurableRecord::Recalibration(r) => Some(format!("params:{}", r.params.version)),
            _ => None,
        }
    }

    pub fn matches(&self, filter: &RecordFilter) -> bool {
        match filter {
            RecordFilter::Session(id) => self.session_id() == Some(id.as_str()),
            RecordFilter::User(id) => self.user_id() == Some(id.as_str()),
            RecordFilter::Since(ts) => self.recorded_at() >= *ts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFilter {
    Session(String),
    User(String),
    /// Records at or after this epoch-millisecond timestamp.
    Since(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub record: DurableRecord,
    pub reason: String,
    pub created_at: i64,
}

/// Latest persisted value per Q key and per mastery key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub q_values: Vec<QValueRecord>,
    pub mastery: Vec<MasteryRecord>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn append(&self, record: &DurableRecord) -> Result<(), PersistenceError>;

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<DurableRecord>, PersistenceError>;

    async fn dead_letter(&self, record: &DurableRecord, reason: &str)
        -> Result<(), PersistenceError>;

    async fn load_snapshot(&self) -> Result<StoreSnapshot, PersistenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mastery(user: &str, at: i64) -> DurableRecord {
        DurableRecord::Mastery(MasteryRecord {
            user_id: user.to_string(),
            skill_category: "COMMUNICATION".to_string(),
            probability: 0.4,
            updated_at: at,
            seq: 1,
        })
    }

    #[test]
    fn filters_select_by_user_and_time() {
        let record = mastery("u1", 100);
        assert!(record.matches(&RecordFilter::User("u1".into())));
        assert!(!record.matches(&RecordFilter::User("u2".into())));
        assert!(!record.matches(&RecordFilter::Session("s1".into())));
        assert!(record.matches(&RecordFilter::Since(100)));
        assert!(!record.matches(&RecordFilter::Since(101)));
    }

    #[test]
    fn record_serializes_with_kind_tag() {
        let json = serde_json::to_value(mastery("u1", 5)).unwrap();
        assert_eq!(json["kind"], "MASTERY");
        assert_eq!(json["payload"]["skillCategory"], "COMMUNICATION");
        let back: DurableRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, mastery("u1", 5));
    }
}
