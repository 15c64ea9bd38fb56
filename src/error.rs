use serde::Serialize;

use crate::db::PersistenceError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("invalid module type: {0}")]
    InvalidModuleType(String),
    #[error("unknown skill category: {0}")]
    UnknownSkillCategory(String),
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("event timestamp {timestamp} precedes previous event at {previous}")]
    OutOfOrderEvent { timestamp: i64, previous: i64 },
    #[error("event addressed to session {event_session} submitted to {target_session}")]
    SessionMismatch {
        event_session: String,
        target_session: String,
    },
    #[error("state consistency violation: {0}")]
    StateConsistency(String),
    #[error("session {0} is not accepting events right now")]
    Overloaded(String),
    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("corrupt store: {0}")]
    CorruptStore(String),
}

impl EngineError {
    /// Machine-readable error kind exposed to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedEvent(_) | Self::OutOfOrderEvent { .. } | Self::SessionMismatch { .. } => {
                "validation"
            }
            Self::SessionNotFound(_) | Self::InvalidModuleType(_) | Self::UnknownSkillCategory(_) => {
                "not_found"
            }
            Self::StateConsistency(_) => "state_consistency",
            Self::Overloaded(_) => "overloaded",
            Self::Persistence(_) => "persistence",
            Self::CorruptStore(_) => "corrupt_store",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::InvalidModuleType(_) => "INVALID_MODULE_TYPE",
            Self::UnknownSkillCategory(_) => "UNKNOWN_SKILL_CATEGORY",
            Self::MalformedEvent(_) => "MALFORMED_EVENT",
            Self::OutOfOrderEvent { .. } => "OUT_OF_ORDER_EVENT",
            Self::SessionMismatch { .. } => "SESSION_MISMATCH",
            Self::StateConsistency(_) => "STATE_CONSISTENCY",
            Self::Overloaded(_) => "OVERLOADED",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::CorruptStore(_) => "CORRUPT_STORE",
        }
    }

    /// Operational errors carry their message to the caller; the rest are masked.
    pub fn is_operational(&self) -> bool {
        !matches!(
            self,
            Self::StateConsistency(_) | Self::Persistence(_) | Self::CorruptStore(_)
        )
    }

    pub fn to_body(&self) -> ErrorBody {
        let message = if self.is_operational() {
            self.to_string()
        } else {
            "internal engine error".to_string()
        };
        ErrorBody {
            kind: self.kind(),
            code: self.code(),
            message,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub code: &'static str,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(EngineError::SessionNotFound("s".into()).kind(), "not_found");
        assert_eq!(EngineError::InvalidModuleType("x".into()).kind(), "not_found");
        assert_eq!(EngineError::MalformedEvent("x".into()).kind(), "validation");
        assert_eq!(
            EngineError::OutOfOrderEvent { timestamp: 1, previous: 2 }.kind(),
            "validation"
        );
        assert_eq!(EngineError::StateConsistency("x".into()).kind(), "state_consistency");
    }

    #[test]
    fn internal_errors_are_masked() {
        let body = EngineError::StateConsistency("q(k0_p0_s0) = NaN".into()).to_body();
        assert_eq!(body.kind, "state_consistency");
        assert!(!body.message.contains("NaN"));

        let body = EngineError::SessionNotFound("abc".into()).to_body();
        assert!(body.message.contains("abc"));
    }
}
