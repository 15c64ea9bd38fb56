pub mod adapter;
pub mod config;
pub mod engine;
pub mod feedback;
pub mod knowledge;
pub mod metrics;
pub mod orchestrator;
pub mod params;
pub mod policy;
pub(crate) mod session;
pub mod store;
pub mod telemetry;
pub mod types;

pub use adapter::{HistorySummary, ParameterAdapter, RecalibrationOutcome};
pub use config::TrainingConfig;
pub use engine::{EngineOptions, TrainingEngine};
pub use knowledge::KnowledgeTracker;
pub use orchestrator::{OrchestratorConfig, SessionOrchestrator};
pub use params::{LiveParams, ModelParams};
pub use policy::PolicyEngine;
pub use types::*;
