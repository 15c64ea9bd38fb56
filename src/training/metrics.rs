use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

static REGISTRY: OnceLock<Arc<AlgorithmRegistry>> = OnceLock::new();

pub fn registry() -> &'static Arc<AlgorithmRegistry> {
    REGISTRY.get_or_init(|| Arc::new(AlgorithmRegistry::new()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmId {
    KnowledgeTracing,
    PolicySelection,
    QUpdate,
    FeedbackRules,
    Recalibration,
}

impl AlgorithmId {
    pub fn all() -> &'static [AlgorithmId] {
        &[
            AlgorithmId::KnowledgeTracing,
            AlgorithmId::PolicySelection,
            AlgorithmId::QUpdate,
            AlgorithmId::FeedbackRules,
            AlgorithmId::Recalibration,
        ]
    }

    pub fn id(&self) -> &'static str {
        match self {
            AlgorithmId::KnowledgeTracing => "knowledge_bkt",
            AlgorithmId::PolicySelection => "policy_select",
            AlgorithmId::QUpdate => "policy_q_update",
            AlgorithmId::FeedbackRules => "feedback_rules",
            AlgorithmId::Recalibration => "adapter_recalibration",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AlgorithmId::KnowledgeTracing => "Bayesian Knowledge Tracing",
            AlgorithmId::PolicySelection => "Epsilon-Greedy Selection",
            AlgorithmId::QUpdate => "Tabular Q-Learning Update",
            AlgorithmId::FeedbackRules => "Threshold Feedback Rules",
            AlgorithmId::Recalibration => "Parameter Recalibration",
        }
    }

    pub fn layer(&self) -> &'static str {
        match self {
            AlgorithmId::KnowledgeTracing => "knowledge",
            AlgorithmId::PolicySelection | AlgorithmId::QUpdate => "policy",
            AlgorithmId::FeedbackRules => "session",
            AlgorithmId::Recalibration => "adapter",
        }
    }
}

#[derive(Debug, Default)]
pub struct AlgorithmMetrics {
    call_count: AtomicU64,
    total_latency_us: AtomicU64,
    error_count: AtomicU64,
    last_called_at: AtomicU64,
}

impl AlgorithmMetrics {
    pub fn record_call(&self, latency_us: u64) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.last_called_at.store(now_ms(), Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let calls = self.call_count.load(Ordering::Relaxed);
        if calls == 0 {
            return 0.0;
        }
        let total_us = self.total_latency_us.load(Ordering::Relaxed);
        let avg = (total_us as f64 / calls as f64) / 1000.0;
        (avg * 10000.0).round() / 10000.0
    }

    pub fn last_called_at(&self) -> Option<u64> {
        match self.last_called_at.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }
}

pub struct AlgorithmRegistry {
    metrics: HashMap<AlgorithmId, AlgorithmMetrics>,
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        let metrics = AlgorithmId::all()
            .iter()
            .map(|id| (*id, AlgorithmMetrics::default()))
            .collect();
        Self { metrics }
    }

    pub fn record(&self, id: AlgorithmId, latency_us: u64) {
        if let Some(m) = self.metrics.get(&id) {
            m.record_call(latency_us);
        }
    }

    pub fn record_error(&self, id: AlgorithmId) {
        if let Some(m) = self.metrics.get(&id) {
            m.record_error();
        }
    }

    pub fn get(&self, id: AlgorithmId) -> Option<&AlgorithmMetrics> {
        self.metrics.get(&id)
    }

    pub fn snapshot(&self) -> Vec<AlgorithmStatus> {
        AlgorithmId::all()
            .iter()
            .filter_map(|id| {
                let m = self.metrics.get(id)?;
                Some(AlgorithmStatus {
                    id: id.id().to_string(),
                    name: id.name().to_string(),
                    layer: id.layer().to_string(),
                    call_count: m.call_count(),
                    avg_latency_ms: m.avg_latency_ms(),
                    error_count: m.error_count(),
                    last_called_at: m.last_called_at(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmStatus {
    pub id: String,
    pub name: String,
    pub layer: String,
    pub call_count: u64,
    pub avg_latency_ms: f64,
    pub error_count: u64,
    pub last_called_at: Option<u64>,
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[macro_export]
macro_rules! track_algorithm {
    ($id:expr, $body:expr) => {{
        let start = std::time::Instant::now();
        let result = $body;
        let latency_us = start.elapsed().as_micros() as u64;
        $crate::training::metrics::registry().record($id, latency_us);
        result
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_macro_records_calls() {
        let before = registry()
            .get(AlgorithmId::FeedbackRules)
            .map(|m| m.call_count())
            .unwrap_or(0);
        let value = crate::track_algorithm!(AlgorithmId::FeedbackRules, 2 + 2);
        assert_eq!(value, 4);
        let after = registry()
            .get(AlgorithmId::FeedbackRules)
            .map(|m| m.call_count())
            .unwrap_or(0);
        assert!(after > before);
    }

    #[test]
    fn snapshot_lists_every_algorithm() {
        let registry = AlgorithmRegistry::new();
        registry.record(AlgorithmId::QUpdate, 1500);
        registry.record_error(AlgorithmId::QUpdate);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), AlgorithmId::all().len());
        let q = snapshot.iter().find(|s| s.id == "policy_q_update").unwrap();
        assert_eq!(q.call_count, 1);
        assert_eq!(q.error_count, 1);
        assert_eq!(q.avg_latency_ms, 1.5);
    }
}
