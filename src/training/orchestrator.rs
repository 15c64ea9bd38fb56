use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::core::{SessionOpenedPayload, TrainingEvent};
use crate::db::{DurableRecord, RecordFilter};
use crate::error::EngineError;
use crate::training::session::{spawn_session, SessionCommand, SessionDeps, SessionHandle};
use crate::training::types::{CloseReason, IngestOutcome, ModuleType, SessionReport, TelemetryEvent};

const CLOSE_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub channel_capacity: usize,
    pub ingest_timeout: Duration,
    /// Reports of recently closed sessions kept in memory; older ones are read back
    /// from the record store.
    pub closed_report_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            ingest_timeout: Duration::from_secs(5),
            closed_report_capacity: 1024,
        }
    }
}

#[derive(Default)]
struct Registry {
    active: HashMap<String, Arc<SessionHandle>>,
    by_owner: HashMap<(String, ModuleType), String>,
    closed: HashMap<String, SessionReport>,
    closed_order: VecDeque<String>,
}

impl Registry {
    fn remember_closed(&mut self, report: SessionReport, capacity: usize) {
        if self.closed.contains_key(&report.session_id) {
            return;
        }
        while self.closed_order.len() >= capacity.max(1) {
            match self.closed_order.pop_front() {
                Some(evicted) => {
                    self.closed.remove(&evicted);
                }
                None => break,
            }
        }
        self.closed_order.push_back(report.session_id.clone());
        self.closed.insert(report.session_id.clone(), report);
    }
}

/// Routes telemetry to one actor per session and owns the session lifecycle.
pub struct SessionOrchestrator {
    deps: Arc<SessionDeps>,
    config: OrchestratorConfig,
    registry: Mutex<Registry>,
}

impl SessionOrchestrator {
    pub(crate) fn new(deps: Arc<SessionDeps>, config: OrchestratorConfig) -> Self {
        Self {
            deps,
            config,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Returns the id of the caller's active session for this module, opening one if needed.
    pub async fn open_session(&self, user_id: &str, module_type: &str) -> Result<String, EngineError> {
        let module = ModuleType::parse(module_type)
            .ok_or_else(|| EngineError::InvalidModuleType(module_type.to_string()))?;

        let handle = {
            let mut registry = self.registry.lock();
            let owner = (user_id.to_string(), module);
            let existing = registry
                .by_owner
                .get(&owner)
                .and_then(|id| registry.active.get(id))
                .filter(|h| !h.is_closing())
                .map(|h| h.session_id.clone());
            if let Some(session_id) = existing {
                return Ok(session_id);
            }

            let session_id = uuid::Uuid::new_v4().to_string();
            let handle = spawn_session(
                session_id.clone(),
                user_id.to_string(),
                module,
                self.config.channel_capacity,
                Arc::clone(&self.deps),
            );
            registry.by_owner.insert(owner, session_id.clone());
            registry.active.insert(session_id, Arc::clone(&handle));
            handle
        };

        info!(
            session_id = %handle.session_id,
            user_id = %user_id,
            module_type = module.as_str(),
            "session opened"
        );
        self.deps
            .bus
            .publish(TrainingEvent::SessionOpened(SessionOpenedPayload {
                user_id: user_id.to_string(),
                session_id: handle.session_id.clone(),
                module_type: module,
                timestamp: Utc::now(),
            }))
            .await;

        Ok(handle.session_id.clone())
    }

    pub async fn ingest(
        &self,
        session_id: &str,
        event: TelemetryEvent,
    ) -> Result<IngestOutcome, EngineError> {
        let handle = self
            .active_handle(session_id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        handle.touch();

        let (reply, response) = oneshot::channel();
        let command = SessionCommand::Ingest { event, reply };
        match tokio::time::timeout(self.config.ingest_timeout, handle.sender.send(command)).await {
            Err(_) => {
                warn!(session_id = %session_id, "session queue full");
                return Err(EngineError::Overloaded(session_id.to_string()));
            }
            Ok(Err(_)) => return Err(EngineError::SessionNotFound(session_id.to_string())),
            Ok(Ok(())) => {}
        }

        response.await.map_err(|_| {
            EngineError::StateConsistency(format!("session worker for {session_id} was lost"))
        })?
    }

    pub async fn close_session(&self, session_id: &str) -> Result<SessionReport, EngineError> {
        self.close_with_reason(session_id, CloseReason::Explicit).await
    }

    pub(crate) async fn close_with_reason(
        &self,
        session_id: &str,
        reason: CloseReason,
    ) -> Result<SessionReport, EngineError> {
        let handle = {
            let registry = self.registry.lock();
            if let Some(report) = registry.closed.get(session_id) {
                return Ok(report.clone());
            }
            let handle = registry.active.get(session_id).cloned();
            handle
        };
        let Some(handle) = handle else {
            return self.closed_report_from_store(session_id).await;
        };

        handle.closing.store(true, Ordering::Release);

        let report = handle
            .report
            .get_or_try_init(|| async {
                let (reply, response) = oneshot::channel();
                handle
                    .sender
                    .send(SessionCommand::Close { reason, reply })
                    .await
                    .map_err(|_| {
                        EngineError::StateConsistency(format!(
                            "session worker for {session_id} was lost"
                        ))
                    })?;
                response.await.map_err(|_| {
                    EngineError::StateConsistency(format!(
                        "session worker for {session_id} was lost"
                    ))
                })
            })
            .await?
            .clone();

        let mut registry = self.registry.lock();
        registry.active.remove(session_id);
        let owner = (handle.user_id.clone(), handle.module_type);
        if registry.by_owner.get(&owner).map(String::as_str) == Some(session_id) {
            registry.by_owner.remove(&owner);
        }
        registry.remember_closed(report.clone(), self.config.closed_report_capacity);

        Ok(report)
    }

    /// Looks up the report of a session evicted from the in-memory cache.
    async fn closed_report_from_store(&self, session_id: &str) -> Result<SessionReport, EngineError> {
        let not_found = || EngineError::SessionNotFound(session_id.to_string());
        if let Err(e) = self.deps.writer.flush().await {
            warn!(session_id = %session_id, error = %e, "flush before report lookup failed");
        }
        let records = match self
            .deps
            .store
            .query(&RecordFilter::Session(session_id.to_string()))
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "closed report lookup failed");
                return Err(not_found());
            }
        };

        let report = records.into_iter().find_map(|record| match record {
            DurableRecord::SessionClosed(report) => Some(report),
            _ => None,
        });
        match report {
            Some(report) => {
                debug!(session_id = %session_id, "closed report read from store");
                Ok(report)
            }
            None => Err(not_found()),
        }
    }

    /// Closes every session idle for at least `max_idle`. Returns the closed ids.
    pub async fn reap_idle(&self, max_idle: Duration) -> Vec<String> {
        let now = Utc::now().timestamp_millis();
        let limit = max_idle.as_millis() as i64;
        let idle: Vec<String> = {
            let registry = self.registry.lock();
            registry
                .active
                .values()
                .filter(|h| !h.is_closing() && h.idle_for_ms(now) >= limit)
                .map(|h| h.session_id.clone())
                .collect()
        };

        let mut closed = Vec::with_capacity(idle.len());
        for session_id in idle {
            match self.close_with_reason(&session_id, CloseReason::IdleTimeout).await {
                Ok(_) => closed.push(session_id),
                Err(e) => warn!(session_id = %session_id, error = %e, "idle close failed"),
            }
        }
        if !closed.is_empty() {
            info!(count = closed.len(), "idle sessions reaped");
        }
        closed
    }

    pub async fn close_all(&self, reason: CloseReason) -> Vec<SessionReport> {
        let ids: Vec<String> = self.registry.lock().active.keys().cloned().collect();
        stream::iter(ids)
            .map(|session_id| async move {
                match self.close_with_reason(&session_id, reason).await {
                    Ok(report) => Some(report),
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "close failed");
                        None
                    }
                }
            })
            .buffer_unordered(CLOSE_CONCURRENCY)
            .filter_map(|report| async move { report })
            .collect()
            .await
    }

    pub fn active_count(&self) -> usize {
        self.registry.lock().active.len()
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.active_handle(session_id).is_some()
    }

    fn active_handle(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.registry
            .lock()
            .active
            .get(session_id)
            .filter(|h| !h.is_closing())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::types::SessionStatus;

    fn report(session_id: &str) -> SessionReport {
        SessionReport {
            session_id: session_id.to_string(),
            user_id: "u1".to_string(),
            module_type: ModuleType::Physical,
            status: SessionStatus::Closed,
            close_reason: CloseReason::Explicit,
            event_count: 0,
            opened_at: 0,
            closed_at: 1,
            mean_accuracy: 0.0,
            mean_attention: 0.0,
            mean_confidence: 0.0,
            mean_reward: None,
            feedback_count: 0,
            last_action: None,
            skills: Vec::new(),
        }
    }

    #[test]
    fn closed_cache_evicts_oldest_first() {
        let mut registry = Registry::default();
        for id in ["a", "b", "c"] {
            registry.remember_closed(report(id), 2);
        }
        registry.remember_closed(report("b"), 2);

        assert_eq!(registry.closed.len(), 2);
        assert!(!registry.closed.contains_key("a"));
        assert_eq!(registry.closed_order, ["b", "c"]);
    }
}
