use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, OnceCell};
use tracing::{debug, error, info};

use crate::core::{
    ActionSelectedPayload, EventBus, FeedbackIssuedPayload, SessionClosedPayload, TrainingEvent,
};
use crate::db::{
    DurableRecord, DurableWriter, EventRecord, MasteryRecord, QValueRecord, RecordStore,
};
use crate::error::EngineError;
use crate::track_algorithm;
use crate::training::config::TrainingConfig;
use crate::training::feedback::FeedbackRules;
use crate::training::knowledge::{KnowledgeTracker, MASTERY_PRIOR};
use crate::training::metrics::{registry, AlgorithmId};
use crate::training::params::LiveParams;
use crate::training::policy::{discretize, PolicyEngine};
use crate::training::telemetry::{compute_reward, normalize_event};
use crate::training::types::{
    AdaptiveAction, CloseReason, IngestOutcome, ModuleType, PolicyState, SessionReport,
    SessionStatus, SkillCategory, TelemetryEvent, Transition,
};

/// Collaborators shared by every session actor.
pub(crate) struct SessionDeps {
    pub tracker: Arc<KnowledgeTracker>,
    pub policy: Arc<PolicyEngine>,
    pub params: Arc<LiveParams>,
    pub feedback: FeedbackRules,
    pub config: TrainingConfig,
    pub writer: DurableWriter,
    pub store: Arc<dyn RecordStore>,
    pub bus: Arc<EventBus>,
}

pub(crate) enum SessionCommand {
    Ingest {
        event: TelemetryEvent,
        reply: oneshot::Sender<Result<IngestOutcome, EngineError>>,
    },
    Close {
        reason: CloseReason,
        reply: oneshot::Sender<SessionReport>,
    },
}

/// Orchestrator-side view of a running session actor.
pub(crate) struct SessionHandle {
    pub session_id: String,
    pub user_id: String,
    pub module_type: ModuleType,
    pub sender: mpsc::Sender<SessionCommand>,
    pub last_activity: AtomicI64,
    pub closing: AtomicBool,
    pub report: OnceCell<SessionReport>,
}

impl SessionHandle {
    pub fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn idle_for_ms(&self, now: i64) -> i64 {
        now - self.last_activity.load(Ordering::Relaxed)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

/// Spawns the actor and returns the handle that feeds it.
pub(crate) fn spawn_session(
    session_id: String,
    user_id: String,
    module_type: ModuleType,
    capacity: usize,
    deps: Arc<SessionDeps>,
) -> Arc<SessionHandle> {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let now = Utc::now().timestamp_millis();

    let actor = SessionActor::new(session_id.clone(), user_id.clone(), module_type, now, deps);
    tokio::spawn(actor.run(receiver));

    Arc::new(SessionHandle {
        session_id,
        user_id,
        module_type,
        sender,
        last_activity: AtomicI64::new(now),
        closing: AtomicBool::new(false),
        report: OnceCell::new(),
    })
}

struct SessionActor {
    session_id: String,
    user_id: String,
    module_type: ModuleType,
    opened_at: i64,
    deps: Arc<SessionDeps>,

    last_state: Option<PolicyState>,
    last_action: Option<AdaptiveAction>,
    last_timestamp: Option<i64>,
    knowledge: f64,
    recent_accuracy: VecDeque<f64>,
    recent_stress: VecDeque<f64>,
    skills: BTreeSet<SkillCategory>,

    event_count: u64,
    sum_accuracy: f64,
    sum_attention: f64,
    sum_confidence: f64,
    sum_reward: f64,
    reward_count: u64,
    feedback_count: u64,
}

impl SessionActor {
    fn new(
        session_id: String,
        user_id: String,
        module_type: ModuleType,
        opened_at: i64,
        deps: Arc<SessionDeps>,
    ) -> Self {
        let window = deps.config.normalization.recent_window.max(1);
        Self {
            session_id,
            user_id,
            module_type,
            opened_at,
            deps,
            last_state: None,
            last_action: None,
            last_timestamp: None,
            knowledge: MASTERY_PRIOR,
            recent_accuracy: VecDeque::with_capacity(window),
            recent_stress: VecDeque::with_capacity(window),
            skills: BTreeSet::new(),
            event_count: 0,
            sum_accuracy: 0.0,
            sum_attention: 0.0,
            sum_confidence: 0.0,
            sum_reward: 0.0,
            reward_count: 0,
            feedback_count: 0,
        }
    }

    async fn run(mut self, mut receiver: mpsc::Receiver<SessionCommand>) {
        debug!(session_id = %self.session_id, "session actor started");

        while let Some(command) = receiver.recv().await {
            match command {
                SessionCommand::Ingest { event, reply } => {
                    let result = self.process(event).await;
                    let _ = reply.send(result);
                }
                SessionCommand::Close { reason, reply } => {
                    receiver.close();
                    let mut waiters = vec![reply];
                    // Anything queued behind the close was submitted after it.
                    while let Some(late) = receiver.recv().await {
                        match late {
                            SessionCommand::Ingest { reply, .. } => {
                                let _ = reply
                                    .send(Err(EngineError::SessionNotFound(self.session_id.clone())));
                            }
                            SessionCommand::Close { reply, .. } => waiters.push(reply),
                        }
                    }

                    let report = self.finalize(reason).await;
                    for waiter in waiters {
                        let _ = waiter.send(report.clone());
                    }
                    return;
                }
            }
        }

        self.finalize(CloseReason::Shutdown).await;
    }

    async fn process(&mut self, event: TelemetryEvent) -> Result<IngestOutcome, EngineError> {
        if event.session_id != self.session_id {
            return Err(EngineError::SessionMismatch {
                event_session: event.session_id,
                target_session: self.session_id.clone(),
            });
        }
        if let Some(previous) = self.last_timestamp {
            if event.timestamp < previous {
                return Err(EngineError::OutOfOrderEvent {
                    timestamp: event.timestamp,
                    previous,
                });
            }
        }

        let deps = Arc::clone(&self.deps);
        let normalized = normalize_event(&event, &deps.config.normalization)?;
        let params = deps.params.snapshot();
        let now = Utc::now().timestamp_millis();

        if let Some(skill) = normalized.skill {
            let entry = track_algorithm!(
                AlgorithmId::KnowledgeTracing,
                deps.tracker
                    .observe(&self.user_id, skill, normalized.is_correct, &params.bkt)
            );
            self.knowledge = entry.probability;
            self.skills.insert(skill);
            deps.writer.submit(DurableRecord::Mastery(MasteryRecord {
                user_id: self.user_id.clone(),
                skill_category: skill.as_str().to_string(),
                probability: entry.probability,
                updated_at: entry.updated_at,
                seq: entry.seq,
            }));
        }

        let window = deps.config.normalization.recent_window.max(1);
        push_window(&mut self.recent_accuracy, normalized.metrics.accuracy, window);
        push_window(&mut self.recent_stress, normalized.stress, window);
        let state = discretize(
            self.knowledge,
            mean(&self.recent_accuracy),
            mean(&self.recent_stress),
        );

        let reward = compute_reward(&normalized.metrics, &deps.config.reward);
        let mut credited = None;
        if let (Some(prev_state), Some(prev_action)) = (self.last_state, self.last_action) {
            let transition = Transition {
                state: prev_state,
                action: prev_action,
                next_state: state,
                reward,
            };
            let updated = track_algorithm!(
                AlgorithmId::QUpdate,
                deps.policy.apply_transition(&transition, &params.policy)
            );
            match updated {
                Ok(entry) => {
                    deps.writer.submit(DurableRecord::QValue(QValueRecord {
                        state_key: prev_state.key(),
                        action_key: prev_action.key(),
                        value: entry.value,
                        updated_at: now,
                        seq: entry.seq,
                    }));
                    credited = Some(reward);
                }
                Err(e) => {
                    registry().record_error(AlgorithmId::QUpdate);
                    error!(session_id = %self.session_id, error = %e, "q update rejected");
                    return Err(e);
                }
            }
        }

        let action = track_algorithm!(
            AlgorithmId::PolicySelection,
            deps.policy
                .select_action(&state, params.policy.epsilon, &mut rand::rng())
        );
        let feedback = track_algorithm!(
            AlgorithmId::FeedbackRules,
            deps.feedback.evaluate(&normalized.metrics)
        );

        self.last_state = Some(state);
        self.last_action = Some(action);
        self.last_timestamp = Some(event.timestamp);
        self.event_count += 1;
        self.sum_accuracy += normalized.metrics.accuracy;
        self.sum_attention += normalized.metrics.attention_score;
        self.sum_confidence += normalized.metrics.confidence_level;
        self.feedback_count += feedback.len() as u64;
        if let Some(r) = credited {
            self.sum_reward += r;
            self.reward_count += 1;
        }

        debug!(
            session_id = %self.session_id,
            state = %state.key(),
            action = %action.key(),
            reward = ?credited,
            "event processed"
        );

        let outcome = IngestOutcome {
            metrics: normalized.metrics,
            feedback,
            adaptive_action: action,
        };

        deps.writer.submit(DurableRecord::Event(Box::new(EventRecord {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            module_type: self.module_type,
            event,
            metrics: outcome.metrics,
            feedback: outcome.feedback.clone(),
            adaptive_action: action,
            state,
            reward: credited,
            skill: normalized.skill,
            is_correct: normalized.is_correct,
            recorded_at: now,
        })));

        let timestamp = Utc::now();
        deps.bus
            .publish(TrainingEvent::ActionSelected(ActionSelectedPayload {
                user_id: self.user_id.clone(),
                session_id: self.session_id.clone(),
                state,
                action,
                reward: credited,
                timestamp,
            }))
            .await;
        if !outcome.feedback.is_empty() {
            deps.bus
                .publish(TrainingEvent::FeedbackIssued(FeedbackIssuedPayload {
                    user_id: self.user_id.clone(),
                    session_id: self.session_id.clone(),
                    feedback: outcome.feedback.clone(),
                    timestamp,
                }))
                .await;
        }

        Ok(outcome)
    }

    async fn finalize(&self, reason: CloseReason) -> SessionReport {
        let count = self.event_count as f64;
        let avg = |sum: f64| if self.event_count > 0 { sum / count } else { 0.0 };

        let report = SessionReport {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            module_type: self.module_type,
            status: SessionStatus::Closed,
            close_reason: reason,
            event_count: self.event_count,
            opened_at: self.opened_at,
            closed_at: Utc::now().timestamp_millis(),
            mean_accuracy: avg(self.sum_accuracy),
            mean_attention: avg(self.sum_attention),
            mean_confidence: avg(self.sum_confidence),
            mean_reward: (self.reward_count > 0)
                .then(|| self.sum_reward / self.reward_count as f64),
            feedback_count: self.feedback_count,
            last_action: self.last_action,
            skills: self
                .skills
                .iter()
                .map(|skill| self.deps.tracker.skill_mastery(&self.user_id, *skill))
                .collect(),
        };

        self.deps
            .writer
            .submit(DurableRecord::SessionClosed(report.clone()));
        self.deps
            .bus
            .publish(TrainingEvent::SessionClosed(SessionClosedPayload {
                user_id: self.user_id.clone(),
                session_id: self.session_id.clone(),
                close_reason: reason,
                event_count: self.event_count,
                timestamp: Utc::now(),
            }))
            .await;

        info!(
            session_id = %self.session_id,
            user_id = %self.user_id,
            events = self.event_count,
            reason = ?reason,
            "session closed"
        );
        report
    }
}

fn push_window(window: &mut VecDeque<f64>, value: f64, size: usize) {
    window.push_back(value);
    while window.len() > size {
        window.pop_front();
    }
}

fn mean(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_keeps_most_recent_values() {
        let mut window = VecDeque::new();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0] {
            push_window(&mut window, v, 5);
        }
        assert_eq!(window.len(), 5);
        assert_eq!(window.front(), Some(&2.0));
        assert_eq!(mean(&window), 4.0);
    }

    #[test]
    fn empty_window_mean_is_zero() {
        assert_eq!(mean(&VecDeque::new()), 0.0);
    }
}
