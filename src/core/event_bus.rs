use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::training::params::ModelParams;
use crate::training::types::{
    AdaptiveAction, CloseReason, FeedbackMessage, ModuleType, PolicyState,
};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TrainingEvent {
    #[serde(rename = "SESSION_OPENED")]
    SessionOpened(SessionOpenedPayload),

    #[serde(rename = "ACTION_SELECTED")]
    ActionSelected(ActionSelectedPayload),

    #[serde(rename = "FEEDBACK_ISSUED")]
    FeedbackIssued(FeedbackIssuedPayload),

    #[serde(rename = "SESSION_CLOSED")]
    SessionClosed(SessionClosedPayload),

    #[serde(rename = "PARAMETERS_RECALIBRATED")]
    ParametersRecalibrated(ParametersRecalibratedPayload),
}

impl TrainingEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            TrainingEvent::SessionOpened(_) => "SESSION_OPENED",
            TrainingEvent::ActionSelected(_) => "ACTION_SELECTED",
            TrainingEvent::FeedbackIssued(_) => "FEEDBACK_ISSUED",
            TrainingEvent::SessionClosed(_) => "SESSION_CLOSED",
            TrainingEvent::ParametersRecalibrated(_) => "PARAMETERS_RECALIBRATED",
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            TrainingEvent::SessionOpened(p) => Some(&p.user_id),
            TrainingEvent::ActionSelected(p) => Some(&p.user_id),
            TrainingEvent::FeedbackIssued(p) => Some(&p.user_id),
            TrainingEvent::SessionClosed(p) => Some(&p.user_id),
            TrainingEvent::ParametersRecalibrated(_) => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            TrainingEvent::SessionOpened(p) => Some(&p.session_id),
            TrainingEvent::ActionSelected(p) => Some(&p.session_id),
            TrainingEvent::FeedbackIssued(p) => Some(&p.session_id),
            TrainingEvent::SessionClosed(p) => Some(&p.session_id),
            TrainingEvent::ParametersRecalibrated(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOpenedPayload {
    pub user_id: String,
    pub session_id: String,
    pub module_type: ModuleType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSelectedPayload {
    pub user_id: String,
    pub session_id: String,
    pub state: PolicyState,
    pub action: AdaptiveAction,
    pub reward: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackIssuedPayload {
    pub user_id: String,
    pub session_id: String,
    pub feedback: Vec<FeedbackMessage>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClosedPayload {
    pub user_id: String,
    pub session_id: String,
    pub close_reason: CloseReason,
    pub event_count: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParametersRecalibratedPayload {
    pub params: ModelParams,
    pub reward_samples: usize,
    pub guess_samples: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub id: String,
    pub event: TrainingEvent,
    pub created_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: TrainingEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event,
            created_at: Utc::now(),
        }
    }
}

type SubscriberId = String;

struct Subscriber {
    user_id: Option<String>,
    session_id: Option<String>,
    event_types: Option<Vec<String>>,
    sender: broadcast::Sender<EventEnvelope>,
}

impl Subscriber {
    fn matches(&self, envelope: &EventEnvelope) -> bool {
        if let Some(ref user_id) = self.user_id {
            if envelope.event.user_id() != Some(user_id.as_str()) {
                return false;
            }
        }

        if let Some(ref session_id) = self.session_id {
            if envelope.event.session_id() != Some(session_id.as_str()) {
                return false;
            }
        }

        if let Some(ref event_types) = self.event_types {
            if !event_types.iter().any(|t| t == envelope.event.event_type()) {
                return false;
            }
        }

        true
    }
}

/// Fan-out of engine events to the presentation side. Publishing never blocks;
/// lagging or absent receivers simply miss events.
pub struct EventBus {
    global_sender: broadcast::Sender<EventEnvelope>,
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    event_count: RwLock<u64>,
}

impl EventBus {
    pub fn new() -> Self {
        let (global_sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            global_sender,
            subscribers: RwLock::new(HashMap::new()),
            event_count: RwLock::new(0),
        }
    }

    pub async fn publish(&self, event: TrainingEvent) {
        let envelope = EventEnvelope::new(event);
        let event_type = envelope.event.event_type();

        {
            let mut count = self.event_count.write().await;
            *count += 1;
        }

        let subscribers = self.subscribers.read().await;
        let mut sent_count = 0usize;

        for subscriber in subscribers.values() {
            if subscriber.matches(&envelope) && subscriber.sender.send(envelope.clone()).is_ok() {
                sent_count += 1;
            }
        }

        if self.global_sender.send(envelope.clone()).is_err() {
            debug!("No global subscribers for event");
        }

        debug!(
            event_type = event_type,
            session_id = envelope.event.session_id().unwrap_or("-"),
            sent_to = sent_count,
            "Event published"
        );
    }

    pub fn subscribe_global(&self) -> broadcast::Receiver<EventEnvelope> {
        self.global_sender.subscribe()
    }

    pub async fn subscribe_filtered(
        &self,
        user_id: Option<String>,
        session_id: Option<String>,
        event_types: Option<Vec<String>>,
    ) -> (SubscriberId, broadcast::Receiver<EventEnvelope>) {
        let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
        let subscriber_id = uuid::Uuid::new_v4().to_string();

        let subscriber = Subscriber {
            user_id,
            session_id,
            event_types,
            sender,
        };

        {
            let mut subscribers = self.subscribers.write().await;
            subscribers.insert(subscriber_id.clone(), subscriber);
        }

        debug!(subscriber_id = %subscriber_id, "New filtered subscription created");

        (subscriber_id, receiver)
    }

    pub async fn unsubscribe(&self, subscriber_id: &str) {
        let mut subscribers = self.subscribers.write().await;
        if subscribers.remove(subscriber_id).is_some() {
            debug!(subscriber_id = %subscriber_id, "Subscription removed");
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        let subscribers = self.subscribers.read().await;
        subscribers.len() + self.global_sender.receiver_count()
    }

    pub async fn event_count(&self) -> u64 {
        *self.event_count.read().await
    }

    pub async fn stats(&self) -> EventBusStats {
        EventBusStats {
            total_events: self.event_count().await,
            subscriber_count: self.subscriber_count().await,
            global_subscribers: self.global_sender.receiver_count(),
            filtered_subscribers: self.subscribers.read().await.len(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBusStats {
    pub total_events: u64,
    pub subscriber_count: usize,
    pub global_subscribers: usize,
    pub filtered_subscribers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened(user: &str, session: &str) -> TrainingEvent {
        TrainingEvent::SessionOpened(SessionOpenedPayload {
            user_id: user.to_string(),
            session_id: session.to_string(),
            module_type: ModuleType::Physical,
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn global_subscriber_receives_every_event() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe_global();

        bus.publish(opened("user1", "session1")).await;

        let envelope = receiver.recv().await.unwrap();
        assert_eq!(envelope.event.event_type(), "SESSION_OPENED");
        assert_eq!(envelope.event.user_id(), Some("user1"));
        assert_eq!(bus.event_count().await, 1);
    }

    #[tokio::test]
    async fn filtered_subscription_skips_other_users() {
        let bus = EventBus::new();
        let (sub_id, mut receiver) = bus
            .subscribe_filtered(
                Some("user1".to_string()),
                None,
                Some(vec!["SESSION_OPENED".to_string()]),
            )
            .await;

        bus.publish(opened("user2", "s2")).await;
        bus.publish(opened("user1", "s1")).await;

        let envelope = receiver.recv().await.unwrap();
        assert_eq!(envelope.event.session_id(), Some("s1"));

        bus.unsubscribe(&sub_id).await;
        assert_eq!(bus.subscribers.read().await.len(), 0);
    }

    #[tokio::test]
    async fn user_filter_excludes_global_events() {
        let bus = EventBus::new();
        let (_, mut receiver) = bus
            .subscribe_filtered(Some("user1".to_string()), None, None)
            .await;

        bus.publish(TrainingEvent::ParametersRecalibrated(
            ParametersRecalibratedPayload {
                params: crate::training::params::LiveParams::default()
                    .snapshot()
                    .as_ref()
                    .clone(),
                reward_samples: 0,
                guess_samples: 0,
                timestamp: Utc::now(),
            },
        ))
        .await;

        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let json = serde_json::to_value(opened("u", "s")).unwrap();
        assert_eq!(json["type"], "SESSION_OPENED");
        assert_eq!(json["payload"]["module_type"], "physical");
    }
}
