mod event_bus;

pub use event_bus::{
    ActionSelectedPayload, EventBus, EventBusStats, EventEnvelope, FeedbackIssuedPayload,
    ParametersRecalibratedPayload, SessionClosedPayload, SessionOpenedPayload, TrainingEvent,
};
