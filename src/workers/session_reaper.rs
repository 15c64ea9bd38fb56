use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::training::TrainingEngine;

pub async fn reap_idle_sessions(
    engine: Arc<TrainingEngine>,
    idle_timeout: Duration,
) -> Result<usize, super::WorkerError> {
    let start = Instant::now();
    debug!("Starting idle session sweep");

    let closed = engine.orchestrator().reap_idle(idle_timeout).await;

    info!(
        closed_sessions = closed.len(),
        active_sessions = engine.orchestrator().active_count(),
        duration_secs = format!("{:.2}", start.elapsed().as_secs_f64()),
        "Idle session sweep completed"
    );

    Ok(closed.len())
}
