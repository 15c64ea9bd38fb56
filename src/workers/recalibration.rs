use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::training::TrainingEngine;

pub async fn run_recalibration_cycle(engine: Arc<TrainingEngine>) -> Result<(), super::WorkerError> {
    let start = Instant::now();
    debug!("Starting recalibration cycle");

    let outcome = engine.adapter().run_cycle().await?;

    info!(
        committed = outcome.committed,
        version = outcome.params.version,
        reward_samples = outcome.summary.reward_samples,
        guess_samples = outcome.summary.guess_samples,
        duration_ms = start.elapsed().as_millis() as u64,
        "Recalibration cycle completed"
    );

    Ok(())
}
