mod recalibration;
mod session_reaper;

pub use recalibration::run_recalibration_cycle;
pub use session_reaper::reap_idle_sessions;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::EngineError;
use crate::training::TrainingEngine;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub enable_recalibration: bool,
    pub recalibration_schedule: String,
    pub enable_session_reaper: bool,
    pub reaper_schedule: String,
    pub idle_timeout: Duration,
}

impl From<&Config> for WorkerConfig {
    fn from(config: &Config) -> Self {
        Self {
            enable_recalibration: config.enable_recalibration_worker,
            recalibration_schedule: config.recalibration_schedule.clone(),
            enable_session_reaper: config.enable_session_reaper,
            reaper_schedule: config.reaper_schedule.clone(),
            idle_timeout: config.session_idle_timeout,
        }
    }
}

pub struct WorkerManager {
    scheduler: Mutex<JobScheduler>,
    shutdown_tx: broadcast::Sender<()>,
    engine: Arc<TrainingEngine>,
    config: WorkerConfig,
}

impl WorkerManager {
    pub async fn new(engine: Arc<TrainingEngine>, config: WorkerConfig) -> Result<Self, WorkerError> {
        let scheduler = JobScheduler::new().await.map_err(WorkerError::Scheduler)?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            shutdown_tx,
            engine,
            config,
        })
    }

    pub async fn start(&self) -> Result<(), WorkerError> {
        let scheduler = self.scheduler.lock().await;

        if self.config.enable_recalibration {
            let schedule = self.config.recalibration_schedule.clone();
            let engine = Arc::clone(&self.engine);
            let shutdown_rx = self.shutdown_tx.subscribe();
            let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
                let engine = Arc::clone(&engine);
                let mut rx = shutdown_rx.resubscribe();
                Box::pin(async move {
                    tokio::select! {
                        _ = rx.recv() => {},
                        result = run_recalibration_cycle(engine) => {
                            if let Err(e) = result {
                                error!(error = %e, "Recalibration worker error");
                            }
                        }
                    }
                })
            })
            .map_err(WorkerError::Scheduler)?;
            scheduler.add(job).await.map_err(WorkerError::Scheduler)?;
            info!(schedule = %schedule, "Recalibration worker scheduled");
        }

        if self.config.enable_session_reaper {
            let schedule = self.config.reaper_schedule.clone();
            let idle_timeout = self.config.idle_timeout;
            let engine = Arc::clone(&self.engine);
            let shutdown_rx = self.shutdown_tx.subscribe();
            let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
                let engine = Arc::clone(&engine);
                let mut rx = shutdown_rx.resubscribe();
                Box::pin(async move {
                    tokio::select! {
                        _ = rx.recv() => {},
                        result = reap_idle_sessions(engine, idle_timeout) => {
                            if let Err(e) = result {
                                error!(error = %e, "Session reaper error");
                            }
                        }
                    }
                })
            })
            .map_err(WorkerError::Scheduler)?;
            scheduler.add(job).await.map_err(WorkerError::Scheduler)?;
            info!(
                schedule = %schedule,
                idle_timeout_secs = idle_timeout.as_secs(),
                "Session reaper scheduled"
            );
        }

        scheduler.start().await.map_err(WorkerError::Scheduler)?;
        info!("All workers started");

        Ok(())
    }

    pub async fn stop(&self) {
        info!("Stopping workers...");
        let _ = self.shutdown_tx.send(());

        let mut scheduler = self.scheduler.lock().await;
        if let Err(e) = scheduler.shutdown().await {
            warn!(error = %e, "Error shutting down scheduler");
        }

        info!("Workers stopped");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}
