use std::sync::Arc;

use tokio::io::BufReader;

use adaptive_training_engine::config::Config;
use adaptive_training_engine::db::{MemoryRecordStore, RecordStore, SqliteRecordStore};
use adaptive_training_engine::driver;
use adaptive_training_engine::logging::{self, LogOutput};
use adaptive_training_engine::training::{EngineOptions, OrchestratorConfig, TrainingEngine};
use adaptive_training_engine::workers::{WorkerConfig, WorkerManager};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard =
        logging::init_tracing(&config.log_level, LogOutput::Stderr, config.log_dir.as_deref());

    let store: Arc<dyn RecordStore> = match config.database_url.as_deref() {
        Some(url) => match SqliteRecordStore::connect(url).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::error!(error = %e, "record store unavailable");
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("DATABASE_URL not set, records kept in memory only");
            Arc::new(MemoryRecordStore::new())
        }
    };

    let options = EngineOptions {
        orchestrator: OrchestratorConfig {
            channel_capacity: config.session_channel_capacity,
            ingest_timeout: config.ingest_timeout,
            ..OrchestratorConfig::default()
        },
        ..EngineOptions::default()
    };

    let engine = match TrainingEngine::restore(config.training.clone(), options, store).await {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            tracing::error!(kind = e.kind(), error = %e, "refusing to serve");
            std::process::exit(2);
        }
    };

    let worker_manager = match WorkerManager::new(Arc::clone(&engine), WorkerConfig::from(&config)).await {
        Ok(manager) => {
            if let Err(e) = manager.start().await {
                tracing::error!(error = %e, "failed to start workers");
            }
            Some(manager)
        }
        Err(e) => {
            tracing::warn!(error = %e, "worker manager not initialized");
            None
        }
    };

    tracing::info!("training engine ready, reading commands from stdin");

    let reader = BufReader::new(tokio::io::stdin());
    let writer = tokio::io::stdout();
    tokio::select! {
        result = driver::serve(&engine, reader, writer) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "command stream error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    if let Some(ref manager) = worker_manager {
        manager.stop().await;
    }
    engine.shutdown().await;

    tracing::info!("Graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
