use std::path::PathBuf;
use std::time::Duration;

use crate::training::config::TrainingConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Directory for rolling log files; `None` logs to the console only.
    pub log_dir: Option<PathBuf>,
    /// sqlite URL; `None` keeps records in memory.
    pub database_url: Option<String>,
    pub session_channel_capacity: usize,
    pub session_idle_timeout: Duration,
    pub ingest_timeout: Duration,
    pub recalibration_schedule: String,
    pub reaper_schedule: String,
    pub enable_recalibration_worker: bool,
    pub enable_session_reaper: bool,
    pub training: TrainingConfig,
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v != "false" && v != "0")
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            database_url: None,
            session_channel_capacity: 64,
            session_idle_timeout: Duration::from_secs(15 * 60),
            ingest_timeout: Duration::from_millis(5_000),
            recalibration_schedule: "0 */15 * * * *".to_string(),
            reaper_schedule: "0 * * * * *".to_string(),
            enable_recalibration_worker: true,
            enable_session_reaper: true,
            training: TrainingConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let log_level = std::env::var("RUST_LOG").unwrap_or(defaults.log_level);
        let log_dir = env_flag("ENABLE_FILE_LOGS", false).then(|| {
            std::env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./logs"))
        });

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let session_channel_capacity = env_parse::<usize>("SESSION_CHANNEL_CAPACITY")
            .filter(|v| *v > 0)
            .unwrap_or(defaults.session_channel_capacity);

        let session_idle_timeout = env_parse::<u64>("SESSION_IDLE_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.session_idle_timeout);

        let ingest_timeout = env_parse::<u64>("INGEST_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.ingest_timeout);

        let recalibration_schedule =
            std::env::var("RECALIBRATION_SCHEDULE").unwrap_or(defaults.recalibration_schedule);
        let reaper_schedule = std::env::var("REAPER_SCHEDULE").unwrap_or(defaults.reaper_schedule);

        Self {
            log_level,
            log_dir,
            database_url,
            session_channel_capacity,
            session_idle_timeout,
            ingest_timeout,
            recalibration_schedule,
            reaper_schedule,
            enable_recalibration_worker: env_flag(
                "ENABLE_RECALIBRATION_WORKER",
                defaults.enable_recalibration_worker,
            ),
            enable_session_reaper: env_flag("ENABLE_SESSION_REAPER", defaults.enable_session_reaper),
            training: TrainingConfig::from_env(),
        }
    }
}
