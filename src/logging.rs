use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "training.log";

/// Where console logs are written. The command driver owns stdout, so it logs to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOutput {
    #[default]
    Stderr,
    Stdout,
}

impl LogOutput {
    fn make_writer(self) -> BoxMakeWriter {
        match self {
            LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
            LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        }
    }
}

pub struct FileLogGuard {
    _guard: WorkerGuard,
}

fn level_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. With `file_dir` set, a daily rolling file layer is added;
/// keep the returned guard alive so buffered lines reach the file.
pub fn init_tracing(
    log_level: &str,
    output: LogOutput,
    file_dir: Option<&Path>,
) -> Option<FileLogGuard> {
    let console_layer = fmt::layer()
        .with_writer(output.make_writer())
        .with_target(true);

    let mut guard = None;
    let file_layer = file_dir.and_then(|dir| match std::fs::create_dir_all(dir) {
        Ok(()) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
            let (writer, worker_guard) = tracing_appender::non_blocking(appender);
            guard = Some(FileLogGuard {
                _guard: worker_guard,
            });
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true),
            )
        }
        Err(err) => {
            eprintln!("failed to create log directory {}: {err}", dir.display());
            None
        }
    });

    tracing_subscriber::registry()
        .with(level_filter(log_level))
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_level_falls_back_to_info() {
        assert_eq!(level_filter("engine=loud").to_string(), "info");
        assert_eq!(level_filter("debug").to_string(), "debug");
    }

    #[test]
    fn console_defaults_to_stderr() {
        assert_eq!(LogOutput::default(), LogOutput::Stderr);
    }
}
