//! Structured logging infrastructure for the keyserver.
//!
//! This module provides centralized logging initialization with support
//! for structured JSON output, an optional log file, and environment-based
//! configuration.

use crate::config::{LogConfig, LogFormat};
use crate::error::LoggingError;
use std::fs::OpenOptions;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system from the `log` section of the config.
///
/// Log level can be configured via the `RUST_LOG` environment variable,
/// which takes precedence over `LogConfig::level`. Lines always go to
/// stderr; if `LogConfig::file` is set they are also appended to that
/// file. The returned guard flushes the file writer when dropped and must
/// be held for as long as the process logs.
///
/// # Example
/// ```no_run
/// use keyserver_core::{config::LogConfig, logging};
///
/// let _guard = logging::init(&LogConfig::default()).unwrap();
/// tracing::info!(service = "keyserver", "Service started");
/// ```
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = build_filter(&config.level)?;

    let (file_writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let installed = match config.format {
        LogFormat::Text => {
            let file_layer = file_writer.map(|writer| {
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(writer)
            });
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_writer(std::io::stderr),
                )
                .with(file_layer)
                .try_init()
        }
        LogFormat::Json => {
            let file_layer = file_writer
                .map(|writer| fmt::layer().json().with_target(true).with_writer(writer));
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_writer(std::io::stderr),
                )
                .with(file_layer)
                .try_init()
        }
    };

    installed.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
    Ok(guard)
}

/// `RUST_LOG` if set, otherwise the configured directive.
fn build_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| LoggingError::Filter {
        directive: level.to_string(),
        reason: e.to_string(),
    })
}
