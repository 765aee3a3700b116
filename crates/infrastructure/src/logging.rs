//! Structured logging setup and the `tracing` log-sink adapter.
//!
//! The classifier core never touches process-wide logging state; it
//! emits through an injected `LogSink`. This module owns the other side:
//! installing the process subscriber and bridging the sink port onto it.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use ports::secondary::log_sink::{LogLevel, LogSink};

use crate::config::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Flattened JSON lines for log aggregators.
    Json,
    /// Compact single-line output for development.
    Text,
}

/// Install the process-wide subscriber writing to stdout.
///
/// `RUST_LOG` overrides `level` when set. Installing a second subscriber
/// fails, and the error is surfaced instead of silently keeping the
/// first one.
pub fn init_logging(level: LogLevel, format: LogFormat) -> Result<(), ConfigError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let base = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => base
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_target(true)
                    .with_ansi(false),
            )
            .try_init(),
        LogFormat::Text => base.with(fmt::layer().compact().with_target(true)).try_init(),
    };

    installed.map_err(|e| ConfigError::Validation {
        field: "logging".to_string(),
        message: e.to_string(),
    })
}

/// Log sink forwarding classifier output into the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => tracing::error!(target: "classifier", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "classifier", "{message}"),
            LogLevel::Info => tracing::info!(target: "classifier", "{message}"),
            LogLevel::Debug => tracing::debug!(target: "classifier", "{message}"),
            LogLevel::Trace => tracing::trace!(target: "classifier", "{message}"),
        }
    }
}
