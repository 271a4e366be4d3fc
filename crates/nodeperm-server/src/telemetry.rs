//! Logging initialisation and metric descriptions.
//!
//! The engine logs through `tracing`; this module installs the global
//! subscriber. `RUST_LOG` wins over the configured level when set.
//! Metric values go to whatever `metrics` recorder the embedder installs.
//!
//! ```ignore
//! use nodeperm_server::telemetry::{init_logging, LoggingConfig};
//!
//! init_logging(LoggingConfig::from(&config.logging));
//! ```

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use crate::config::LoggingSettings;

/// Subscriber options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub json: bool,
    /// Used when `RUST_LOG` is unset or unparsable.
    pub level: Level,
    /// Emit span enter/exit events, e.g. for `#[instrument]`ed service calls.
    pub span_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: Level::INFO,
            span_events: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_span_events(mut self) -> Self {
        self.span_events = true;
        self
    }
}

impl From<&LoggingSettings> for LoggingConfig {
    /// Unknown levels fall back to INFO; `EngineConfig::validate` rejects them earlier.
    fn from(settings: &LoggingSettings) -> Self {
        Self {
            json: settings.json,
            level: Level::from_str(&settings.level).unwrap_or(Level::INFO),
            span_events: false,
        }
    }
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_logging(config: LoggingConfig) {
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let filter = env_filter(config.level);

    let installed = if config.json {
        tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .json()
                    .with_span_events(span_events)
                    .with_current_span(true)
                    .with_target(true),
            ),
        )
    } else {
        tracing::subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_span_events(span_events).with_target(true)),
        )
    };

    if installed.is_err() {
        tracing::debug!("global subscriber already installed");
    }
}

/// Describes the service and cached-data metrics to the installed recorder.
pub fn register_metrics() {
    metrics::describe_counter!(
        "nodeperm_check_requests_total",
        "Total number of permission checks answered by the service"
    );
    nodeperm_domain::cache::register_cached_data_metrics();
}

/// A JSON subscriber writing to `writer`, for capturing log output.
pub fn json_subscriber<W>(writer: W, level: Level) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'writer> fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(EnvFilter::new(level.to_string()))
        .with(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_current_span(true),
        )
}
