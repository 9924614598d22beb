//! Log subscriber setup.
//!
//! One `tracing-subscriber` registry with an [`EnvFilter`] in front of a JSON
//! or pretty formatter. The transports log under [`TARGET_GRPC`] and
//! [`TARGET_HTTP`] so a directive like `twinport::http=debug` can single one
//! out.
//!
//! ```rust,ignore
//! use twinport_telemetry::logging::{init_logging, LogConfig, TARGET_GRPC};
//!
//! init_logging(&LogConfig::default())?;
//! tracing::info!(target: TARGET_GRPC, addr = %addr, "gRPC server listening");
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Target of everything the RPC transport logs.
pub const TARGET_GRPC: &str = "twinport::grpc";

/// Target of everything the HTTP transport and gateway log.
pub const TARGET_HTTP: &str = "twinport::http";

/// How log lines are written.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line output for terminals.
    Pretty,
}

/// What [`init_logging`] installs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// When false nothing is installed.
    pub enabled: bool,
    /// Level directive, e.g. `info` or `twinport=debug,tonic=warn`.
    pub level: String,
    /// Line format.
    pub format: LogFormat,
    /// Color codes in pretty output.
    pub ansi: bool,
    /// Source file and line on every event.
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Json,
            ansi: false,
            include_location: false,
        }
    }
}

/// Installs the global log subscriber described by `config`.
///
/// Does nothing when logging is disabled.
///
/// # Errors
///
/// [`TelemetryError::Filter`] for a bad level directive,
/// [`TelemetryError::Subscriber`] when a subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level)?;
    let output = output_layer(config).with_filter(filter);

    tracing_subscriber::registry()
        .with(output)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))
}

fn output_layer(config: &LogConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let base = tracing_subscriber::fmt::layer()
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    match config.format {
        LogFormat::Json => base.json().boxed(),
        LogFormat::Pretty => base.pretty().with_ansi(config.ansi).boxed(),
    }
}

/// Parses a level directive such as `info` or `twinport=debug,tonic=warn`.
///
/// # Errors
///
/// [`TelemetryError::Filter`] when the directive does not parse.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter).map_err(|e| TelemetryError::filter(filter, e))
}
