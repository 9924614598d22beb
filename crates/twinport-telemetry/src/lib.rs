//! Logging and metrics for Twinport hosts.
//!
//! Logs go through `tracing` with a JSON or pretty `tracing-subscriber`
//! layer. Metrics are recorded with the `metrics` crate into a Prometheus
//! recorder that has no listener of its own; the host renders it on
//! `/metrics`.
//!
//! ```rust,ignore
//! use twinport_telemetry::{init_telemetry, TelemetryConfig};
//!
//! init_telemetry(&TelemetryConfig::default())?;
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{init_metrics, render_metrics, MetricsConfig};

/// Result of installing a telemetry component.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Logging and metrics settings, installed together by [`init_telemetry`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryConfig {
    /// Log subscriber.
    pub logging: LogConfig,
    /// Prometheus recorder.
    pub metrics: MetricsConfig,
}

/// Installs the log subscriber, then the metrics recorder.
///
/// # Errors
///
/// The first [`TelemetryError`] either step returns.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)
}
