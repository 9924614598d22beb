//! Telemetry setup failures.

use thiserror::Error;

/// Why logging or metrics could not be installed.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The log level directive does not parse.
    #[error("invalid log filter {filter:?}: {reason}")]
    Filter {
        /// The directive as given.
        filter: String,
        /// Parser message.
        reason: String,
    },

    /// Another global `tracing` subscriber owns the process.
    #[error("cannot install log subscriber: {0}")]
    Subscriber(String),

    /// The Prometheus recorder could not be built or installed.
    #[error("cannot install Prometheus recorder: {0}")]
    Recorder(String),
}

impl TelemetryError {
    pub(crate) fn filter(filter: &str, reason: impl ToString) -> Self {
        Self::Filter {
            filter: filter.to_string(),
            reason: reason.to_string(),
        }
    }
}
