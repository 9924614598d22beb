//! Root configuration type.

use serde::{Deserialize, Serialize};

use crate::{HostConfig, TelemetrySection};

/// Complete Twinport configuration.
///
/// # Example
///
/// ```
/// use twinport_config::TwinportConfig;
///
/// let config = TwinportConfig::default();
/// assert_eq!(config.server.grpc_port, 9090);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct TwinportConfig {
    /// Transport host settings.
    #[serde(default)]
    pub server: HostConfig,

    /// Logging and metrics settings.
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

impl TwinportConfig {
    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first invalid value found.
    pub fn validate(&self) -> Result<(), crate::ConfigError> {
        self.server.validate()?;

        if self
            .telemetry
            .metrics
            .histogram_buckets
            .windows(2)
            .any(|w| w[0] >= w[1])
        {
            return Err(crate::ConfigError::invalid_value(
                "telemetry.metrics.histogram_buckets",
                "must be strictly increasing",
            ));
        }

        if self.telemetry.logging.level.trim().is_empty() {
            return Err(crate::ConfigError::invalid_value(
                "telemetry.logging.level",
                "must not be empty",
            ));
        }

        Ok(())
    }

    /// Development preset: pretty debug logs.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = twinport_telemetry::LogFormat::Pretty;
        config.telemetry.logging.ansi_enabled = true;
        config.telemetry.logging.include_location = true;
        config.server.shutdown_timeout = 1;
        config
    }
}
