//! Configuration schema types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use twinport_telemetry::{LogConfig, LogFormat, MetricsConfig, TelemetryConfig};

/// Default outbound and inbound RPC message cap: 4 MiB.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 4 * 1024 * 1024;

/// Transport host settings.
///
/// # Example
///
/// ```
/// use twinport_config::HostConfig;
///
/// let config = HostConfig::default();
/// assert_eq!(config.grpc_bind_addr(), "0.0.0.0:9090");
/// assert_eq!(config.http_bind_addr(), "0.0.0.0:8080");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Bind address shared by both transports.
    #[serde(default = "default_host")]
    pub host: String,

    /// RPC listener port.
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,

    /// HTTP and gateway listener port.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Largest RPC message the server sends, in bytes.
    #[serde(default = "default_max_message_length")]
    pub max_send_message_length: usize,

    /// Largest RPC message the server accepts, in bytes.
    #[serde(default = "default_max_message_length")]
    pub max_receive_message_length: usize,

    /// Seconds granted to in-flight work before shutdown is forced.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            grpc_port: default_grpc_port(),
            http_port: default_http_port(),
            max_send_message_length: default_max_message_length(),
            max_receive_message_length: default_max_message_length(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl HostConfig {
    /// `host:grpc_port`.
    #[must_use]
    pub fn grpc_bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.grpc_port)
    }

    /// `host:http_port`.
    #[must_use]
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }

    /// The shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    /// Checks the settings for consistency.
    ///
    /// Port `0` (ephemeral) is allowed for either transport.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an empty host, a zero message
    /// limit, or both transports on the same fixed port.
    pub fn validate(&self) -> Result<(), crate::ConfigError> {
        if self.host.trim().is_empty() {
            return Err(crate::ConfigError::invalid_value(
                "server.host",
                "must not be empty",
            ));
        }
        if self.grpc_port != 0 && self.grpc_port == self.http_port {
            return Err(crate::ConfigError::invalid_value(
                "server.http_port",
                format!("conflicts with server.grpc_port ({})", self.grpc_port),
            ));
        }
        if self.max_send_message_length == 0 {
            return Err(crate::ConfigError::invalid_value(
                "server.max_send_message_length",
                "must be greater than 0",
            ));
        }
        if self.max_receive_message_length == 0 {
            return Err(crate::ConfigError::invalid_value(
                "server.max_receive_message_length",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_grpc_port() -> u16 {
    9090
}

const fn default_http_port() -> u16 {
    8080
}

const fn default_max_message_length() -> usize {
    DEFAULT_MAX_MESSAGE_LENGTH
}

const fn default_shutdown_timeout() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}

/// Logging section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directive (trace, debug, info, warn, error, or per-target).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include ANSI color codes.
    #[serde(default)]
    pub ansi_enabled: bool,

    /// Include source file and line.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            ansi_enabled: false,
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    /// Enable metrics recording and the `/metrics` route.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Latency histogram buckets, in seconds.
    #[serde(default = "default_histogram_buckets")]
    pub histogram_buckets: Vec<f64>,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            histogram_buckets: default_histogram_buckets(),
        }
    }
}

fn default_histogram_buckets() -> Vec<f64> {
    MetricsConfig::default().duration_buckets
}

/// Telemetry section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TelemetrySection {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSection,

    /// Metrics settings.
    #[serde(default)]
    pub metrics: MetricsSection,
}

impl TelemetrySection {
    /// Converts the section into the telemetry crate's runtime config.
    #[must_use]
    pub fn to_telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            logging: LogConfig {
                enabled: self.logging.enabled,
                level: self.logging.level.clone(),
                format: self.logging.format,
                ansi: self.logging.ansi_enabled,
                include_location: self.logging.include_location,
            },
            metrics: MetricsConfig {
                enabled: self.metrics.enabled,
                duration_buckets: self.metrics.histogram_buckets.clone(),
            },
        }
    }
}
