//! Typed configuration for Twinport hosts.
//!
//! - TOML, JSON and YAML files
//! - Environment variable overrides (`PREFIX__SECTION__KEY`)
//! - Strict parsing (unknown fields are rejected)
//! - Layered loading (defaults → file → env)
//!
//! # Example
//!
//! ```no_run
//! use twinport_config::{ConfigLoader, DEFAULT_CONFIG_PATH};
//!
//! # fn main() -> Result<(), twinport_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_dotenv()?
//!     .with_optional_file(DEFAULT_CONFIG_PATH)?
//!     .with_env_prefix("TWINPORT")
//!     .load()?;
//!
//! println!("gRPC on {}", config.server.grpc_bind_addr());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   grpc_port: 9090
//!   http_port: 8080
//!   max_send_message_length: 4194304
//!   max_receive_message_length: 4194304
//!   shutdown_timeout: 30
//!
//! telemetry:
//!   logging:
//!     level: info
//!     format: json
//!   metrics:
//!     enabled: true
//! ```

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::TwinportConfig;
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_CONFIG_PATH};
pub use schema::{
    HostConfig, LoggingSection, MetricsSection, TelemetrySection, DEFAULT_MAX_MESSAGE_LENGTH,
};
