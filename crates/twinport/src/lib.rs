//! # Twinport
//!
//! **A dual-transport service host with a structured error protocol**
//!
//! Twinport serves the same service implementations over gRPC and over a
//! JSON/HTTP gateway at once:
//!
//! - **Registration contract**: each service registers its gRPC server, its
//!   gateway routes and optional plain HTTP routes
//! - **First-failure supervision**: `start` returns the first transport
//!   outcome and stops the other transport
//! - **Bounded shutdown**: `stop` drains both transports, then forces them
//!   down after `shutdown_timeout`
//! - **Domain errors**: handlers fail with a [`DomainError`](core::DomainError)
//!   which maps to a gRPC status carrying JSON violation detail
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use twinport::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new()
//!         .with_optional_file(DEFAULT_CONFIG_PATH)?
//!         .with_env_prefix("TWINPORT")
//!         .load()?;
//!     init_telemetry(&config.telemetry.to_telemetry_config())?;
//!
//!     let host = Arc::new(
//!         TransportHost::new(config.server)
//!             .with_cancellation(ShutdownSignal::with_os_signals()),
//!     );
//!     let services: Vec<Arc<dyn ServiceRegistration>> = vec![Arc::new(Photos::new())];
//!     host.start("photos", &services).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Routes
//!
//! ```text
//! gRPC  :9090  ← RpcMetricsLayer → interceptors → registered services
//!                                                 + health, reflection
//! HTTP  :8080  /{doc}.spec.json   API description
//!              /docs/             Swagger UI
//!              /metrics           Prometheus
//!              /                  gateway → gRPC client → :9090
//! ```

#![doc(html_root_url = "https://docs.rs/twinport/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export error taxonomy, wire mapper and request context
pub use twinport_core as core;

// Re-export configuration types
pub use twinport_config as config;

// Re-export logging and metrics
pub use twinport_telemetry as telemetry;

// Re-export API documentation types
pub use twinport_docs as docs;

// Re-export the transport host
pub use twinport_server as server;

// Re-export the error constructor macro
pub use twinport_core::domain_err;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use twinport::prelude::*;
/// ```
pub mod prelude {
    pub use twinport_core::status::{decode_detail, status_from_error, to_status};
    pub use twinport_core::{
        is_not_found, kind_of, DefaultTranslator, DomainError, DomainResult, ErrorDetail,
        ErrorKind, FieldFailure, FieldViolation, MethodDescriptorMap, RequestContext, RequestId,
        Translator,
    };

    pub use twinport_config::{ConfigLoader, HostConfig, TwinportConfig, DEFAULT_CONFIG_PATH};

    pub use twinport_telemetry::{init_telemetry, TelemetryConfig};

    pub use twinport_server::{
        async_trait, interceptor_fn, GatewayEndpoint, GatewayMux, GatewayRequest, HostError,
        HttpRouter, JsonOptions, MethodFilter, RpcCall, RpcInterceptor, RpcRegistrar,
        ServiceRegistration, ShutdownSignal, TransportHost,
    };

    pub use twinport_core::domain_err;
}
