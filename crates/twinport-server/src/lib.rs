//! # Twinport Server
//!
//! Hosts service implementations on two transports at once:
//!
//! - a gRPC server (tonic services over hyper HTTP/2) with an interceptor
//!   chain, message size limits, metrics, health checking and server
//!   reflection
//! - an HTTP server (hyper) carrying the JSON gateway, the API description
//!   file, a Swagger UI and the Prometheus scrape route
//!
//! Services plug in through [`ServiceRegistration`]. [`TransportHost::start`]
//! runs both transports until the first one stops and returns that outcome;
//! [`TransportHost::stop`] drains both and forces them down after the
//! configured timeout.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `/{doc}.spec.json` | API description file |
//! | `/docs/` | Swagger UI |
//! | `/metrics` | Prometheus metrics |
//! | `/` | gateway |

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
pub mod gateway;
mod host;
pub mod http_router;
pub mod interceptor;
pub mod message_limit;
pub mod metrics_layer;
pub mod registration;
pub mod response;
pub mod shutdown;

pub use error::{HostError, Transport};
pub use gateway::{GatewayMux, GatewayRequest, JsonOptions};
pub use host::{TransportHost, METRICS_PATH};
pub use http_router::HttpRouter;
pub use interceptor::{interceptor_fn, InterceptorLayer, MethodFilter, RpcCall, RpcInterceptor};
pub use message_limit::MessageLimitLayer;
pub use metrics_layer::RpcMetricsLayer;
pub use registration::{GatewayEndpoint, MessageLimits, RpcRegistrar, ServiceRegistration};
pub use shutdown::ShutdownSignal;

/// Re-exported so registrations can use `#[async_trait]` without a direct
/// dependency.
pub use async_trait::async_trait;
