//! The contract between the host and the services it hosts.
//!
//! The host calls every hook of every registration in registration order:
//! first [`register_rpc`](ServiceRegistration::register_rpc), then
//! [`register_gateway`](ServiceRegistration::register_gateway) once the RPC
//! listener is bound, then [`register_http`](ServiceRegistration::register_http).
//!
//! ```rust,ignore
//! struct Photos;
//!
//! #[async_trait]
//! impl ServiceRegistration for Photos {
//!     fn name(&self) -> &str {
//!         "photos"
//!     }
//!
//!     fn register_rpc(&self, server: &mut RpcRegistrar) -> Result<(), HostError> {
//!         let limits = server.limits();
//!         server.add_service(
//!             PhotosServer::new(PhotosImpl::default())
//!                 .max_decoding_message_size(limits.max_receive)
//!                 .max_encoding_message_size(limits.max_send),
//!         )?;
//!         Ok(())
//!     }
//!
//!     async fn register_gateway(
//!         &self,
//!         mux: &mut GatewayMux,
//!         endpoint: &GatewayEndpoint,
//!     ) -> Result<(), HostError> {
//!         let channel = endpoint.channel().map_err(|e| HostError::registration(self.name(), e))?;
//!         let client = PhotosClient::new(channel);
//!         mux.handle(Method::GET, "/v1/photos/{id}", move |req| { /* ... */ })?;
//!         Ok(())
//!     }
//! }
//! ```

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use tonic::body::BoxBody;
use tonic::server::NamedService;
use tonic::service::{Routes, RoutesBuilder};
use tonic::transport::{Channel, Endpoint};
use tower::Service;

use crate::error::HostError;
use crate::gateway::GatewayMux;
use crate::http_router::HttpRouter;

/// A service the host can serve on both transports.
#[async_trait]
pub trait ServiceRegistration: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Adds the service's gRPC handlers.
    fn register_rpc(&self, server: &mut RpcRegistrar) -> Result<(), HostError>;

    /// Adds the service's gateway routes. `endpoint` dials the RPC listener
    /// the handlers were just bound to.
    async fn register_gateway(
        &self,
        mux: &mut GatewayMux,
        endpoint: &GatewayEndpoint,
    ) -> Result<(), HostError>;

    /// Adds plain HTTP routes outside the gateway.
    fn register_http(&self, _router: &mut HttpRouter) -> Result<(), HostError> {
        Ok(())
    }

    /// Encoded `FileDescriptorSet` for server reflection, if the service
    /// provides one.
    fn file_descriptor_set(&self) -> Option<&'static [u8]> {
        None
    }
}

/// Message size limits from the host configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageLimits {
    /// Largest message the server sends, in bytes.
    pub max_send: usize,
    /// Largest message the server accepts, in bytes.
    pub max_receive: usize,
}

/// Collects gRPC services during registration.
///
/// The host enforces [`limits`](Self::limits) on every gRPC frame itself.
/// Registrations may also hand them to their generated server so tonic
/// rejects oversized messages before decoding.
pub struct RpcRegistrar {
    routes: RoutesBuilder,
    limits: MessageLimits,
    services: Vec<&'static str>,
}

impl RpcRegistrar {
    /// Creates an empty registrar.
    #[must_use]
    pub fn new(limits: MessageLimits) -> Self {
        Self {
            routes: RoutesBuilder::default(),
            limits,
            services: Vec::new(),
        }
    }

    /// The configured message limits.
    #[must_use]
    pub const fn limits(&self) -> MessageLimits {
        self.limits
    }

    /// Adds a gRPC service.
    ///
    /// # Errors
    ///
    /// Returns `HostError::DuplicateService` if a service with the same
    /// name was already added.
    pub fn add_service<S>(&mut self, svc: S) -> Result<&mut Self, HostError>
    where
        S: Service<http::Request<BoxBody>, Response = http::Response<BoxBody>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        if self.services.contains(&S::NAME) {
            return Err(HostError::DuplicateService {
                name: S::NAME.to_string(),
            });
        }
        self.routes.add_service(svc);
        self.services.push(S::NAME);
        Ok(self)
    }

    /// Names of the services added so far.
    #[must_use]
    pub fn services(&self) -> &[&'static str] {
        &self.services
    }

    pub(crate) fn into_parts(self) -> (Routes, Vec<&'static str>) {
        (self.routes.routes(), self.services)
    }
}

impl std::fmt::Debug for RpcRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcRegistrar")
            .field("limits", &self.limits)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

/// How gateway handlers reach the RPC listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpoint {
    addr: SocketAddr,
    limits: MessageLimits,
}

impl GatewayEndpoint {
    /// Creates an endpoint for a listener bound to `bound`.
    ///
    /// A wildcard bind address is dialed through loopback.
    ///
    /// ```rust
    /// use twinport_server::{GatewayEndpoint, MessageLimits};
    ///
    /// let limits = MessageLimits { max_send: 1024, max_receive: 1024 };
    /// let endpoint = GatewayEndpoint::new("0.0.0.0:9090".parse().unwrap(), limits);
    /// assert_eq!(endpoint.uri(), "http://127.0.0.1:9090");
    /// ```
    #[must_use]
    pub fn new(bound: SocketAddr, limits: MessageLimits) -> Self {
        let ip = match bound.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        Self {
            addr: SocketAddr::new(ip, bound.port()),
            limits,
        }
    }

    /// Address to dial.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://` URI of the RPC listener.
    #[must_use]
    pub fn uri(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// The configured message limits, for generated clients.
    #[must_use]
    pub const fn limits(&self) -> MessageLimits {
        self.limits
    }

    /// A channel to the RPC listener that connects on first use.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn channel(&self) -> Result<Channel, tonic::transport::Error> {
        Ok(Endpoint::from_shared(self.uri())?.connect_lazy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: MessageLimits = MessageLimits {
        max_send: 64,
        max_receive: 32,
    };

    #[test]
    fn test_endpoint_dials_loopback_for_wildcard() {
        let v4 = GatewayEndpoint::new("0.0.0.0:9090".parse().unwrap(), LIMITS);
        assert_eq!(v4.addr(), "127.0.0.1:9090".parse::<SocketAddr>().unwrap());

        let v6 = GatewayEndpoint::new("[::]:9090".parse().unwrap(), LIMITS);
        assert_eq!(v6.uri(), "http://[::1]:9090");

        let fixed = GatewayEndpoint::new("10.1.2.3:50051".parse().unwrap(), LIMITS);
        assert_eq!(fixed.uri(), "http://10.1.2.3:50051");
        assert_eq!(fixed.limits(), LIMITS);
    }

    #[tokio::test]
    async fn test_channel_is_lazy() {
        // Nothing listens here; a lazy channel must still be created.
        let endpoint = GatewayEndpoint::new("127.0.0.1:1".parse().unwrap(), LIMITS);
        assert!(endpoint.channel().is_ok());
    }

    #[test]
    fn test_registrar_rejects_duplicate_service() {
        let (_, health) = tonic_health::server::health_reporter();
        let mut registrar = RpcRegistrar::new(LIMITS);
        assert_eq!(registrar.limits(), LIMITS);

        registrar.add_service(health.clone()).unwrap();
        let err = registrar.add_service(health).unwrap_err();
        assert!(matches!(err, HostError::DuplicateService { ref name } if name == "grpc.health.v1.Health"));
        assert_eq!(registrar.services(), ["grpc.health.v1.Health"]);
    }
}
