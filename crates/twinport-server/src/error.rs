//! Host errors.

use thiserror::Error;
use twinport_core::BoxError;
use twinport_docs::DocsError;

/// Which of the two transports an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// The gRPC server.
    Rpc,
    /// The HTTP server carrying the gateway, docs and metrics routes.
    Http,
}

impl Transport {
    /// Short name used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rpc => "rpc",
            Self::Http => "http",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`TransportHost`](crate::TransportHost) and the
/// registration contract.
#[derive(Debug, Error)]
pub enum HostError {
    /// A listener could not be bound.
    #[error("failed to bind {transport} listener on {addr}: {source}")]
    Bind {
        /// Transport whose listener failed.
        transport: Transport,
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Start was cancelled before the transports began serving.
    #[error("start cancelled during registration")]
    Cancelled,

    /// `start` was called on a host that already started.
    #[error("host already started")]
    AlreadyStarted,

    /// A service failed to register.
    #[error("failed to register service {service}: {source}")]
    Registration {
        /// Service name as reported by the registration.
        service: String,
        /// Cause.
        #[source]
        source: BoxError,
    },

    /// Two services registered the same gRPC service name.
    #[error("gRPC service {name} registered twice")]
    DuplicateService {
        /// Fully qualified service name.
        name: String,
    },

    /// Two handlers registered the same route.
    #[error("route {method} {pattern} registered twice")]
    DuplicateRoute {
        /// HTTP method, or `*` for plain routes.
        method: String,
        /// Route pattern.
        pattern: String,
    },

    /// A route pattern is malformed.
    #[error("invalid route pattern {pattern:?}: {message}")]
    InvalidRoute {
        /// Route pattern.
        pattern: String,
        /// What is wrong with it.
        message: String,
    },

    /// The reflection service could not be built.
    #[error("failed to build reflection service: {0}")]
    Reflection(String),

    /// The documentation routes could not be set up.
    #[error(transparent)]
    Docs(#[from] DocsError),

    /// A transport stopped with an error while serving.
    #[error("{transport} transport failed: {source}")]
    Serve {
        /// Transport that failed.
        transport: Transport,
        /// Cause.
        #[source]
        source: BoxError,
    },

    /// A serve task panicked.
    #[error("serve task failed: {0}")]
    Join(#[source] tokio::task::JoinError),
}

impl HostError {
    /// Creates a bind error.
    pub fn bind(transport: Transport, addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            transport,
            addr: addr.into(),
            source,
        }
    }

    /// Creates a registration error for `service`.
    pub fn registration(service: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Registration {
            service: service.into(),
            source: source.into(),
        }
    }

    /// Creates a serve error.
    pub fn serve(transport: Transport, source: impl Into<BoxError>) -> Self {
        Self::Serve {
            transport,
            source: source.into(),
        }
    }

    /// Creates an invalid route error.
    pub fn invalid_route(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRoute {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for bind failures.
    #[must_use]
    pub const fn is_bind(&self) -> bool {
        matches!(self, Self::Bind { .. })
    }

    /// Returns `true` if start was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
