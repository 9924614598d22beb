//! Interceptor chain for the RPC transport.
//!
//! Interceptors run in the order they were supplied, before the call reaches
//! the service. Each sees the request headers and a mutable
//! [`RequestContext`]; the first one to return `Err` ends the call with that
//! status as a trailers-only response. The context of an accepted call is
//! placed in the request extensions, where handlers read it back with
//! [`RequestContext::from_request`].
//!
//! ```rust
//! use std::sync::Arc;
//! use twinport_core::status::unauthenticated;
//! use twinport_server::interceptor::{interceptor_fn, RpcInterceptor};
//!
//! let require_token = interceptor_fn(|call| {
//!     match call.header("authorization") {
//!         Some(token) => {
//!             let subject = token.trim_start_matches("Bearer ").to_string();
//!             call.context_mut().set_subject(subject);
//!             Ok(())
//!         }
//!         None => Err(unauthenticated("missing bearer token")),
//!     }
//! });
//! let chain: Vec<Arc<dyn RpcInterceptor>> = vec![require_token];
//! assert_eq!(chain.len(), 1);
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::{HeaderMap, HeaderValue};
use pin_project_lite::pin_project;
use tonic::body::{empty_body, BoxBody};
use tonic::Status;
use tower::{Layer, Service};
use twinport_core::{MethodDescriptorMap, MethodError, RequestContext, RequestId, REQUEST_ID_HEADER};
use twinport_telemetry::logging::TARGET_GRPC;

/// A cross-cutting check run before every RPC.
pub trait RpcInterceptor: Send + Sync + 'static {
    /// Inspects the call. `Err` rejects it with the returned status.
    fn intercept(&self, call: &mut RpcCall<'_>) -> Result<(), Status>;
}

impl<F> RpcInterceptor for F
where
    F: Fn(&mut RpcCall<'_>) -> Result<(), Status> + Send + Sync + 'static,
{
    fn intercept(&self, call: &mut RpcCall<'_>) -> Result<(), Status> {
        self(call)
    }
}

/// Wraps a closure as a shareable interceptor.
///
/// Pins the closure's argument type so it does not need an annotation.
pub fn interceptor_fn<F>(f: F) -> Arc<dyn RpcInterceptor>
where
    F: Fn(&mut RpcCall<'_>) -> Result<(), Status> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The call an interceptor is looking at.
pub struct RpcCall<'a> {
    headers: &'a HeaderMap,
    context: &'a mut RequestContext,
}

impl<'a> RpcCall<'a> {
    /// Creates a call view over request headers and a context.
    pub fn new(headers: &'a HeaderMap, context: &'a mut RequestContext) -> Self {
        Self { headers, context }
    }

    /// Full method path, e.g. `/photos.v1.Photos/GetPhoto`.
    pub fn full_method(&self) -> &str {
        self.context.full_method()
    }

    /// Short method name, e.g. `GetPhoto`.
    pub fn method(&self) -> &str {
        self.context.method()
    }

    /// Request headers (gRPC metadata).
    pub fn headers(&self) -> &HeaderMap {
        self.headers
    }

    /// A header value, if present and valid ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The request context.
    pub fn context(&self) -> &RequestContext {
        self.context
    }

    /// The request context, mutably.
    pub fn context_mut(&mut self) -> &mut RequestContext {
        self.context
    }
}

type Chain = Arc<Vec<Arc<dyn RpcInterceptor>>>;

/// Tower layer running an interceptor chain.
#[derive(Clone, Default)]
pub struct InterceptorLayer {
    chain: Chain,
}

impl InterceptorLayer {
    /// Creates a layer running `interceptors` in order.
    pub fn new(interceptors: impl IntoIterator<Item = Arc<dyn RpcInterceptor>>) -> Self {
        Self {
            chain: Arc::new(interceptors.into_iter().collect()),
        }
    }

    /// Number of interceptors in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Returns `true` if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

impl<S> Layer<S> for InterceptorLayer {
    type Service = InterceptorService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InterceptorService {
            inner,
            chain: Arc::clone(&self.chain),
        }
    }
}

/// Service produced by [`InterceptorLayer`].
#[derive(Clone)]
pub struct InterceptorService<S> {
    inner: S,
    chain: Chain,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for InterceptorService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<BoxBody>>,
{
    type Response = http::Response<BoxBody>;
    type Error = S::Error;
    type Future = InterceptorFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<ReqBody>) -> Self::Future {
        let mut context = RequestContext::for_method(req.uri().path());
        if let Some(id) = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(RequestId::parse)
        {
            context = context.with_request_id(id);
        }

        for interceptor in self.chain.iter() {
            let mut call = RpcCall::new(req.headers(), &mut context);
            if let Err(status) = interceptor.intercept(&mut call) {
                tracing::debug!(
                    target: TARGET_GRPC,
                    request_id = %context.request_id(),
                    rpc_method = %context.full_method(),
                    grpc_code = ?status.code(),
                    "call rejected by interceptor"
                );
                return InterceptorFuture::Rejected {
                    response: Some(rejection(&status)),
                };
            }
        }

        req.extensions_mut().insert(context);
        InterceptorFuture::Inner {
            future: self.inner.call(req),
        }
    }
}

pin_project! {
    /// Future returned by [`InterceptorService`].
    #[project = InterceptorFutureProj]
    pub enum InterceptorFuture<F> {
        /// The call was accepted and is running.
        Inner {
            // The inner service's future.
            #[pin]
            future: F,
        },
        /// The call was rejected by an interceptor.
        Rejected {
            // Trailers-only rejection, taken on first poll.
            response: Option<http::Response<BoxBody>>,
        },
    }
}

impl<F, E> Future for InterceptorFuture<F>
where
    F: Future<Output = Result<http::Response<BoxBody>, E>>,
{
    type Output = Result<http::Response<BoxBody>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            InterceptorFutureProj::Inner { future } => future.poll(cx),
            InterceptorFutureProj::Rejected { response } => Poll::Ready(Ok(response
                .take()
                .unwrap_or_else(|| rejection(&Status::internal("rejection polled twice"))))),
        }
    }
}

/// Builds a trailers-only gRPC response carrying `status`.
pub(crate) fn rejection(status: &Status) -> http::Response<BoxBody> {
    let mut response = http::Response::new(empty_body());
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/grpc"),
    );
    if let Err(e) = status.add_header(headers) {
        tracing::warn!(target: TARGET_GRPC, error = %e, "failed to encode rejection status");
        headers.insert("grpc-status", HeaderValue::from_static("13"));
    }
    response
}

/// An interceptor applying a per-method policy looked up by short name.
///
/// ```rust
/// use twinport_core::{MethodDescriptorMap, status::too_many_requests};
/// use twinport_server::interceptor::MethodFilter;
///
/// struct Limit { per_second: u32 }
///
/// let methods = MethodDescriptorMap::new([
///     ("GetPhoto", Limit { per_second: 100 }),
///     ("UploadPhoto", Limit { per_second: 0 }),
/// ]).unwrap();
///
/// let filter = MethodFilter::new(methods, |limit: &Limit, _call| {
///     if limit.per_second == 0 {
///         return Err(too_many_requests("uploads are paused"));
///     }
///     Ok(())
/// });
/// ```
pub struct MethodFilter<D, F> {
    methods: MethodDescriptorMap<D>,
    policy: F,
    reject_unknown: bool,
}

impl<D, F> MethodFilter<D, F>
where
    F: Fn(&D, &mut RpcCall<'_>) -> Result<(), Status>,
{
    /// Creates a filter that runs `policy` for methods found in `methods`
    /// and lets every other method through.
    pub fn new(methods: MethodDescriptorMap<D>, policy: F) -> Self {
        Self {
            methods,
            policy,
            reject_unknown: false,
        }
    }

    /// Rejects methods missing from the table with `Unimplemented`.
    #[must_use]
    pub fn reject_unknown(mut self) -> Self {
        self.reject_unknown = true;
        self
    }
}

impl<D, F> RpcInterceptor for MethodFilter<D, F>
where
    D: Send + Sync + 'static,
    F: Fn(&D, &mut RpcCall<'_>) -> Result<(), Status> + Send + Sync + 'static,
{
    fn intercept(&self, call: &mut RpcCall<'_>) -> Result<(), Status> {
        match self.methods.resolve(call.full_method()) {
            Ok(descriptor) => (self.policy)(descriptor, call),
            Err(e @ MethodError::DescriptorNotFound { .. }) if self.reject_unknown => {
                Err(Status::unimplemented(e.to_string()))
            }
            Err(_) => Ok(()),
        }
    }
}
