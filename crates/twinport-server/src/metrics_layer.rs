//! RPC metrics layer.
//!
//! Outermost layer of the RPC transport: every call, including those an
//! interceptor rejects, is counted and timed. The status code is read from
//! the `grpc-status` response header, which is where tonic puts it for unary
//! failures; a response without it counts as `OK`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use http::{Request, Response};
use pin_project_lite::pin_project;
use tonic::Code;
use tower::{Layer, Service};
use twinport_core::method::{service_name, short_name};
use twinport_telemetry::logging::TARGET_GRPC;
use twinport_telemetry::metrics::{record_rpc_handled, record_rpc_started, InFlightGuard};

/// Tower layer recording RPC metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcMetricsLayer;

impl RpcMetricsLayer {
    /// Creates the layer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RpcMetricsLayer {
    type Service = RpcMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RpcMetricsService { inner }
    }
}

/// Service produced by [`RpcMetricsLayer`].
#[derive(Debug, Clone)]
pub struct RpcMetricsService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RpcMetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = RpcMetricsFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let path = req.uri().path();
        let service = match service_name(path) {
            "" => "unknown".to_string(),
            name => name.to_string(),
        };
        let method = short_name(path).to_string();
        record_rpc_started(&service, &method);

        RpcMetricsFuture {
            inner: self.inner.call(req),
            service,
            method,
            start: Instant::now(),
            _in_flight: InFlightGuard::new(),
        }
    }
}

pin_project! {
    /// Future returned by [`RpcMetricsService`].
    pub struct RpcMetricsFuture<F> {
        #[pin]
        inner: F,
        service: String,
        method: String,
        start: Instant,
        _in_flight: InFlightGuard,
    }
}

impl<F, ResBody, E> Future for RpcMetricsFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = match this.inner.poll(cx) {
            Poll::Ready(result) => result,
            Poll::Pending => return Poll::Pending,
        };

        let elapsed = this.start.elapsed();
        let code = match &result {
            Ok(response) => grpc_code(response),
            Err(_) => Code::Unknown,
        };
        record_rpc_handled(this.service, this.method, code_name(code), elapsed);

        tracing::debug!(
            target: TARGET_GRPC,
            rpc_service = %this.service,
            rpc_method = %this.method,
            grpc_code = code_name(code),
            duration_ms = elapsed.as_secs_f64() * 1000.0,
            "rpc handled"
        );

        Poll::Ready(result)
    }
}

fn grpc_code<B>(response: &Response<B>) -> Code {
    response
        .headers()
        .get("grpc-status")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i32>().ok())
        .map_or(Code::Ok, Code::from_i32)
}

/// Label value for a status code, e.g. `NotFound`.
pub(crate) fn code_name(code: Code) -> &'static str {
    match code {
        Code::Ok => "OK",
        Code::Cancelled => "Canceled",
        Code::Unknown => "Unknown",
        Code::InvalidArgument => "InvalidArgument",
        Code::DeadlineExceeded => "DeadlineExceeded",
        Code::NotFound => "NotFound",
        Code::AlreadyExists => "AlreadyExists",
        Code::PermissionDenied => "PermissionDenied",
        Code::ResourceExhausted => "ResourceExhausted",
        Code::FailedPrecondition => "FailedPrecondition",
        Code::Aborted => "Aborted",
        Code::OutOfRange => "OutOfRange",
        Code::Unimplemented => "Unimplemented",
        Code::Internal => "Internal",
        Code::Unavailable => "Unavailable",
        Code::DataLoss => "DataLoss",
        Code::Unauthenticated => "Unauthenticated",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tower::ServiceExt;

    #[test]
    fn test_grpc_code_from_headers() {
        let ok = Response::new(());
        assert_eq!(grpc_code(&ok), Code::Ok);

        let not_found = Response::builder().header("grpc-status", "5").body(()).unwrap();
        assert_eq!(grpc_code(&not_found), Code::NotFound);

        let garbage = Response::builder().header("grpc-status", "abc").body(()).unwrap();
        assert_eq!(grpc_code(&garbage), Code::Ok);
    }

    #[test]
    fn test_code_names_are_distinct() {
        let codes = [
            Code::Ok,
            Code::InvalidArgument,
            Code::NotFound,
            Code::AlreadyExists,
            Code::PermissionDenied,
            Code::FailedPrecondition,
            Code::Internal,
        ];
        let names: std::collections::HashSet<_> = codes.iter().map(|c| code_name(*c)).collect();
        assert_eq!(names.len(), codes.len());
    }

    #[tokio::test]
    async fn test_layer_passes_response_through() {
        let inner = tower::service_fn(|_req: Request<()>| async {
            Ok::<_, Infallible>(
                Response::builder()
                    .header("grpc-status", "6")
                    .body(())
                    .unwrap(),
            )
        });
        let svc = RpcMetricsLayer::new().layer(inner);
        let req = Request::builder()
            .uri("/photos.v1.Photos/CreatePhoto")
            .body(())
            .unwrap();
        let response = svc.oneshot(req).await.unwrap();
        assert_eq!(grpc_code(&response), Code::AlreadyExists);
    }
}
