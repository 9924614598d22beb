//! The transport host.
//!
//! [`TransportHost`] serves a set of [`ServiceRegistration`]s on two
//! listeners: a gRPC server and an HTTP server carrying the JSON gateway, the
//! API description, the Swagger UI and the metrics scrape route.
//!
//! `start` binds the gRPC listener first, so gateway routes are only ever
//! registered against a listener that exists. It then runs both transports
//! until the first of them stops, shuts the other one down, and returns that
//! first outcome.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use twinport_server::{ShutdownSignal, TransportHost};
//!
//! let host = Arc::new(
//!     TransportHost::new(config.server)
//!         .with_interceptors([auth])
//!         .with_cancellation(ShutdownSignal::with_os_signals()),
//! );
//!
//! let services: Vec<Arc<dyn ServiceRegistration>> = vec![Arc::new(Photos::new())];
//! host.start("photos", &services).await?;
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::server::conn::{http1, http2};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{AbortHandle, JoinSet};
use tonic::body::BoxBody;
use tonic::codegen::StdError;
use tonic::service::Routes;
use tonic_health::server::HealthReporter;
use tonic_health::ServingStatus;
use tower::ServiceBuilder;
use twinport_config::HostConfig;
use twinport_docs::{DocsError, SpecFile, SwaggerUi, DEFAULT_DOCS_DIR, DEFAULT_UI_PATH};
use twinport_telemetry::logging::{TARGET_GRPC, TARGET_HTTP};
use twinport_telemetry::metrics::{init_metrics, record_http_request, render_metrics, MetricsConfig};

use crate::error::{HostError, Transport};
use crate::gateway::{GatewayMux, JsonOptions};
use crate::http_router::HttpRouter;
use crate::interceptor::{InterceptorLayer, RpcInterceptor};
use crate::message_limit::MessageLimitLayer;
use crate::metrics_layer::RpcMetricsLayer;
use crate::registration::{GatewayEndpoint, MessageLimits, RpcRegistrar, ServiceRegistration};
use crate::response::{bytes_response, text_response, HttpResponse};
use crate::shutdown::ShutdownSignal;

/// Route of the Prometheus scrape endpoint.
pub const METRICS_PATH: &str = "/metrics";

type ServeOutcome = (Transport, Result<(), HostError>);

enum HostState {
    Idle,
    Starting,
    Running {
        aborts: Vec<AbortHandle>,
        health: HealthReporter,
        services: Vec<&'static str>,
    },
    Stopped,
}

/// Everything `start` prepares before the transports are spawned.
struct Prepared {
    routes: Routes,
    services: Vec<&'static str>,
    health: HealthReporter,
    router: HttpRouter,
    http_listener: TcpListener,
}

/// Runs registered services on a gRPC listener and an HTTP listener.
pub struct TransportHost {
    config: HostConfig,
    interceptors: Vec<Arc<dyn RpcInterceptor>>,
    docs_dir: PathBuf,
    json_options: JsonOptions,
    metrics: MetricsConfig,
    cancel: ShutdownSignal,
    rpc_shutdown: ShutdownSignal,
    http_shutdown: ShutdownSignal,
    state: Mutex<HostState>,
    rpc_addr: Mutex<Option<SocketAddr>>,
    http_addr: Mutex<Option<SocketAddr>>,
}

impl TransportHost {
    /// Creates a host for `config`.
    #[must_use]
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            interceptors: Vec::new(),
            docs_dir: PathBuf::from(DEFAULT_DOCS_DIR),
            json_options: JsonOptions::default(),
            metrics: MetricsConfig::default(),
            cancel: ShutdownSignal::new(),
            rpc_shutdown: ShutdownSignal::new(),
            http_shutdown: ShutdownSignal::new(),
            state: Mutex::new(HostState::Idle),
            rpc_addr: Mutex::new(None),
            http_addr: Mutex::new(None),
        }
    }

    /// Sets the interceptors run, in order, before every RPC.
    #[must_use]
    pub fn with_interceptors(
        mut self,
        interceptors: impl IntoIterator<Item = Arc<dyn RpcInterceptor>>,
    ) -> Self {
        self.interceptors = interceptors.into_iter().collect();
        self
    }

    /// Sets the directory holding `{doc_name}.spec.json`.
    #[must_use]
    pub fn with_docs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.docs_dir = dir.into();
        self
    }

    /// Sets the gateway's JSON rendering options.
    #[must_use]
    pub fn with_json_options(mut self, options: JsonOptions) -> Self {
        self.json_options = options;
        self
    }

    /// Sets the Prometheus recorder `start` installs when none is installed
    /// yet. Disabling it leaves `/metrics` answering 503.
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sets a signal that cancels `start` while services are registering.
    ///
    /// Once both transports are serving the signal is no longer observed;
    /// use [`stop`](Self::stop) from then on.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: ShutdownSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// The host configuration.
    #[must_use]
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Address the gRPC listener is bound to, once bound.
    #[must_use]
    pub fn rpc_addr(&self) -> Option<SocketAddr> {
        *self.rpc_addr.lock()
    }

    /// Address the HTTP listener is bound to, once bound.
    #[must_use]
    pub fn http_addr(&self) -> Option<SocketAddr> {
        *self.http_addr.lock()
    }

    /// Registers `services` and serves them until a transport stops.
    ///
    /// Returns the first transport's outcome: `Ok(())` when it stopped
    /// cleanly (after [`stop`](Self::stop)), the error otherwise. The other
    /// transport is shut down in the background.
    ///
    /// # Errors
    ///
    /// - `HostError::AlreadyStarted` if called twice
    /// - `HostError::Bind` if either listener cannot be bound
    /// - `HostError::Cancelled` if the cancellation signal fires during
    ///   registration
    /// - any error returned by a registration hook
    /// - `HostError::Serve` or `HostError::Join` if a transport fails
    pub async fn start(
        &self,
        doc_name: &str,
        services: &[Arc<dyn ServiceRegistration>],
    ) -> Result<(), HostError> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, HostState::Idle) {
                return Err(HostError::AlreadyStarted);
            }
            *state = HostState::Starting;
        }

        if let Err(e) = init_metrics(&self.metrics) {
            tracing::warn!(error = %e, "metrics recorder unavailable, /metrics will answer 503");
        }

        match self.launch(doc_name, services).await {
            Ok(set) => self.supervise(set).await,
            Err(e) => {
                *self.state.lock() = HostState::Stopped;
                tracing::error!(error = %e, "host failed to start");
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        doc_name: &str,
        services: &[Arc<dyn ServiceRegistration>],
    ) -> Result<JoinSet<ServeOutcome>, HostError> {
        let spec = SpecFile::new(&self.docs_dir, doc_name)?;

        let rpc_bind = self.config.grpc_bind_addr();
        let rpc_listener = TcpListener::bind(&rpc_bind)
            .await
            .map_err(|e| HostError::bind(Transport::Rpc, rpc_bind.as_str(), e))?;
        let rpc_addr = rpc_listener
            .local_addr()
            .map_err(|e| HostError::bind(Transport::Rpc, rpc_bind.as_str(), e))?;
        *self.rpc_addr.lock() = Some(rpc_addr);

        let prepared = tokio::select! {
            biased;
            () = self.cancel.recv() => {
                tracing::info!("start cancelled during registration");
                return Err(HostError::Cancelled);
            }
            prepared = self.prepare(spec, services, rpc_addr) => prepared?,
        };

        let Prepared {
            routes,
            services,
            health,
            router,
            http_listener,
        } = prepared;

        let mut set = JoinSet::new();
        let mut aborts = Vec::with_capacity(2);

        let rpc_stack = ServiceBuilder::new()
            .layer(RpcMetricsLayer::new())
            .layer(InterceptorLayer::new(self.interceptors.iter().cloned()))
            .layer(MessageLimitLayer::new(self.message_limits()))
            .service(routes);
        let rpc_signal = self.rpc_shutdown.clone();
        tracing::info!(target: TARGET_GRPC, addr = %rpc_addr, "gRPC server listening");
        aborts.push(set.spawn(async move {
            let result = serve_rpc(rpc_listener, rpc_stack, rpc_signal).await;
            (Transport::Rpc, result)
        }));

        let router = Arc::new(router);
        let http_signal = self.http_shutdown.clone();
        let body_limit = self.config.max_receive_message_length;
        aborts.push(set.spawn(async move {
            let result = serve_http(http_listener, router, http_signal, body_limit).await;
            (Transport::Http, result)
        }));

        let mut state = self.state.lock();
        if matches!(*state, HostState::Starting) {
            *state = HostState::Running {
                aborts,
                health,
                services,
            };
        }

        Ok(set)
    }

    async fn prepare(
        &self,
        spec: SpecFile,
        services: &[Arc<dyn ServiceRegistration>],
        rpc_addr: SocketAddr,
    ) -> Result<Prepared, HostError> {
        let limits = self.message_limits();
        let endpoint = GatewayEndpoint::new(rpc_addr, limits);
        let mut registrar = RpcRegistrar::new(limits);
        let mut mux = GatewayMux::with_options(self.json_options);
        let mut reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(tonic_health::pb::FILE_DESCRIPTOR_SET);

        for service in services {
            service.register_rpc(&mut registrar)?;
            service.register_gateway(&mut mux, &endpoint).await?;
            if let Some(descriptors) = service.file_descriptor_set() {
                reflection = reflection.register_encoded_file_descriptor_set(descriptors);
            }
            tracing::debug!(service = service.name(), "service registered");
        }

        let (mut health, health_service) = tonic_health::server::health_reporter();
        let reflection_service = reflection
            .build_v1()
            .map_err(|e| HostError::Reflection(e.to_string()))?;
        registrar.add_service(health_service)?;
        registrar.add_service(reflection_service)?;

        let (routes, names) = registrar.into_parts();
        for name in &names {
            health.set_service_status(*name, ServingStatus::Serving).await;
        }

        let http_bind = self.config.http_bind_addr();
        let http_listener = TcpListener::bind(&http_bind)
            .await
            .map_err(|e| HostError::bind(Transport::Http, http_bind.as_str(), e))?;
        let http_addr = http_listener
            .local_addr()
            .map_err(|e| HostError::bind(Transport::Http, http_bind.as_str(), e))?;
        *self.http_addr.lock() = Some(http_addr);

        let mut router = HttpRouter::new();
        for service in services {
            service.register_http(&mut router)?;
        }
        mount_builtin_routes(&mut router, spec, mux)?;
        tracing::info!(target: TARGET_HTTP, addr = %http_addr, "HTTP server listening");

        Ok(Prepared {
            routes,
            services: names,
            health,
            router,
            http_listener,
        })
    }

    fn message_limits(&self) -> MessageLimits {
        MessageLimits {
            max_send: self.config.max_send_message_length,
            max_receive: self.config.max_receive_message_length,
        }
    }

    async fn supervise(&self, mut set: JoinSet<ServeOutcome>) -> Result<(), HostError> {
        let first = set.join_next().await;

        self.rpc_shutdown.trigger();
        self.http_shutdown.trigger();
        tokio::spawn(reap(set, self.config.shutdown_grace()));

        match first {
            Some(Ok((transport, Ok(())))) => {
                tracing::info!(transport = %transport, "transport stopped");
                Ok(())
            }
            Some(Ok((transport, Err(e)))) => {
                tracing::error!(transport = %transport, error = %e, "transport failed");
                Err(e)
            }
            Some(Err(e)) if e.is_cancelled() => Ok(()),
            Some(Err(e)) => Err(HostError::Join(e)),
            None => Ok(()),
        }
    }

    /// Stops both transports.
    ///
    /// Marks every service as not serving, asks both servers to stop
    /// accepting work and drain, waits the full `shutdown_timeout`, then
    /// aborts whatever is still running. Aborting a transport closes its
    /// open connections, so calls still in flight fail. Always takes at
    /// least `shutdown_timeout`. Failures are logged, not returned.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), HostState::Stopped);
        let (aborts, health) = match previous {
            HostState::Running {
                aborts,
                health,
                services,
            } => (aborts, Some((health, services))),
            _ => (Vec::new(), None),
        };

        if let Some((mut health, services)) = health {
            for name in services {
                health.set_service_status(name, ServingStatus::NotServing).await;
            }
        }

        tracing::info!(
            timeout_secs = self.config.shutdown_timeout,
            "stopping transports"
        );
        self.rpc_shutdown.trigger();
        self.http_shutdown.trigger();

        tokio::time::sleep(self.config.shutdown_grace()).await;

        for handle in aborts {
            if !handle.is_finished() {
                tracing::warn!("shutdown timeout elapsed, aborting serve task");
                handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for TransportHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHost")
            .field("config", &self.config)
            .field("interceptors", &self.interceptors.len())
            .field("docs_dir", &self.docs_dir)
            .field("rpc_addr", &self.rpc_addr())
            .field("http_addr", &self.http_addr())
            .finish_non_exhaustive()
    }
}

async fn reap(mut set: JoinSet<ServeOutcome>, grace: std::time::Duration) {
    let drain = async {
        while let Some(outcome) = set.join_next().await {
            match outcome {
                Ok((transport, Ok(()))) => {
                    tracing::info!(transport = %transport, "transport stopped");
                }
                Ok((transport, Err(e))) => {
                    tracing::warn!(transport = %transport, error = %e, "transport failed after shutdown began");
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => tracing::error!(error = %e, "serve task panicked"),
            }
        }
    };

    if tokio::time::timeout(grace, drain).await.is_err() {
        tracing::warn!("transport did not stop in time, aborting");
        set.abort_all();
        while set.join_next().await.is_some() {}
    }
}

fn mount_builtin_routes(
    router: &mut HttpRouter,
    spec: SpecFile,
    mux: GatewayMux,
) -> Result<(), HostError> {
    let ui = SwaggerUi::new(DEFAULT_UI_PATH, spec.route()).title(spec.name());
    let spec_route = spec.route();
    let spec = Arc::new(spec);

    router.handle(&spec_route, move |_req| {
        let spec = Arc::clone(&spec);
        async move { serve_spec(&spec).await }
    })?;

    let page = ui.page();
    router.handle(DEFAULT_UI_PATH, move |_req| {
        let page = page.clone();
        async move { bytes_response(StatusCode::OK, "text/html; charset=utf-8", page) }
    })?;

    router.handle(METRICS_PATH, |_req| async { metrics_page() })?;

    let mux = Arc::new(mux);
    router.handle("/", move |req| {
        let mux = Arc::clone(&mux);
        async move { mux.dispatch(req).await }
    })?;

    Ok(())
}

async fn serve_spec(spec: &SpecFile) -> HttpResponse {
    match spec.load().await {
        Ok(content) => bytes_response(StatusCode::OK, "application/json", content),
        Err(DocsError::NotFound { path }) => {
            tracing::debug!(target: TARGET_HTTP, path = %path.display(), "API description missing");
            text_response(StatusCode::NOT_FOUND, "404 page not found\n")
        }
        Err(e) => {
            tracing::warn!(target: TARGET_HTTP, error = %e, "failed to load API description");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to load API description\n")
        }
    }
}

fn metrics_page() -> HttpResponse {
    match render_metrics() {
        Some(text) => bytes_response(StatusCode::OK, "text/plain; version=0.0.4", text),
        None => text_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed\n",
        ),
    }
}

/// Serves the RPC stack over HTTP/2 until `shutdown` fires.
///
/// Each connection runs in `connections`, so aborting this task closes every
/// connection along with it and in-flight calls fail.
async fn serve_rpc<S>(listener: TcpListener, stack: S, shutdown: ShutdownSignal) -> Result<(), HostError>
where
    S: tower::Service<Request<Incoming>, Response = http::Response<BoxBody>, Error = StdError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = accept(&listener, Transport::Rpc) => {
                let (stream, remote_addr) = accepted?;
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(target: TARGET_GRPC, remote = %remote_addr, error = %e, "cannot set TCP_NODELAY");
                }
                let service = TowerToHyperService::new(stack.clone());
                let stop = shutdown.recv();

                connections.spawn(async move {
                    let conn = http2::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service);
                    tokio::pin!(conn);

                    let result = tokio::select! {
                        result = conn.as_mut() => result,
                        () = stop => {
                            conn.as_mut().graceful_shutdown();
                            conn.as_mut().await
                        }
                    };
                    if let Err(e) = result {
                        tracing::debug!(target: TARGET_GRPC, remote = %remote_addr, error = %e, "connection error");
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            () = shutdown.recv() => {
                tracing::info!(target: TARGET_GRPC, "gRPC server shutting down");
                break;
            }
        }
    }

    tracing::debug!(
        target: TARGET_GRPC,
        connections = connections.len(),
        "draining open connections"
    );
    while connections.join_next().await.is_some() {}
    Ok(())
}

/// Waits for the next connection.
///
/// Failures that belong to a single connection are skipped. Running out of
/// file descriptors backs off briefly and retries. Anything else means the
/// listener is unusable and ends the transport.
async fn accept(listener: &TcpListener, transport: Transport) -> Result<(TcpStream, SocketAddr), HostError> {
    loop {
        match listener.accept().await {
            Ok(accepted) => return Ok(accepted),
            Err(e) if is_connection_error(&e) => {
                tracing::debug!(transport = %transport, error = %e, "connection failed during accept");
            }
            Err(e) if is_fd_exhaustion(&e) => {
                tracing::warn!(transport = %transport, error = %e, "accept failed, retrying");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) => return Err(HostError::serve(transport, e)),
        }
    }
}

fn is_connection_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::TimedOut
    )
}

// ENFILE and EMFILE.
fn is_fd_exhaustion(e: &std::io::Error) -> bool {
    matches!(e.raw_os_error(), Some(23 | 24))
}

async fn serve_http(
    listener: TcpListener,
    router: Arc<HttpRouter>,
    shutdown: ShutdownSignal,
    body_limit: usize,
) -> Result<(), HostError> {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = accept(&listener, Transport::Http) => {
                let (stream, remote_addr) = accepted?;
                let router = Arc::clone(&router);
                let stop = shutdown.recv();

                connections.spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let router = Arc::clone(&router);
                        async move {
                            Ok::<_, Infallible>(handle_request(&router, req, body_limit).await)
                        }
                    });

                    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
                    tokio::pin!(conn);

                    let result = tokio::select! {
                        result = conn.as_mut() => result,
                        () = stop => {
                            conn.as_mut().graceful_shutdown();
                            conn.as_mut().await
                        }
                    };
                    if let Err(e) = result {
                        tracing::debug!(target: TARGET_HTTP, remote = %remote_addr, error = %e, "connection error");
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            () = shutdown.recv() => {
                tracing::info!(target: TARGET_HTTP, "HTTP server shutting down");
                break;
            }
        }
    }

    tracing::debug!(
        target: TARGET_HTTP,
        connections = connections.len(),
        "waiting for open connections"
    );
    while connections.join_next().await.is_some() {}
    Ok(())
}

async fn handle_request(router: &HttpRouter, req: Request<Incoming>, body_limit: usize) -> HttpResponse {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let (parts, body) = req.into_parts();
    let response = match Limited::new(body, body_limit).collect().await {
        Ok(collected) => {
            let body: Bytes = collected.to_bytes();
            router.dispatch(Request::from_parts(parts, body)).await
        }
        Err(e) if e.is::<http_body_util::LengthLimitError>() => {
            text_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large\n")
        }
        Err(e) => {
            tracing::debug!(target: TARGET_HTTP, error = %e, "failed to read request body");
            text_response(StatusCode::BAD_REQUEST, "failed to read request body\n")
        }
    };

    let elapsed = start.elapsed();
    let status = response.status().as_u16();
    record_http_request(method.as_str(), status, elapsed);
    tracing::debug!(
        target: TARGET_HTTP,
        http_method = %method,
        http_path = %path,
        http_status_code = status,
        duration_ms = elapsed.as_secs_f64() * 1000.0,
        "request served"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ephemeral() -> HostConfig {
        HostConfig {
            host: "127.0.0.1".to_string(),
            grpc_port: 0,
            http_port: 0,
            shutdown_timeout: 0,
            ..HostConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_without_services_then_stop() {
        let host = Arc::new(TransportHost::new(ephemeral()));
        let runner = Arc::clone(&host);
        let handle = tokio::spawn(async move { runner.start("api", &[]).await });

        while host.http_addr().is_none() {
            tokio::task::yield_now().await;
        }
        assert!(host.rpc_addr().is_some());

        host.stop().await;
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("start returns after stop")
            .expect("no panic");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let host = TransportHost::new(ephemeral());
        host.stop().await;
        let err = host.start("api", &[]).await.unwrap_err();
        assert!(matches!(err, HostError::AlreadyStarted));
    }

    #[tokio::test]
    async fn test_invalid_doc_name() {
        let host = TransportHost::new(ephemeral());
        let err = host.start("../etc/passwd", &[]).await.unwrap_err();
        assert!(matches!(err, HostError::Docs(DocsError::InvalidDocName { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_before_registration_completes() {
        let cancel = ShutdownSignal::new();
        cancel.trigger();
        let host = TransportHost::new(ephemeral()).with_cancellation(cancel);
        let err = host.start("api", &[]).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(host.http_addr().is_none());
    }
}
