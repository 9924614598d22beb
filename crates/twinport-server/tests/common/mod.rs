//! Shared fixtures: a hand-written gRPC service using a JSON codec, its
//! client, a registration wiring both into the host, and HTTP helpers.

#![allow(dead_code)]

use std::convert::Infallible;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tonic::body::{empty_body, BoxBody};
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::codegen::{Body, BoxFuture, StdError};
use tonic::server::{NamedService, UnaryService};
use tonic::transport::{Channel, Endpoint};
use tonic::Status;
use tower::Service;
use twinport_config::HostConfig;
use twinport_core::{DefaultTranslator, DomainError, FieldFailure, RequestContext};
use twinport_server::response::text_response;
use twinport_server::{
    async_trait, GatewayEndpoint, GatewayMux, HostError, HttpRouter, RpcRegistrar,
    ServiceRegistration, TransportHost,
};

pub const SERVICE_NAME: &str = "test.greeter.v1.Greeter";
pub const SAY_HELLO: &str = "/test.greeter.v1.Greeter/SayHello";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelloRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloReply {
    pub message: String,
    pub subject: Option<String>,
}

// ---------------------------------------------------------------------------
// JSON codec
// ---------------------------------------------------------------------------

pub struct JsonCodec<T, U>(PhantomData<(T, U)>);

impl<T, U> Default for JsonCodec<T, U> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

pub struct JsonEncoder<T>(PhantomData<T>);

pub struct JsonDecoder<U>(PhantomData<U>);

impl<T: Serialize> Encoder for JsonEncoder<T> {
    type Item = T;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, buf: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        serde_json::to_writer(buf.writer(), &item).map_err(|e| Status::internal(e.to_string()))
    }
}

impl<U: DeserializeOwned> Decoder for JsonDecoder<U> {
    type Item = U;
    type Error = Status;

    fn decode(&mut self, buf: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        if !buf.has_remaining() {
            return Ok(None);
        }
        serde_json::from_reader(buf.reader())
            .map(Some)
            .map_err(|e| Status::internal(e.to_string()))
    }
}

impl<T, U> Codec for JsonCodec<T, U>
where
    T: Serialize + Send + 'static,
    U: DeserializeOwned + Send + 'static,
{
    type Encode = T;
    type Decode = U;
    type Encoder = JsonEncoder<T>;
    type Decoder = JsonDecoder<U>;

    fn encoder(&mut self) -> Self::Encoder {
        JsonEncoder(PhantomData)
    }

    fn decoder(&mut self) -> Self::Decoder {
        JsonDecoder(PhantomData)
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Greets by name and fails on a few reserved names.
#[derive(Debug, Default)]
pub struct Greeter;

impl Greeter {
    async fn say_hello(
        &self,
        request: tonic::Request<HelloRequest>,
    ) -> Result<tonic::Response<HelloReply>, Status> {
        let subject = RequestContext::from_request(&request)
            .and_then(RequestContext::subject)
            .map(str::to_string);
        let name = request.into_inner().name;

        match name.as_str() {
            "" => {
                let failures = vec![FieldFailure::new("name", "required").with_message("is required")];
                Err(DomainError::validation(&DefaultTranslator, failures, "HelloRequest").into())
            }
            "ghost" => Err(DomainError::not_found(format!("user {name} not found")).into()),
            "taken" => Err(DomainError::conflict("name already greeted").into()),
            "boom" => {
                let cause = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
                Err(DomainError::runtime(cause, "load greeting").into())
            }
            "slow" => {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(reply(&name, subject))
            }
            _ => Ok(reply(&name, subject)),
        }
    }
}

fn reply(name: &str, subject: Option<String>) -> tonic::Response<HelloReply> {
    tonic::Response::new(HelloReply {
        message: format!("Hello {name}"),
        subject,
    })
}

#[derive(Debug, Clone, Default)]
pub struct GreeterServer {
    inner: Arc<Greeter>,
}

impl NamedService for GreeterServer {
    const NAME: &'static str = SERVICE_NAME;
}

impl<B> Service<http::Request<B>> for GreeterServer
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        struct SayHelloSvc(Arc<Greeter>);

        impl UnaryService<HelloRequest> for SayHelloSvc {
            type Response = HelloReply;
            type Future = BoxFuture<tonic::Response<HelloReply>, Status>;

            fn call(&mut self, request: tonic::Request<HelloRequest>) -> Self::Future {
                let inner = Arc::clone(&self.0);
                Box::pin(async move { inner.say_hello(request).await })
            }
        }

        let inner = Arc::clone(&self.inner);
        if req.uri().path() == SAY_HELLO {
            Box::pin(async move {
                let mut grpc = tonic::server::Grpc::new(JsonCodec::<HelloReply, HelloRequest>::default());
                Ok(grpc.unary(SayHelloSvc(inner), req).await)
            })
        } else {
            Box::pin(async move {
                let mut response = http::Response::new(empty_body());
                let headers = response.headers_mut();
                headers.insert("grpc-status", http::HeaderValue::from_static("12"));
                headers.insert(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static("application/grpc"),
                );
                Ok(response)
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GreeterClient {
    inner: tonic::client::Grpc<Channel>,
}

impl GreeterClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn connect(addr: SocketAddr) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::from_shared(format!("http://{addr}"))?.connect().await?;
        Ok(Self::new(channel))
    }

    pub async fn say_hello(
        &mut self,
        request: tonic::Request<HelloRequest>,
    ) -> Result<tonic::Response<HelloReply>, Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("service not ready: {e}")))?;
        let path = http::uri::PathAndQuery::from_static(SAY_HELLO);
        self.inner
            .unary(request, path, JsonCodec::<HelloRequest, HelloReply>::default())
            .await
    }

    pub async fn hello(&mut self, name: &str) -> Result<HelloReply, Status> {
        let request = tonic::Request::new(HelloRequest {
            name: name.to_string(),
        });
        self.say_hello(request).await.map(tonic::Response::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Registers the greeter on both transports and records what ran.
#[derive(Debug, Default)]
pub struct GreeterRegistration {
    pub gateway_registered: AtomicBool,
}

impl GreeterRegistration {
    pub fn gateway_registered(&self) -> bool {
        self.gateway_registered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceRegistration for GreeterRegistration {
    fn name(&self) -> &str {
        "greeter"
    }

    fn register_rpc(&self, server: &mut RpcRegistrar) -> Result<(), HostError> {
        server.add_service(GreeterServer::default())?;
        Ok(())
    }

    async fn register_gateway(
        &self,
        mux: &mut GatewayMux,
        endpoint: &GatewayEndpoint,
    ) -> Result<(), HostError> {
        let channel = endpoint
            .channel()
            .map_err(|e| HostError::registration(self.name(), e))?;

        let post_channel = channel.clone();
        mux.handle(Method::POST, "/v1/greeter/hello", move |req| {
            let mut client = GreeterClient::new(post_channel.clone());
            async move {
                let body: HelloRequest = req.json()?;
                let reply = client.say_hello(req.rpc_request(body)).await?;
                Ok(reply.into_inner())
            }
        })?;

        mux.handle(Method::GET, "/v1/greeter/hello/{name}", move |req| {
            let mut client = GreeterClient::new(channel.clone());
            async move {
                let name = req.require_param("name")?.to_string();
                let reply = client.say_hello(req.rpc_request(HelloRequest { name })).await?;
                Ok(reply.into_inner())
            }
        })?;

        self.gateway_registered.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn register_http(&self, router: &mut HttpRouter) -> Result<(), HostError> {
        router.handle("/greeter/ping", |_req| async { text_response(StatusCode::OK, "pong") })?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Host helpers
// ---------------------------------------------------------------------------

pub fn local_config() -> HostConfig {
    HostConfig {
        host: "127.0.0.1".to_string(),
        grpc_port: 0,
        http_port: 0,
        shutdown_timeout: 0,
        ..HostConfig::default()
    }
}

pub fn write_spec(dir: &Path, name: &str) -> String {
    let content = r#"{"swagger":"2.0","info":{"title":"greeter","version":"v1"}}"#;
    std::fs::write(dir.join(format!("{name}.spec.json")), content).expect("write spec");
    content.to_string()
}

pub struct RunningHost {
    pub host: Arc<TransportHost>,
    pub handle: tokio::task::JoinHandle<Result<(), HostError>>,
}

impl RunningHost {
    pub fn rpc_addr(&self) -> SocketAddr {
        self.host.rpc_addr().expect("rpc bound")
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.host.http_addr().expect("http bound"))
    }

    pub async fn client(&self) -> GreeterClient {
        GreeterClient::connect(self.rpc_addr()).await.expect("connect")
    }

    pub async fn shutdown(self) -> Result<(), HostError> {
        self.host.stop().await;
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("start returns after stop")
            .expect("start does not panic")
    }
}

/// Starts `host` in the background and waits until both listeners are bound.
pub async fn spawn_host(
    host: TransportHost,
    doc_name: &'static str,
    services: Vec<Arc<dyn ServiceRegistration>>,
) -> RunningHost {
    let host = Arc::new(host);
    let runner = Arc::clone(&host);
    let handle = tokio::spawn(async move { runner.start(doc_name, &services).await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while host.http_addr().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("host binds both listeners");

    // Routes are mounted right after the HTTP bind; give the task a moment.
    tokio::time::sleep(Duration::from_millis(20)).await;

    RunningHost { host, handle }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub struct HttpReply {
    pub status: StatusCode,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

impl HttpReply {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("JSON body")
    }
}

pub async fn http_request(method: Method, url: &str, body: Option<&str>) -> HttpReply {
    let client = Client::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
    let mut builder = http::Request::builder().method(method).uri(url);
    if body.is_some() {
        builder = builder.header(http::header::CONTENT_TYPE, "application/json");
    }
    let request = builder
        .body(Full::new(Bytes::from(body.unwrap_or_default().to_string())))
        .expect("request");

    let response = client.request(request).await.expect("HTTP response");
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    HttpReply {
        status,
        headers,
        body,
    }
}

pub async fn http_get(url: &str) -> HttpReply {
    http_request(Method::GET, url, None).await
}
