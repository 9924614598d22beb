//! JSON/HTTP gateway.
//!
//! Gateway routes translate HTTP requests into RPC calls against the host's
//! own gRPC listener and render the reply as JSON. Routes are
//! `(method, template)` pairs where `{name}` segments capture path
//! parameters; the first registered match wins.
//!
//! Failed calls are rendered with the status envelope
//!
//! ```json
//! {"code": 5, "message": "photo 7 not found", "details": {"description": "Not found", "violations": []}}
//! ```
//!
//! and the HTTP status derived from the gRPC code.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, Request, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};
use twinport_core::status::decode_detail;
use twinport_core::REQUEST_ID_HEADER;
use twinport_telemetry::logging::TARGET_HTTP;

use crate::error::HostError;
use crate::http_router::BoxFuture;
use crate::response::{json_response, HttpResponse};

/// Prefix of HTTP headers forwarded to the RPC call as metadata.
pub const METADATA_HEADER_PREFIX: &str = "grpc-metadata-";

/// JSON rendering options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonOptions {
    /// Render fields that hold no value as `null` instead of omitting them.
    pub emit_unpopulated: bool,
}

impl Default for JsonOptions {
    fn default() -> Self {
        Self {
            emit_unpopulated: true,
        }
    }
}

impl JsonOptions {
    /// Applies the options to a rendered value.
    #[must_use]
    pub fn apply(self, mut value: serde_json::Value) -> serde_json::Value {
        if !self.emit_unpopulated {
            strip_nulls(&mut value);
        }
        value
    }
}

fn strip_nulls(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

/// An HTTP request matched to a gateway route.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    method: Method,
    path: String,
    params: BTreeMap<String, String>,
    query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
}

impl GatewayRequest {
    /// Creates a gateway request from its parts.
    #[must_use]
    pub fn new(req: Request<Bytes>, params: BTreeMap<String, String>) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            method: parts.method,
            path: parts.uri.path().to_string(),
            params,
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers,
            body,
        }
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// A path parameter captured by the route template.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// A path parameter, or `InvalidArgument` if it is missing.
    pub fn require_param(&self, name: &str) -> Result<&str, Status> {
        self.param(name)
            .ok_or_else(|| Status::invalid_argument(format!("missing parameter {name:?}")))
    }

    /// All path parameters.
    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Decoded query string pairs in order.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query
            .as_deref()
            .and_then(|q| serde_urlencoded::from_str(q).ok())
            .unwrap_or_default()
    }

    /// First value of a query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query_pairs()
            .into_iter()
            .find_map(|(k, v)| (k == name).then_some(v))
    }

    /// Decodes the query string into `T`.
    pub fn query<T: DeserializeOwned>(&self) -> Result<T, Status> {
        serde_urlencoded::from_str(self.query.as_deref().unwrap_or(""))
            .map_err(|e| Status::invalid_argument(format!("invalid query string: {e}")))
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw request body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Decodes the JSON body into `T`. An empty body decodes as `{}`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Status> {
        let body: &[u8] = if self.body.is_empty() { b"{}" } else { &self.body };
        serde_json::from_slice(body)
            .map_err(|e| Status::invalid_argument(format!("invalid JSON body: {e}")))
    }

    /// Metadata forwarded to the RPC call: `authorization`, `x-request-id`,
    /// and every `grpc-metadata-*` header with the prefix removed.
    #[must_use]
    pub fn metadata(&self) -> MetadataMap {
        let mut forwarded = HeaderMap::new();
        for (name, value) in &self.headers {
            let key = name.as_str();
            if key == http::header::AUTHORIZATION.as_str() || key == REQUEST_ID_HEADER {
                forwarded.append(name.clone(), value.clone());
            } else if let Some(stripped) = key.strip_prefix(METADATA_HEADER_PREFIX) {
                if let Ok(stripped) = http::HeaderName::from_bytes(stripped.as_bytes()) {
                    forwarded.append(stripped, value.clone());
                }
            }
        }
        MetadataMap::from_headers(forwarded)
    }

    /// Wraps `message` in a `tonic::Request` carrying the forwarded metadata.
    #[must_use]
    pub fn rpc_request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        *request.metadata_mut() = self.metadata();
        request
    }
}

type GatewayHandler =
    Arc<dyn Fn(GatewayRequest) -> BoxFuture<Result<serde_json::Value, Status>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

struct GatewayRoute {
    method: Method,
    template: String,
    segments: Vec<Segment>,
    handler: GatewayHandler,
}

impl GatewayRoute {
    /// Captured values are percent-decoded; one that does not decode to
    /// UTF-8 fails the match.
    fn match_path(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let actual: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if actual.len() != self.segments.len() {
            return None;
        }

        let mut params = BTreeMap::new();
        for (segment, value) in self.segments.iter().zip(actual) {
            match segment {
                Segment::Literal(expected) if expected.as_str() == value => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    let decoded = urlencoding::decode(value).ok()?;
                    params.insert(name.clone(), decoded.into_owned());
                }
            }
        }
        Some(params)
    }
}

fn parse_template(template: &str) -> Result<Vec<Segment>, HostError> {
    if !template.starts_with('/') {
        return Err(HostError::invalid_route(template, "must start with '/'"));
    }

    let mut segments = Vec::new();
    for part in template.split('/').filter(|s| !s.is_empty()) {
        let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            Some("") => return Err(HostError::invalid_route(template, "empty parameter name")),
            Some(name) => {
                if segments.contains(&Segment::Param(name.to_string())) {
                    return Err(HostError::invalid_route(
                        template,
                        format!("parameter {name:?} appears twice"),
                    ));
                }
                Segment::Param(name.to_string())
            }
            None if part.contains(['{', '}']) => {
                return Err(HostError::invalid_route(template, "unbalanced braces"));
            }
            None => Segment::Literal(part.to_string()),
        };
        segments.push(segment);
    }
    Ok(segments)
}

/// Gateway route table.
///
/// ```rust
/// use http::Method;
/// use twinport_server::GatewayMux;
///
/// let mut mux = GatewayMux::new();
/// mux.handle(Method::GET, "/v1/photos/{id}", |req| async move {
///     let id = req.require_param("id")?.to_string();
///     Ok(serde_json::json!({ "id": id }))
/// })
/// .unwrap();
///
/// let (template, params) = mux.match_route(&Method::GET, "/v1/photos/7").unwrap();
/// assert_eq!(template, "/v1/photos/{id}");
/// assert_eq!(params["id"], "7");
/// ```
#[derive(Default)]
pub struct GatewayMux {
    routes: Vec<GatewayRoute>,
    options: JsonOptions,
}

impl GatewayMux {
    /// Creates an empty mux with default JSON options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty mux with the given JSON options.
    #[must_use]
    pub fn with_options(options: JsonOptions) -> Self {
        Self {
            routes: Vec::new(),
            options,
        }
    }

    /// JSON rendering options.
    #[must_use]
    pub const fn options(&self) -> JsonOptions {
        self.options
    }

    /// Registers a handler for `method` and `template`.
    ///
    /// # Errors
    ///
    /// Returns `HostError::InvalidRoute` for a malformed template and
    /// `HostError::DuplicateRoute` if the pair is already registered.
    pub fn handle<F, Fut, R>(
        &mut self,
        method: Method,
        template: &str,
        handler: F,
    ) -> Result<&mut Self, HostError>
    where
        F: Fn(GatewayRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Status>> + Send + 'static,
        R: Serialize + 'static,
    {
        let segments = parse_template(template)?;
        if self
            .routes
            .iter()
            .any(|r| r.method == method && r.segments == segments)
        {
            return Err(HostError::DuplicateRoute {
                method: method.to_string(),
                pattern: template.to_string(),
            });
        }

        let handler: GatewayHandler = Arc::new(
            move |req: GatewayRequest| -> BoxFuture<Result<serde_json::Value, Status>> {
                let fut = handler(req);
                Box::pin(async move {
                    let reply = fut.await?;
                    serde_json::to_value(reply)
                        .map_err(|e| Status::internal(format!("failed to render response: {e}")))
                })
            },
        );

        self.routes.push(GatewayRoute {
            method,
            template: template.to_string(),
            segments,
            handler,
        });
        Ok(self)
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Finds the route serving `method` and `path`, with its parameters.
    #[must_use]
    pub fn match_route(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(&str, BTreeMap<String, String>)> {
        self.find(method, path)
            .map(|(route, params)| (route.template.as_str(), params))
    }

    fn find(&self, method: &Method, path: &str) -> Option<(&GatewayRoute, BTreeMap<String, String>)> {
        self.routes
            .iter()
            .filter(|r| r.method == *method)
            .find_map(|r| r.match_path(path).map(|params| (r, params)))
    }

    /// Serves a request: runs the matching handler and renders the outcome.
    pub async fn dispatch(&self, req: Request<Bytes>) -> HttpResponse {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let Some((route, params)) = self.find(&method, &path) else {
            let status = if self.routes.iter().any(|r| r.match_path(&path).is_some()) {
                Status::unimplemented("Method Not Allowed")
            } else {
                Status::not_found("Not Found")
            };
            let mut response = error_response(&status);
            if status.code() == Code::Unimplemented {
                *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
            }
            return response;
        };

        let handler = Arc::clone(&route.handler);
        match handler(GatewayRequest::new(req, params)).await {
            Ok(value) => json_response(StatusCode::OK, &self.options.apply(value)),
            Err(status) => {
                tracing::debug!(
                    target: TARGET_HTTP,
                    http_method = %method,
                    http_path = %path,
                    grpc_code = ?status.code(),
                    "gateway call failed"
                );
                error_response(&status)
            }
        }
    }
}

impl std::fmt::Debug for GatewayMux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes: Vec<String> = self
            .routes
            .iter()
            .map(|r| format!("{} {}", r.method, r.template))
            .collect();
        f.debug_struct("GatewayMux")
            .field("routes", &routes)
            .field("options", &self.options)
            .finish()
    }
}

/// HTTP status for a gRPC code.
#[must_use]
pub fn http_status_for(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Code::Unknown | Code::Internal | Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
        Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
            StatusCode::BAD_REQUEST
        }
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Renders `status` as the gateway error envelope.
#[must_use]
pub fn error_response(status: &Status) -> HttpResponse {
    let body = serde_json::json!({
        "code": i32::from(status.code()),
        "message": status.message(),
        "details": decode_detail(status),
    });
    json_response(http_status_for(status.code()), &body)
}
