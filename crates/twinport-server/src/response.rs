//! Response helpers shared by the HTTP router, the gateway and the host.

use bytes::Bytes;
use http::{header, Response, StatusCode};
use http_body_util::Full;

/// Response type produced by every HTTP handler.
pub type HttpResponse = Response<Full<Bytes>>;

/// Builds a response with the given status, content type and body.
pub fn bytes_response(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> HttpResponse {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(Full::new(body.into()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

/// Builds an `application/json` response.
pub fn json_response(status: StatusCode, body: &serde_json::Value) -> HttpResponse {
    bytes_response(status, "application/json", body.to_string())
}

/// Builds a `text/plain` response.
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
    bytes_response(status, "text/plain; charset=utf-8", body)
}

/// Builds a `301 Moved Permanently` response to `location`.
pub fn redirect_response(location: &str) -> HttpResponse {
    Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header(header::LOCATION, location)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}
