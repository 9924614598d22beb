//! Request context types.
//!
//! A [`RequestContext`] is created for every RPC call by the interceptor
//! layer, enriched by caller interceptors and stored in the request
//! extensions where handlers can read it.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying a caller-supplied request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A unique identifier for each request, using UUID v7.
///
/// # Example
///
/// ```
/// use twinport_core::RequestId;
///
/// let id = RequestId::new();
/// assert_eq!(RequestId::parse(&id.to_string()), Some(id));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new time-ordered request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `RequestId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parses a request ID from a header value.
    ///
    /// Returns `None` if the value is not a UUID.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value.trim()).ok().map(Self)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Per-call context for a hosted RPC.
///
/// # Example
///
/// ```
/// use twinport_core::RequestContext;
///
/// let mut ctx = RequestContext::for_method("/photos.v1.Photos/GetPhoto");
/// ctx.set_subject("user-42");
/// ctx.insert("tenant", "acme");
///
/// assert_eq!(ctx.method(), "GetPhoto");
/// assert_eq!(ctx.subject(), Some("user-42"));
/// assert_eq!(ctx.get("tenant"), Some("acme"));
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: RequestId,

    /// Full method path, e.g. `/pkg.Service/Method`.
    full_method: String,

    /// Authenticated subject, set by an interceptor.
    subject: Option<String>,

    metadata: BTreeMap<String, String>,

    started_at: Instant,
}

impl RequestContext {
    /// Creates a context for the given full method path with a fresh ID.
    #[must_use]
    pub fn for_method(full_method: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            full_method: full_method.into(),
            subject: None,
            metadata: BTreeMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Replaces the request ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the full method path.
    #[must_use]
    pub fn full_method(&self) -> &str {
        &self.full_method
    }

    /// Returns the short method name (last `/` segment of the full path).
    #[must_use]
    pub fn method(&self) -> &str {
        crate::method::short_name(&self.full_method)
    }

    /// Returns the service part of the full method path.
    #[must_use]
    pub fn service(&self) -> &str {
        crate::method::service_name(&self.full_method)
    }

    /// Returns the authenticated subject, if any.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Sets the authenticated subject.
    pub fn set_subject(&mut self, subject: impl Into<String>) {
        self.subject = Some(subject.into());
    }

    /// Returns a metadata value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Stores a metadata value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.metadata.insert(key.into(), value.into())
    }

    /// Iterates over metadata in key order.
    pub fn metadata(&self) -> impl Iterator<Item = (&str, &str)> {
        self.metadata.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the elapsed time since the call started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Reads the context from a tonic request's extensions.
    #[must_use]
    pub fn from_request<T>(request: &tonic::Request<T>) -> Option<&Self> {
        request.extensions().get::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_new_generates_unique_ids() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2, "Each RequestId should be unique");
    }

    #[test]
    fn test_request_id_parse() {
        let uuid = Uuid::now_v7();
        assert_eq!(
            RequestId::parse(&format!(" {uuid} ")),
            Some(RequestId::from_uuid(uuid))
        );
        assert_eq!(RequestId::parse("not-a-uuid"), None);
    }

    #[test]
    fn test_method_names() {
        let ctx = RequestContext::for_method("/photos.v1.Photos/ListAlbums");
        assert_eq!(ctx.full_method(), "/photos.v1.Photos/ListAlbums");
        assert_eq!(ctx.method(), "ListAlbums");
        assert_eq!(ctx.service(), "photos.v1.Photos");
    }

    #[test]
    fn test_metadata_is_typed_per_key() {
        let mut ctx = RequestContext::for_method("/a.B/C");
        assert_eq!(ctx.get("locale"), None);
        assert_eq!(ctx.insert("locale", "en"), None);
        assert_eq!(ctx.insert("locale", "de"), Some("en".to_string()));
        ctx.insert("app", "web");

        let keys: Vec<_> = ctx.metadata().map(|(k, _)| k).collect();
        assert_eq!(keys, ["app", "locale"]);
    }

    #[test]
    fn test_from_request_extensions() {
        let mut request = tonic::Request::new(());
        assert!(RequestContext::from_request(&request).is_none());

        let id = RequestId::new();
        request
            .extensions_mut()
            .insert(RequestContext::for_method("/a.B/C").with_request_id(id));

        let ctx = RequestContext::from_request(&request).expect("context inserted");
        assert_eq!(ctx.request_id(), id);
    }
}
