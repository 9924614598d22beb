//! Plain HTTP routes.
//!
//! Patterns follow the usual mux rules: a pattern without a trailing slash
//! matches that exact path, a pattern ending in `/` matches the whole subtree
//! below it, and the longest matching pattern wins. A request for a subtree
//! root without its trailing slash (`/docs`) is redirected to it (`/docs/`).
//!
//! ```rust
//! use twinport_server::{HttpRouter, response::text_response};
//! use http::StatusCode;
//!
//! let mut router = HttpRouter::new();
//! router.handle("/healthz", |_req| async { text_response(StatusCode::OK, "ok") }).unwrap();
//! router.handle("/assets/", |_req| async { text_response(StatusCode::OK, "asset") }).unwrap();
//!
//! assert_eq!(router.match_path("/healthz"), Some("/healthz"));
//! assert_eq!(router.match_path("/assets/logo.png"), Some("/assets/"));
//! assert_eq!(router.match_path("/other"), None);
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, StatusCode};

use crate::error::HostError;
use crate::response::{redirect_response, text_response, HttpResponse};

/// Boxed future returned by type-erased handlers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type Handler = Arc<dyn Fn(Request<Bytes>) -> BoxFuture<HttpResponse> + Send + Sync>;

struct Route {
    pattern: String,
    handler: Handler,
}

/// Router for plain (non-gateway) HTTP routes.
#[derive(Default)]
pub struct HttpRouter {
    routes: Vec<Route>,
}

impl HttpRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `HostError::InvalidRoute` if the pattern does not start with
    /// `/`, and `HostError::DuplicateRoute` if it is already registered.
    pub fn handle<F, Fut>(&mut self, pattern: &str, handler: F) -> Result<&mut Self, HostError>
    where
        F: Fn(Request<Bytes>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HttpResponse> + Send + 'static,
    {
        if !pattern.starts_with('/') {
            return Err(HostError::invalid_route(pattern, "must start with '/'"));
        }
        if self.contains(pattern) {
            return Err(HostError::DuplicateRoute {
                method: "*".to_string(),
                pattern: pattern.to_string(),
            });
        }

        let handler: Handler = Arc::new(move |req: Request<Bytes>| -> BoxFuture<HttpResponse> {
            Box::pin(handler(req))
        });
        self.routes.push(Route {
            pattern: pattern.to_string(),
            handler,
        });
        Ok(self)
    }

    /// Returns `true` if `pattern` is registered.
    #[must_use]
    pub fn contains(&self, pattern: &str) -> bool {
        self.routes.iter().any(|r| r.pattern == pattern)
    }

    /// Registered patterns in registration order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.pattern.as_str())
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

    /// Returns the pattern that would serve `path`.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<&str> {
        self.find(path).map(|r| r.pattern.as_str())
    }

    fn find(&self, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|r| pattern_matches(&r.pattern, path))
            .max_by_key(|r| r.pattern.len())
    }

    /// Dispatches a request to the matching handler.
    ///
    /// Unmatched paths get a plain `404`.
    pub async fn dispatch(&self, req: Request<Bytes>) -> HttpResponse {
        let path = req.uri().path();

        if !path.ends_with('/') && !self.contains(path) {
            let subtree = format!("{path}/");
            if self.contains(&subtree) {
                let location = match req.uri().query() {
                    Some(query) => format!("{subtree}?{query}"),
                    None => subtree,
                };
                return redirect_response(&location);
            }
        }

        match self.find(path) {
            Some(route) => {
                let handler = Arc::clone(&route.handler);
                handler(req).await
            }
            None => text_response(StatusCode::NOT_FOUND, "404 page not found\n"),
        }
    }
}

impl std::fmt::Debug for HttpRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRouter")
            .field("patterns", &self.patterns().collect::<Vec<_>>())
            .finish()
    }
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    if pattern.ends_with('/') {
        path.starts_with(pattern)
    } else {
        path == pattern
    }
}
