//! Handler context - what a guarded node gets to see about the caller.
//!
//! A [`Context`] is built by the transport edge and threaded through path
//! resolution. Guarded nodes make their authorization decision from it alone,
//! without reaching into transport internals: unary calls carry the HTTP
//! request abstraction, message-channel calls carry the per-message `auth`
//! string.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

/// Transport-independent view of an HTTP request.
///
/// The concrete server binding converts its own request type into this
/// before handing the body to the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    /// HTTP method, uppercase ("POST", "OPTIONS", ...).
    pub method: String,
    /// Request headers, lowercase names.
    pub headers: HashMap<String, String>,
    /// Raw body bytes (a packed request envelope for POST).
    pub body: Bytes,
}

impl HttpRequest {
    /// Build a POST request carrying the given packed body.
    pub fn post(body: impl Into<Bytes>) -> Self {
        Self {
            method: "POST".to_string(),
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Look up a header by name (lowercase).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Caller context handed to guarded nodes during resolution.
#[derive(Debug, Clone)]
pub enum Context {
    /// A unary call arriving over the HTTP surface.
    Http {
        /// The originating request.
        request: Arc<HttpRequest>,
    },
    /// A call arriving over the persistent message channel.
    Message {
        /// Credentials embedded in the subscribe message, if any.
        auth: Option<String>,
    },
}

impl Context {
    /// Context for a unary HTTP call.
    pub fn http(request: HttpRequest) -> Self {
        Context::Http {
            request: Arc::new(request),
        }
    }

    /// Context for a message-channel call.
    pub fn message(auth: Option<String>) -> Self {
        Context::Message { auth }
    }

    /// Per-message credentials, when present (message contexts only).
    pub fn auth(&self) -> Option<&str> {
        match self {
            Context::Message { auth } => auth.as_deref(),
            Context::Http { .. } => None,
        }
    }

    /// The originating HTTP request, for unary calls.
    pub fn request(&self) -> Option<&HttpRequest> {
        match self {
            Context::Http { request } => Some(request),
            Context::Message { .. } => None,
        }
    }

    /// Whether this is a unary HTTP call.
    pub fn is_http(&self) -> bool {
        matches!(self, Context::Http { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_context_auth() {
        let ctx = Context::message(Some("token".into()));
        assert_eq!(ctx.auth(), Some("token"));
        assert!(!ctx.is_http());
        assert!(ctx.request().is_none());
    }

    #[test]
    fn test_http_context() {
        let mut req = HttpRequest::post(vec![1, 2, 3]);
        req.headers
            .insert("authorization".to_string(), "Bearer abc".to_string());

        let ctx = Context::http(req);
        assert!(ctx.is_http());
        assert_eq!(ctx.auth(), None);
        assert_eq!(
            ctx.request().unwrap().header("authorization"),
            Some("Bearer abc")
        );
    }
}
