//! HTTP surface for unary calls.
//!
//! A thin layer over the transport-independent [`HttpRequest`] abstraction:
//! `OPTIONS` answers 204 with the allowed-methods header and no body, any
//! other method is treated as a call carrying a packed request envelope.
//! Concrete framework bindings convert their request type into
//! [`HttpRequest`] and copy status/headers/body back out of the returned
//! [`HttpResponse`].

use bytes::Bytes;

use crate::app::App;
use crate::codec::MsgPackCodec;
use crate::context::{Context, HttpRequest};
use crate::server::dispatch;

/// Header advertised on OPTIONS responses.
pub const ACCESS_CONTROL_ALLOW_METHODS: (&str, &str) =
    ("Access-Control-Allow-Methods", "OPTIONS, POST");

/// Transport-independent view of an HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Packed response body.
    pub body: Bytes,
}

/// Handle one HTTP exchange against the tree.
pub async fn handle_http(tree: &App, request: HttpRequest) -> HttpResponse {
    if request.method.eq_ignore_ascii_case("OPTIONS") {
        return HttpResponse {
            status: 204,
            headers: vec![(
                ACCESS_CONTROL_ALLOW_METHODS.0.to_string(),
                ACCESS_CONTROL_ALLOW_METHODS.1.to_string(),
            )],
            body: Bytes::new(),
        };
    }

    let body = request.body.clone();
    let context = Context::http(request);
    let response = dispatch::handle(tree, &body, &context).await;

    let packed = match MsgPackCodec::encode_value(&response.data) {
        Ok(bytes) => Bytes::from(bytes),
        Err(error) => {
            tracing::error!("failed to encode response body: {error}");
            return HttpResponse {
                status: 500,
                headers: Vec::new(),
                body: Bytes::new(),
            };
        }
    };

    HttpResponse {
        status: response.status,
        headers: response.headers,
        body: packed,
    }
}
