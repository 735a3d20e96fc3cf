//! Server-side request handling.
//!
//! [`envelope`] defines the wire request/response shapes, [`dispatch`]
//! executes envelopes against a handler tree, [`http`] adapts the unary call
//! path to HTTP semantics, and [`broker`] serves the subscription protocol
//! over a message-oriented connection.

pub mod broker;
pub mod dispatch;
pub mod envelope;
pub mod http;

pub use broker::{BrokerConfig, SubscriptionBroker, DEFAULT_SUBSCRIBE_KEY};
pub use envelope::{BatchPolicy, RequestEnvelope, Response};
pub use http::{handle_http, HttpResponse};
