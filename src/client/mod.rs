//! Client core.
//!
//! A [`Client`] addresses a remote handler tree through dotted paths built
//! with [`Client::path`]. Terminal paths become [`DeferredCall`]s that fire
//! on first await, combine into batches, or turn into subscriptions over the
//! message channel.
//!
//! # Example
//!
//! ```no_run
//! use canopy_rpc::client::{Client, ClientConfig};
//! # use canopy_rpc::transport::LocalTransport;
//! # use canopy_rpc::app::namespace;
//! use rmpv::Value;
//!
//! # async fn demo() -> Result<(), canopy_rpc::client::CallError> {
//! # let transport = LocalTransport::new(namespace::<[(&str, canopy_rpc::app::App); 0], &str>([]));
//! let client = Client::new(
//!     std::sync::Arc::new(transport.clone()),
//!     std::sync::Arc::new(transport),
//!     ClientConfig::default(),
//! );
//!
//! let pong = client.path("ping").call(vec![]).value().await?;
//! let found = client
//!     .path("artists")
//!     .path("findById")
//!     .call(vec![Value::from(7)])
//!     .value()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod call;
mod socket;

use std::sync::Arc;

use rmpv::Value;

use crate::server::broker::DEFAULT_SUBSCRIBE_KEY;
use crate::server::envelope::RequestEnvelope;
use crate::subject::Subscription;
use crate::transport::{CallTransport, MessageTransport};

pub use batch::{
    all, all_sequential, all_settled, all_settled_sequential, Batch, SettledBatch, SettledValue,
};
pub use call::{CallError, CallResult, DeferredCall};
pub use socket::EventError;

use socket::MessageSocket;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Credentials attached to every subscribe message.
    pub auth: Option<String>,
    /// Trailing path segment that marks a subscription; must match the
    /// server broker's configuration.
    pub subscribe_key: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            auth: None,
            subscribe_key: DEFAULT_SUBSCRIBE_KEY.to_string(),
        }
    }
}

impl ClientConfig {
    /// Attach credentials to subscribe messages.
    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    /// Override the subscription keyword.
    pub fn with_subscribe_key(mut self, key: impl Into<String>) -> Self {
        self.subscribe_key = key.into();
        self
    }
}

struct ClientInner {
    call_transport: Arc<dyn CallTransport>,
    socket: MessageSocket,
    config: ClientConfig,
}

/// Handle to a remote handler tree. Cheaply cloneable; clones share the
/// transports and the lazily-opened message connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Build a client over the two transport halves.
    pub fn new(
        call_transport: Arc<dyn CallTransport>,
        message_transport: Arc<dyn MessageTransport>,
        config: ClientConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                call_transport,
                socket: MessageSocket::new(message_transport),
                config,
            }),
        }
    }

    /// Start a path at the given root segment.
    pub fn path(&self, segment: impl Into<String>) -> PathBuilder {
        PathBuilder {
            client: self.clone(),
            segments: vec![segment.into()],
        }
    }

    /// Start a path from a full segment list.
    pub fn at<I, S>(&self, segments: I) -> PathBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PathBuilder {
            client: self.clone(),
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }
}

/// A dotted path under construction.
#[derive(Clone)]
pub struct PathBuilder {
    client: Client,
    segments: Vec<String>,
}

impl PathBuilder {
    /// Append a segment.
    pub fn path(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// The accumulated segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Treat the path as a callable leaf. No request is sent until the
    /// returned call is awaited.
    pub fn call(self, args: Vec<Value>) -> DeferredCall {
        DeferredCall::new(
            self.client.inner.call_transport.clone(),
            RequestEnvelope::call(self.segments, args),
        )
    }

    /// Subscribe to the path over the message channel. The path must end
    /// with the configured subscribe keyword.
    ///
    /// The handler receives every event for this path, or a single
    /// [`EventError`] if the server rejects the subscription; after an error
    /// the listener is removed. Dropping the returned [`Subscription`]
    /// removes the local listener only.
    ///
    /// # Errors
    ///
    /// Fails on a malformed path or when the connection cannot be opened.
    pub async fn subscribe<F>(self, args: Vec<Value>, handler: F) -> Result<Subscription, CallError>
    where
        F: Fn(Result<Value, EventError>) + Send + Sync + 'static,
    {
        let config = &self.client.inner.config;
        if self.segments.last().map(String::as_str) != Some(config.subscribe_key.as_str()) {
            return Err(CallError::Usage(format!(
                "Subscription paths must end with \"{}\".",
                config.subscribe_key
            )));
        }

        self.client
            .inner
            .socket
            .subscribe(config.auth.clone(), self.segments, args, Arc::new(handler))
            .await
    }
}
