//! Transport collaborator interfaces.
//!
//! The client core never talks to a network directly. It drives a
//! [`CallTransport`] for unary calls (one packed body out, one status plus
//! packed body back) and a [`MessageTransport`] for the persistent
//! subscription channel (a bidirectional stream of packed frames). Concrete
//! HTTP or socket bindings implement these traits; [`LocalTransport`] wires
//! both directly to an in-process handler tree, which is also how the
//! integration tests exercise the full stack without a network.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::app::{App, BoxFuture};
use crate::context::HttpRequest;
use crate::error::Result;
use crate::server::broker::{BrokerConfig, SubscriptionBroker};
use crate::server::http::handle_http;

/// Unary call transport: posts one packed request body and yields the
/// response status plus packed response body.
pub trait CallTransport: Send + Sync + 'static {
    /// Perform one request/response exchange.
    fn post(&self, body: Bytes) -> BoxFuture<'static, Result<(u16, Bytes)>>;
}

/// One established message channel. Frames pushed into `outbound` travel to
/// the server; frames the server emits arrive on `inbound`. Dropping the
/// connection closes both directions.
pub struct MessageConnection {
    /// Client-to-server frames.
    pub outbound: mpsc::UnboundedSender<Bytes>,
    /// Server-to-client frames.
    pub inbound: mpsc::UnboundedReceiver<Bytes>,
}

/// Message channel transport: establishes persistent bidirectional
/// connections for the subscription protocol.
pub trait MessageTransport: Send + Sync + 'static {
    /// Open a new connection.
    fn connect(&self) -> BoxFuture<'static, Result<MessageConnection>>;
}

/// In-process transport serving a handler tree directly.
///
/// Unary calls run through the HTTP surface; message connections get their
/// own [`SubscriptionBroker`] on a spawned task, torn down when the client
/// side drops its sender.
#[derive(Clone)]
pub struct LocalTransport {
    tree: App,
    broker_config: BrokerConfig,
}

impl LocalTransport {
    /// Serve the given tree with default configuration.
    pub fn new(tree: App) -> Self {
        Self {
            tree,
            broker_config: BrokerConfig::default(),
        }
    }

    /// Override the broker configuration for message connections.
    pub fn with_broker_config(mut self, config: BrokerConfig) -> Self {
        self.broker_config = config;
        self
    }
}

impl CallTransport for LocalTransport {
    fn post(&self, body: Bytes) -> BoxFuture<'static, Result<(u16, Bytes)>> {
        let tree = self.tree.clone();
        Box::pin(async move {
            let response = handle_http(&tree, HttpRequest::post(body)).await;
            Ok((response.status, response.body))
        })
    }
}

impl MessageTransport for LocalTransport {
    fn connect(&self) -> BoxFuture<'static, Result<MessageConnection>> {
        let tree = self.tree.clone();
        let config = self.broker_config.clone();
        Box::pin(async move {
            let (client_tx, mut server_rx) = mpsc::unbounded_channel::<Bytes>();
            let (server_tx, client_rx) = mpsc::unbounded_channel::<Bytes>();

            tokio::spawn(async move {
                let broker = SubscriptionBroker::new(tree, server_tx, config);
                while let Some(frame) = server_rx.recv().await {
                    broker.handle_message(&frame).await;
                }
                // Sender side dropped; tear active subscriptions down.
                broker.close();
            });

            Ok(MessageConnection {
                outbound: client_tx,
                inbound: client_rx,
            })
        })
    }
}
