//! Per-connection subscription broker.
//!
//! One broker instance owns the handler tree view and the active
//! subscriptions for a single persistent connection. Inbound packed
//! `subscribe` messages resolve through the tree under a message context;
//! matching channels (or subscribe-style leaves) get a sink that packs
//! `{type: "event", path, message}` frames back onto the connection.
//! Resolution or installation failures answer with an `error`-typed message
//! scoped to the originating path; the connection stays open. Subscribe
//! attempts that reach a non-subscribable node are ignored outright, so
//! probing cannot map the tree.
//!
//! On connection close, [`SubscriptionBroker::close`] tears every stored
//! subscription down exactly once.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rmpv::Value;
use tokio::sync::mpsc;

use crate::app::{App, EventSink};
use crate::codec::MsgPackCodec;
use crate::context::Context;
use crate::error::CanopyError;
use crate::resolve::{resolve, Resolved};
use crate::subject::Subscription;

/// Default trailing path segment marking a subscription call.
pub const DEFAULT_SUBSCRIBE_KEY: &str = "subscribe";

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Trailing path segment that distinguishes a subscription-capable leaf.
    /// Messages whose last segment differs are ignored by the broker.
    pub subscribe_key: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            subscribe_key: DEFAULT_SUBSCRIBE_KEY.to_string(),
        }
    }
}

/// Subscription protocol endpoint for one connection.
pub struct SubscriptionBroker {
    tree: App,
    config: BrokerConfig,
    outbound: mpsc::UnboundedSender<Bytes>,
    subscriptions: Mutex<Vec<Subscription>>,
}

fn parsing(message: &str) -> CanopyError {
    CanopyError::BodyParsing(format!("Could not parse body. {message}"))
}

fn event_frame(path: &Value, message: Value) -> Value {
    Value::Map(vec![
        (Value::from("type"), Value::from("event")),
        (Value::from("path"), path.clone()),
        (Value::from("message"), message),
    ])
}

fn error_frame(path: &Value, error: &CanopyError) -> Value {
    Value::Map(vec![
        (Value::from("type"), Value::from("error")),
        (Value::from("path"), path.clone()),
        (
            Value::from("message"),
            Value::Map(vec![
                (
                    Value::from("message"),
                    Value::from(error.to_string().as_str()),
                ),
                (Value::from("name"), Value::from(error.name())),
            ]),
        ),
    ])
}

impl SubscriptionBroker {
    /// Create a broker for one connection. Outbound frames are packed and
    /// pushed onto `outbound`; the surrounding transport drains them onto
    /// the wire.
    pub fn new(tree: App, outbound: mpsc::UnboundedSender<Bytes>, config: BrokerConfig) -> Self {
        Self {
            tree,
            config,
            outbound,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    fn send_frame(&self, frame: &Value) {
        match MsgPackCodec::encode_value(frame) {
            Ok(bytes) => {
                if self.outbound.send(Bytes::from(bytes)).is_err() {
                    tracing::debug!("connection gone, dropping outbound frame");
                }
            }
            Err(error) => tracing::error!("failed to encode outbound frame: {error}"),
        }
    }

    fn send_error(&self, path: &Value, error: &CanopyError) {
        self.send_frame(&error_frame(path, error));
    }

    /// Process one inbound packed message.
    pub async fn handle_message(&self, bytes: &[u8]) {
        let value = match MsgPackCodec::decode_value(bytes) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!("undecodable subscription message: {error}");
                return;
            }
        };

        let entries = match &value {
            Value::Map(entries) => entries.as_slice(),
            _ => {
                tracing::warn!("subscription message is not a map");
                return;
            }
        };

        let raw_path = entries
            .iter()
            .find(|(k, _)| k.as_str() == Some("path"))
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Array(vec![]));

        if let Err(error) = self.handle_subscribe(entries, &raw_path).await {
            self.send_error(&raw_path, &error);
        }
    }

    async fn handle_subscribe(
        &self,
        entries: &[(Value, Value)],
        raw_path: &Value,
    ) -> Result<(), CanopyError> {
        let get = |key: &str| {
            entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v)
        };

        let kind = get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| parsing("`type` must be a string."))?;

        let auth = match get("auth") {
            None | Some(Value::Nil) => None,
            Some(value) => Some(
                value
                    .as_str()
                    .ok_or_else(|| parsing("`auth` must be a string or undefined."))?
                    .to_string(),
            ),
        };

        let path: Vec<String> = get("path")
            .and_then(Value::as_array)
            .and_then(|segments| {
                segments
                    .iter()
                    .map(|segment| segment.as_str().map(str::to_string))
                    .collect::<Option<Vec<String>>>()
            })
            .filter(|segments| !segments.is_empty())
            .ok_or_else(|| parsing("`path` must be an array of strings."))?;

        let args = get("args")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| parsing("Args must be an array."))?;

        // Over a message-oriented connection only the subscription protocol
        // applies; anything else is not ours to answer.
        if kind != "subscribe" {
            return Ok(());
        }
        if path.last().map(String::as_str) != Some(self.config.subscribe_key.as_str()) {
            return Ok(());
        }

        let context = Context::message(auth);
        let resolved = resolve(&self.tree, &path, &context).await?;

        let sink = self.event_sink(raw_path.clone());
        let subscription = match resolved {
            Resolved::Channel(subject) => {
                subject.subscribe(move |message: Value| sink(message))
            }
            Resolved::Subscription(subscriber) => subscriber.subscribe(args, sink).await?,
            // Not a subscribable leaf; ignore without revealing tree shape.
            Resolved::Handler(_) => return Ok(()),
        };

        self.subscriptions.lock().push(subscription);
        Ok(())
    }

    fn event_sink(&self, path: Value) -> EventSink {
        let outbound = self.outbound.clone();
        Arc::new(move |message: Value| {
            let frame = event_frame(&path, message);
            match MsgPackCodec::encode_value(&frame) {
                Ok(bytes) => {
                    let _ = outbound.send(Bytes::from(bytes));
                }
                Err(error) => tracing::error!("failed to encode event frame: {error}"),
            }
        })
    }

    /// Number of live subscriptions held for this connection.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Tear down every stored subscription. Invoked on connection close;
    /// safe to call more than once, each teardown runs exactly once.
    pub fn close(&self) {
        let drained: Vec<Subscription> = self.subscriptions.lock().drain(..).collect();
        drop(drained);
    }
}

impl Drop for SubscriptionBroker {
    fn drop(&mut self) {
        self.close();
    }
}
