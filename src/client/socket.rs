//! Client side of the message channel.
//!
//! One [`MessageSocket`] multiplexes every subscription over a single
//! connection, opened lazily on the first subscribe. A background task demuxes
//! inbound frames to listeners by exact path match; an `error` frame delivers
//! the failure to its listeners and then drops them, since the server never
//! installed anything for that path. Unsubscribing removes the local listener
//! only, which mirrors how the connection-scoped broker cleans up on close.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex as SyncMutex;
use rmpv::Value;
use tokio::sync::Mutex;

use crate::client::call::CallError;
use crate::codec::MsgPackCodec;
use crate::subject::Subscription;
use crate::transport::MessageTransport;

/// A server-reported subscription failure, delivered to the listener.
#[derive(Debug, Clone, PartialEq)]
pub struct EventError {
    /// Error class name ("PathError", "Error", ...).
    pub name: String,
    /// Human-readable message.
    pub message: String,
}

type EventHandler = Arc<dyn Fn(Result<Value, EventError>) + Send + Sync>;

struct Listener {
    id: u64,
    path: Value,
    handler: EventHandler,
}

struct Shared {
    outbound: tokio::sync::mpsc::UnboundedSender<Bytes>,
    listeners: Arc<SyncMutex<Vec<Listener>>>,
    next_id: u64,
}

/// Lazily-connected subscription multiplexer.
pub(crate) struct MessageSocket {
    transport: Arc<dyn MessageTransport>,
    shared: Mutex<Option<Shared>>,
}

fn frame_field<'a>(entries: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    entries
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

fn parse_event_error(message: Option<&Value>) -> EventError {
    let fields = match message {
        Some(Value::Map(fields)) => fields.as_slice(),
        _ => &[],
    };
    EventError {
        name: frame_field(fields, "name")
            .and_then(Value::as_str)
            .unwrap_or("Error")
            .to_string(),
        message: frame_field(fields, "message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

fn demux_frame(listeners: &Arc<SyncMutex<Vec<Listener>>>, frame: &Bytes) {
    let value = match MsgPackCodec::decode_value(frame) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!("undecodable inbound frame: {error}");
            return;
        }
    };
    let Value::Map(entries) = &value else {
        tracing::warn!("inbound frame is not a map");
        return;
    };

    let Some(kind) = frame_field(entries, "type").and_then(Value::as_str) else {
        return;
    };
    let Some(path) = frame_field(entries, "path") else {
        return;
    };
    let message = frame_field(entries, "message");

    let matching: Vec<EventHandler> = listeners
        .lock()
        .iter()
        .filter(|listener| &listener.path == path)
        .map(|listener| listener.handler.clone())
        .collect();

    match kind {
        "event" => {
            let payload = message.cloned().unwrap_or(Value::Nil);
            for handler in matching {
                handler(Ok(payload.clone()));
            }
        }
        "error" => {
            // The server installed nothing for this path; the listeners are
            // dead weight after delivery.
            let error = parse_event_error(message);
            for handler in &matching {
                handler(Err(error.clone()));
            }
            listeners.lock().retain(|listener| &listener.path != path);
        }
        other => tracing::debug!("ignoring inbound frame of type {other:?}"),
    }
}

impl MessageSocket {
    pub(crate) fn new(transport: Arc<dyn MessageTransport>) -> Self {
        Self {
            transport,
            shared: Mutex::new(None),
        }
    }

    /// Send a subscribe message and register a listener for its path.
    ///
    /// The returned [`Subscription`] removes the local listener only; the
    /// server releases its side when the connection closes.
    pub(crate) async fn subscribe(
        &self,
        auth: Option<String>,
        path: Vec<String>,
        args: Vec<Value>,
        handler: EventHandler,
    ) -> Result<Subscription, CallError> {
        let mut shared = self.shared.lock().await;
        if shared.is_none() {
            let mut connection = self
                .transport
                .connect()
                .await
                .map_err(|error| CallError::Transport(error.to_string()))?;

            let listeners: Arc<SyncMutex<Vec<Listener>>> = Arc::new(SyncMutex::new(Vec::new()));
            let demux_listeners = listeners.clone();
            tokio::spawn(async move {
                while let Some(frame) = connection.inbound.recv().await {
                    demux_frame(&demux_listeners, &frame);
                }
            });

            *shared = Some(Shared {
                outbound: connection.outbound,
                listeners,
                next_id: 0,
            });
        }

        let Some(state) = shared.as_mut() else {
            return Err(CallError::Transport("connection closed".to_string()));
        };
        let path_value = Value::Array(path.iter().map(|s| Value::from(s.as_str())).collect());

        let mut frame = vec![(Value::from("type"), Value::from("subscribe"))];
        if let Some(auth) = auth {
            frame.push((Value::from("auth"), Value::from(auth.as_str())));
        }
        frame.push((Value::from("path"), path_value.clone()));
        frame.push((Value::from("args"), Value::Array(args)));

        let packed = MsgPackCodec::encode_value(&Value::Map(frame))
            .map_err(|error| CallError::Transport(error.to_string()))?;
        state
            .outbound
            .send(Bytes::from(packed))
            .map_err(|_| CallError::Transport("connection closed".to_string()))?;

        let id = state.next_id;
        state.next_id += 1;
        state.listeners.lock().push(Listener {
            id,
            path: path_value,
            handler,
        });

        let listeners = state.listeners.clone();
        Ok(Subscription::new(move || {
            listeners.lock().retain(|listener| listener.id != id);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listeners_with(paths: &[&[&str]]) -> Arc<SyncMutex<Vec<Listener>>> {
        let listeners = paths
            .iter()
            .enumerate()
            .map(|(id, path)| Listener {
                id: id as u64,
                path: Value::Array(path.iter().map(|s| Value::from(*s)).collect()),
                handler: Arc::new(|_| {}),
            })
            .collect();
        Arc::new(SyncMutex::new(listeners))
    }

    fn packed(frame: Value) -> Bytes {
        Bytes::from(MsgPackCodec::encode_value(&frame).unwrap())
    }

    #[test]
    fn test_event_frame_reaches_matching_listener_only() {
        let listeners = listeners_with(&[&["a", "subscribe"], &["b", "subscribe"]]);
        let seen = Arc::new(SyncMutex::new(Vec::new()));

        let inner = seen.clone();
        listeners.lock()[0].handler = Arc::new(move |result| {
            inner.lock().push(result);
        });

        demux_frame(
            &listeners,
            &packed(Value::Map(vec![
                (Value::from("type"), Value::from("event")),
                (
                    Value::from("path"),
                    Value::Array(vec![Value::from("a"), Value::from("subscribe")]),
                ),
                (Value::from("message"), Value::from(1)),
            ])),
        );

        assert_eq!(*seen.lock(), vec![Ok(Value::from(1))]);
        assert_eq!(listeners.lock().len(), 2, "event frames never evict");
    }

    #[test]
    fn test_error_frame_delivers_and_evicts() {
        let listeners = listeners_with(&[&["a", "subscribe"], &["b", "subscribe"]]);
        let seen = Arc::new(SyncMutex::new(Vec::new()));

        let inner = seen.clone();
        listeners.lock()[0].handler = Arc::new(move |result| {
            inner.lock().push(result);
        });

        demux_frame(
            &listeners,
            &packed(Value::Map(vec![
                (Value::from("type"), Value::from("error")),
                (
                    Value::from("path"),
                    Value::Array(vec![Value::from("a"), Value::from("subscribe")]),
                ),
                (
                    Value::from("message"),
                    Value::Map(vec![
                        (Value::from("message"), Value::from("denied")),
                        (Value::from("name"), Value::from("Error")),
                    ]),
                ),
            ])),
        );

        assert_eq!(
            *seen.lock(),
            vec![Err(EventError {
                name: "Error".to_string(),
                message: "denied".to_string(),
            })]
        );
        assert_eq!(listeners.lock().len(), 1, "failed path evicted");
    }

    #[test]
    fn test_unknown_and_garbage_frames_are_ignored() {
        let listeners = listeners_with(&[&["a", "subscribe"]]);

        demux_frame(&listeners, &Bytes::from_static(&[0xc1]));
        demux_frame(
            &listeners,
            &packed(Value::Map(vec![(
                Value::from("type"),
                Value::from("heartbeat"),
            )])),
        );

        assert_eq!(listeners.lock().len(), 1);
    }
}
