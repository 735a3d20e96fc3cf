//! Lazy single-flight calls.
//!
//! A [`DeferredCall`] is created cold: building it performs no I/O. The first
//! `value().await` fires the underlying request exactly once and caches the
//! outcome; later awaits, from any clone, return the cached result without
//! touching the transport again. Batch combinators use the same mechanism to
//! settle member calls from a combined response.

use std::sync::Arc;

use bytes::Bytes;
use rmpv::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::codec::MsgPackCodec;
use crate::server::envelope::RequestEnvelope;
use crate::transport::CallTransport;

/// Message used when an error response carries no usable payload.
pub const GENERIC_SERVER_ERROR: &str = "The server responded in error.";

/// A failed call, as seen by the client.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CallError {
    /// The server rejected the call; carries the server's message verbatim.
    #[error("{0}")]
    Server(String),
    /// The transport failed before a response was produced.
    #[error("transport error: {0}")]
    Transport(String),
    /// The call was built incorrectly on the client side.
    #[error("{0}")]
    Usage(String),
}

/// Client-side call outcome.
pub type CallResult = Result<Value, CallError>;

enum CallState {
    Idle,
    Settled(CallResult),
}

struct CallInner {
    transport: Arc<dyn CallTransport>,
    envelope: RequestEnvelope,
    state: Mutex<CallState>,
}

/// A call that fires on first await and then replays its settled outcome.
#[derive(Clone)]
pub struct DeferredCall {
    inner: Arc<CallInner>,
}

impl std::fmt::Debug for DeferredCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredCall")
            .field("envelope", &self.inner.envelope)
            .finish()
    }
}

/// Turn a raw transport response into a call outcome. Non-2xx statuses are
/// failures; the server's `{message}` payload becomes the error text.
pub(crate) fn interpret_response(status: u16, body: &Bytes) -> CallResult {
    let value = MsgPackCodec::decode_value(body)
        .map_err(|error| CallError::Transport(error.to_string()))?;

    if (200..300).contains(&status) {
        return Ok(value);
    }

    let message = match &value {
        Value::Map(entries) => entries
            .iter()
            .find(|(k, _)| k.as_str() == Some("message"))
            .and_then(|(_, v)| v.as_str())
            .map(str::to_string),
        _ => None,
    };
    Err(CallError::Server(
        message.unwrap_or_else(|| GENERIC_SERVER_ERROR.to_string()),
    ))
}

impl DeferredCall {
    pub(crate) fn new(transport: Arc<dyn CallTransport>, envelope: RequestEnvelope) -> Self {
        Self {
            inner: Arc::new(CallInner {
                transport,
                envelope,
                state: Mutex::new(CallState::Idle),
            }),
        }
    }

    /// The wire envelope this call would send.
    pub fn envelope(&self) -> &RequestEnvelope {
        &self.inner.envelope
    }

    pub(crate) fn transport(&self) -> Arc<dyn CallTransport> {
        self.inner.transport.clone()
    }

    /// Await the call's value, firing the request on first use.
    ///
    /// Holding the state lock across the exchange makes concurrent awaits of
    /// the same call collapse into one request.
    pub async fn value(&self) -> CallResult {
        let mut state = self.inner.state.lock().await;
        if let CallState::Settled(result) = &*state {
            return result.clone();
        }

        let result = self.fire().await;
        *state = CallState::Settled(result.clone());
        result
    }

    async fn fire(&self) -> CallResult {
        let body = MsgPackCodec::encode_value(&self.inner.envelope.to_value())
            .map_err(|error| CallError::Transport(error.to_string()))?;

        let (status, response) = self
            .inner
            .transport
            .post(Bytes::from(body))
            .await
            .map_err(|error| CallError::Transport(error.to_string()))?;

        interpret_response(status, &response)
    }

    /// Settle this call from the outside, as a batch does when distributing a
    /// combined response. A call that already fired keeps its own outcome.
    pub(crate) async fn settle(&self, result: CallResult) {
        let mut state = self.inner.state.lock().await;
        if let CallState::Idle = &*state {
            *state = CallState::Settled(result);
        }
    }
}
