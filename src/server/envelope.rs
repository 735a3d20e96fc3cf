//! Request and response envelopes.
//!
//! A request envelope is either a single call `{type: "call", path, args}`
//! or a batch `{type: <policy>, items: [...]}` whose items may themselves be
//! batches. Envelopes are validated shape-first, before any handler runs, so
//! malformed bodies never reach user code.

use rmpv::Value;

use crate::error::{CanopyError, Result};

/// Aggregation policy for a batch envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPolicy {
    /// Concurrent; first failure rejects the whole batch.
    All,
    /// Sequential; a failure stops later items and rejects the batch.
    AllSequential,
    /// Concurrent; never rejects, each item tagged fulfilled/rejected.
    AllSettled,
    /// Sequential; all items always run, each tagged fulfilled/rejected.
    AllSettledSequential,
}

impl BatchPolicy {
    /// Wire name of this policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchPolicy::All => "all",
            BatchPolicy::AllSequential => "allSequential",
            BatchPolicy::AllSettled => "allSettled",
            BatchPolicy::AllSettledSequential => "allSettledSequential",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "all" => Some(BatchPolicy::All),
            "allSequential" => Some(BatchPolicy::AllSequential),
            "allSettled" => Some(BatchPolicy::AllSettled),
            "allSettledSequential" => Some(BatchPolicy::AllSettledSequential),
            _ => None,
        }
    }

    /// Whether failures are captured per item instead of rejecting the batch.
    pub fn is_settled(&self) -> bool {
        matches!(self, BatchPolicy::AllSettled | BatchPolicy::AllSettledSequential)
    }

    /// Whether items run strictly one after another.
    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            BatchPolicy::AllSequential | BatchPolicy::AllSettledSequential
        )
    }
}

/// A parsed wire request: one call, or a nested batch of them.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestEnvelope {
    /// A single call to a path with positional arguments.
    Call {
        /// Non-empty sequence of non-empty segments.
        path: Vec<String>,
        /// Positional arguments.
        args: Vec<Value>,
    },
    /// A batch of envelopes under one aggregation policy.
    Batch {
        /// Aggregation policy.
        policy: BatchPolicy,
        /// May be empty, and may contain nested batches.
        items: Vec<RequestEnvelope>,
    },
}

fn parsing(message: &str) -> CanopyError {
    CanopyError::BodyParsing(format!("Could not parse body. {message}"))
}

fn map_get<'a>(entries: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    entries
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

impl RequestEnvelope {
    /// Shorthand for a single-call envelope.
    pub fn call(path: Vec<String>, args: Vec<Value>) -> Self {
        RequestEnvelope::Call { path, args }
    }

    /// Validate a decoded body value into an envelope.
    ///
    /// # Errors
    ///
    /// Returns a body-parsing error naming the first malformed field.
    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Map(entries) = value else {
            return Err(parsing("Body must be an object."));
        };

        let kind = map_get(entries, "type").and_then(Value::as_str).ok_or_else(|| {
            parsing(
                "Type must be one of the following: \
                 all, allSettled, allSequential, allSettledSequential, call.",
            )
        })?;

        if kind == "call" {
            let path = map_get(entries, "path")
                .and_then(Value::as_array)
                .and_then(|segments| {
                    segments
                        .iter()
                        .map(|segment| {
                            segment
                                .as_str()
                                .filter(|s| !s.is_empty())
                                .map(str::to_string)
                        })
                        .collect::<Option<Vec<String>>>()
                })
                .filter(|segments| !segments.is_empty())
                .ok_or_else(|| parsing("Path must be an array of strings."))?;

            let args = map_get(entries, "args")
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| parsing("Args must be an array."))?;

            return Ok(RequestEnvelope::Call { path, args });
        }

        let policy = BatchPolicy::from_str(kind).ok_or_else(|| {
            parsing(
                "Type must be one of the following: \
                 all, allSettled, allSequential, allSettledSequential, call.",
            )
        })?;

        let items = map_get(entries, "items")
            .and_then(Value::as_array)
            .ok_or_else(|| parsing("Nested items are missing or malformed."))?
            .iter()
            .map(RequestEnvelope::from_value)
            .collect::<Result<Vec<_>>>()
            .map_err(|_| parsing("Nested items are missing or malformed."))?;

        Ok(RequestEnvelope::Batch { policy, items })
    }

    /// Encode this envelope as a wire value.
    pub fn to_value(&self) -> Value {
        match self {
            RequestEnvelope::Call { path, args } => Value::Map(vec![
                (Value::from("type"), Value::from("call")),
                (
                    Value::from("path"),
                    Value::Array(path.iter().map(|s| Value::from(s.as_str())).collect()),
                ),
                (Value::from("args"), Value::Array(args.clone())),
            ]),
            RequestEnvelope::Batch { policy, items } => Value::Map(vec![
                (Value::from("type"), Value::from(policy.as_str())),
                (
                    Value::from("items"),
                    Value::Array(items.iter().map(RequestEnvelope::to_value).collect()),
                ),
            ]),
        }
    }
}

/// A normalized server response: payload plus transport status and headers.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Response payload.
    pub data: Value,
    /// HTTP status.
    pub status: u16,
    /// Extra response headers.
    pub headers: Vec<(String, String)>,
}

impl Response {
    /// A 200 response carrying the given data.
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            status: 200,
            headers: Vec::new(),
        }
    }

    /// An error response: `{message}` payload with the given status.
    pub fn error(status: u16, message: &str) -> Self {
        Self {
            data: Value::Map(vec![(Value::from("message"), Value::from(message))]),
            status,
            headers: Vec::new(),
        }
    }
}
