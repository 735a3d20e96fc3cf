//! Client-side batch combinators.
//!
//! A batch takes unfired [`DeferredCall`]s, sends ONE combined request for
//! all of them, and distributes the per-item results back so each member call
//! settles as if it had been fired alone. Members that were already awaited
//! keep their own outcome. An empty batch resolves immediately with no
//! request at all.
//!
//! [`all`] and [`all_sequential`] reject on the first member failure;
//! [`all_settled`] and [`all_settled_sequential`] always resolve, tagging
//! every member as fulfilled or rejected.

use rmpv::Value;

use crate::client::call::{CallError, DeferredCall, GENERIC_SERVER_ERROR};
use crate::server::envelope::{BatchPolicy, RequestEnvelope};

/// Per-member outcome of a settled batch.
#[derive(Debug, Clone, PartialEq)]
pub enum SettledValue {
    /// The member call succeeded with this value.
    Fulfilled(Value),
    /// The member call failed.
    Rejected(CallError),
}

impl SettledValue {
    /// The fulfilled value, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            SettledValue::Fulfilled(value) => Some(value),
            SettledValue::Rejected(_) => None,
        }
    }

    /// The rejection error, if any.
    pub fn error(&self) -> Option<&CallError> {
        match self {
            SettledValue::Fulfilled(_) => None,
            SettledValue::Rejected(error) => Some(error),
        }
    }
}

fn combine(policy: BatchPolicy, members: &[DeferredCall]) -> Option<DeferredCall> {
    let first = members.first()?;
    let envelope = RequestEnvelope::Batch {
        policy,
        items: members.iter().map(|call| call.envelope().clone()).collect(),
    };
    Some(DeferredCall::new(first.transport(), envelope))
}

/// An all-or-nothing batch. The server runs members under the given policy
/// and the whole batch fails on the first member failure.
pub struct Batch {
    members: Vec<DeferredCall>,
    combined: Option<DeferredCall>,
}

/// Concurrent all-or-nothing batch.
pub fn all(calls: Vec<DeferredCall>) -> Batch {
    Batch::new(BatchPolicy::All, calls)
}

/// Sequential all-or-nothing batch; later members do not run after a failure.
pub fn all_sequential(calls: Vec<DeferredCall>) -> Batch {
    Batch::new(BatchPolicy::AllSequential, calls)
}

impl Batch {
    fn new(policy: BatchPolicy, members: Vec<DeferredCall>) -> Self {
        let combined = combine(policy, &members);
        Self { members, combined }
    }

    /// The combined call, for nesting this batch inside another one. `None`
    /// when the batch is empty.
    pub fn as_call(&self) -> Option<&DeferredCall> {
        self.combined.as_ref()
    }

    /// Fire the combined request and yield every member's value in order.
    ///
    /// # Errors
    ///
    /// The first member failure, with the server's message verbatim. All
    /// members settle with that same failure.
    pub async fn values(&self) -> Result<Vec<Value>, CallError> {
        let Some(combined) = &self.combined else {
            return Ok(Vec::new());
        };

        match combined.value().await {
            Ok(Value::Array(entries)) if entries.len() == self.members.len() => {
                for (member, entry) in self.members.iter().zip(&entries) {
                    member.settle(Ok(entry.clone())).await;
                }
                Ok(entries)
            }
            Ok(_) => {
                let error = CallError::Transport("malformed batch response".to_string());
                for member in &self.members {
                    member.settle(Err(error.clone())).await;
                }
                Err(error)
            }
            Err(error) => {
                for member in &self.members {
                    member.settle(Err(error.clone())).await;
                }
                Err(error)
            }
        }
    }
}

/// A batch that always resolves, reporting each member individually.
pub struct SettledBatch {
    members: Vec<DeferredCall>,
    combined: Option<DeferredCall>,
}

/// Concurrent settled batch.
pub fn all_settled(calls: Vec<DeferredCall>) -> SettledBatch {
    SettledBatch::new(BatchPolicy::AllSettled, calls)
}

/// Sequential settled batch; every member runs even after failures.
pub fn all_settled_sequential(calls: Vec<DeferredCall>) -> SettledBatch {
    SettledBatch::new(BatchPolicy::AllSettledSequential, calls)
}

fn parse_settled_entry(entry: &Value) -> SettledValue {
    let Value::Map(fields) = entry else {
        return SettledValue::Rejected(CallError::Transport(
            "malformed batch response entry".to_string(),
        ));
    };
    let get = |key: &str| {
        fields
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    };

    match get("status").and_then(Value::as_str) {
        Some("fulfilled") => {
            SettledValue::Fulfilled(get("value").cloned().unwrap_or(Value::Nil))
        }
        Some("rejected") => {
            let message = get("reason")
                .and_then(|reason| match reason {
                    Value::Map(entries) => entries
                        .iter()
                        .find(|(k, _)| k.as_str() == Some("message"))
                        .and_then(|(_, v)| v.as_str()),
                    _ => None,
                })
                .unwrap_or(GENERIC_SERVER_ERROR);
            SettledValue::Rejected(CallError::Server(message.to_string()))
        }
        _ => SettledValue::Rejected(CallError::Transport(
            "malformed batch response entry".to_string(),
        )),
    }
}

impl SettledBatch {
    fn new(policy: BatchPolicy, members: Vec<DeferredCall>) -> Self {
        let combined = combine(policy, &members);
        Self { members, combined }
    }

    /// The combined call, for nesting. `None` when the batch is empty.
    pub fn as_call(&self) -> Option<&DeferredCall> {
        self.combined.as_ref()
    }

    /// Fire the combined request and yield each member's tagged outcome.
    ///
    /// # Errors
    ///
    /// Only when the combined exchange itself fails; member failures are
    /// reported inside the returned vector.
    pub async fn values(&self) -> Result<Vec<SettledValue>, CallError> {
        let Some(combined) = &self.combined else {
            return Ok(Vec::new());
        };

        match combined.value().await {
            Ok(Value::Array(entries)) if entries.len() == self.members.len() => {
                let mut outcomes = Vec::with_capacity(entries.len());
                for (member, entry) in self.members.iter().zip(&entries) {
                    let outcome = parse_settled_entry(entry);
                    member
                        .settle(match &outcome {
                            SettledValue::Fulfilled(value) => Ok(value.clone()),
                            SettledValue::Rejected(error) => Err(error.clone()),
                        })
                        .await;
                    outcomes.push(outcome);
                }
                Ok(outcomes)
            }
            Ok(_) => Err(CallError::Transport(
                "malformed batch response".to_string(),
            )),
            Err(error) => {
                for member in &self.members {
                    member.settle(Err(error.clone())).await;
                }
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{handler, namespace, App, BoxFuture};
    use crate::error::{CanopyError, Result};
    use crate::transport::{CallTransport, LocalTransport};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts exchanges on the way through to an inner transport.
    struct CountingTransport {
        inner: Arc<dyn CallTransport>,
        posts: Arc<AtomicUsize>,
    }

    impl CallTransport for CountingTransport {
        fn post(&self, body: Bytes) -> BoxFuture<'static, Result<(u16, Bytes)>> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            self.inner.post(body)
        }
    }

    fn math_tree() -> App {
        namespace([
            (
                "double",
                handler(|args: Vec<Value>| async move {
                    let n = args
                        .first()
                        .and_then(Value::as_i64)
                        .ok_or_else(|| CanopyError::handler("Expected a number."))?;
                    Ok(Value::from(n * 2))
                }),
            ),
            (
                "fail",
                handler(|_args: Vec<Value>| async {
                    Err::<Value, _>(CanopyError::handler("Nope."))
                }),
            ),
        ])
    }

    fn counted_transport() -> (Arc<dyn CallTransport>, Arc<AtomicUsize>) {
        let posts = Arc::new(AtomicUsize::new(0));
        let transport: Arc<dyn CallTransport> = Arc::new(CountingTransport {
            inner: Arc::new(LocalTransport::new(math_tree())),
            posts: posts.clone(),
        });
        (transport, posts)
    }

    fn double_call(transport: &Arc<dyn CallTransport>, n: i64) -> DeferredCall {
        DeferredCall::new(
            transport.clone(),
            RequestEnvelope::call(vec!["double".into()], vec![Value::from(n)]),
        )
    }

    fn fail_call(transport: &Arc<dyn CallTransport>) -> DeferredCall {
        DeferredCall::new(
            transport.clone(),
            RequestEnvelope::call(vec!["fail".into()], vec![]),
        )
    }

    #[tokio::test]
    async fn test_all_sends_one_request_and_keeps_order() {
        let (transport, posts) = counted_transport();
        let calls = vec![
            double_call(&transport, 1),
            double_call(&transport, 2),
            double_call(&transport, 3),
        ];

        let batch = all(calls.clone());
        let values = batch.values().await.unwrap();

        assert_eq!(
            values,
            vec![Value::from(2), Value::from(4), Value::from(6)]
        );
        assert_eq!(posts.load(Ordering::SeqCst), 1);

        // Members replay the distributed values without further requests.
        assert_eq!(calls[1].value().await.unwrap(), Value::from(4));
        assert_eq!(posts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_rejects_with_member_failure_message() {
        let (transport, _posts) = counted_transport();
        let calls = vec![double_call(&transport, 1), fail_call(&transport)];

        let batch = all(calls.clone());
        let err = batch.values().await.unwrap_err();
        assert_eq!(err, CallError::Server("Nope.".to_string()));

        // Every member settles with the batch failure.
        assert_eq!(calls[0].value().await.unwrap_err(), err);
    }

    #[tokio::test]
    async fn test_all_settled_reports_each_member() {
        let (transport, posts) = counted_transport();
        let calls = vec![double_call(&transport, 5), fail_call(&transport)];

        let batch = all_settled(calls.clone());
        let outcomes = batch.values().await.unwrap();

        assert_eq!(outcomes[0], SettledValue::Fulfilled(Value::from(10)));
        assert_eq!(
            outcomes[1],
            SettledValue::Rejected(CallError::Server("Nope.".to_string()))
        );
        assert_eq!(posts.load(Ordering::SeqCst), 1);

        assert_eq!(calls[0].value().await.unwrap(), Value::from(10));
        assert!(calls[1].value().await.is_err());
        assert_eq!(posts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_variants_share_the_distribution_logic() {
        let (transport, posts) = counted_transport();

        let batch = all_sequential(vec![
            double_call(&transport, 1),
            double_call(&transport, 2),
        ]);
        assert_eq!(
            batch.values().await.unwrap(),
            vec![Value::from(2), Value::from(4)]
        );

        let settled = all_settled_sequential(vec![
            fail_call(&transport),
            double_call(&transport, 3),
        ]);
        let outcomes = settled.values().await.unwrap();
        assert!(outcomes[0].error().is_some());
        assert_eq!(outcomes[1], SettledValue::Fulfilled(Value::from(6)));

        assert_eq!(posts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_batches_resolve_without_a_request() {
        let (_, posts) = counted_transport();

        assert_eq!(all(vec![]).values().await.unwrap(), Vec::<Value>::new());
        assert!(all_settled(vec![]).values().await.unwrap().is_empty());
        assert!(all(vec![]).as_call().is_none());
        assert_eq!(posts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batches_nest_through_as_call() {
        let (transport, posts) = counted_transport();

        let inner = all(vec![double_call(&transport, 1), double_call(&transport, 2)]);
        let outer = all(vec![
            inner.as_call().unwrap().clone(),
            double_call(&transport, 10),
        ]);

        let values = outer.values().await.unwrap();
        assert_eq!(
            values,
            vec![
                Value::Array(vec![Value::from(2), Value::from(4)]),
                Value::from(20),
            ]
        );

        // The inner batch's members settle off the nested entry.
        assert_eq!(
            inner.values().await.unwrap(),
            vec![Value::from(2), Value::from(4)]
        );
        assert_eq!(posts.load(Ordering::SeqCst), 1);
    }
}
