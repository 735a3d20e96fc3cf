//! Request dispatcher.
//!
//! Turns a decoded request envelope into a normalized [`Response`]: single
//! calls resolve through the handler tree and execute; batches dispatch their
//! items recursively and aggregate under the envelope's policy. Errors are
//! caught at this boundary and converted into `{message}` payloads with the
//! taxonomy's status; they are never retried and never escape to the
//! transport as panics.

use futures::future::{join_all, try_join_all};
use rmpv::Value;

use crate::app::{App, BoxFuture};
use crate::codec::MsgPackCodec;
use crate::context::Context;
use crate::error::{CanopyError, Result, GENERIC_FAILURE};
use crate::resolve::{resolve, Resolved};
use crate::server::envelope::{BatchPolicy, RequestEnvelope, Response};

/// Dispatch one envelope against the tree.
///
/// Batch responses carry a result array shaped like the request's nesting;
/// sub-result statuses and headers are not surfaced on the aggregate, only
/// each item's data (or, for settled policies, its fulfilled/rejected tag).
pub fn dispatch<'a>(
    tree: &'a App,
    envelope: &'a RequestEnvelope,
    context: &'a Context,
) -> BoxFuture<'a, Result<Response>> {
    Box::pin(async move {
        match envelope {
            RequestEnvelope::Call { path, args } => {
                let resolved = resolve(tree, path, context).await?;
                let handler = match resolved {
                    Resolved::Handler(handler) => handler,
                    // Channels and subscribe-style leaves are
                    // subscription-only surfaces.
                    Resolved::Channel(_) | Resolved::Subscription(_) => {
                        return Err(CanopyError::Path(format!(
                            "Path \"{}\" could not be found in the app.",
                            path.join(".")
                        )))
                    }
                };

                let reply = handler.call(args.clone()).await?;
                Ok(Response {
                    data: reply.data,
                    status: reply.status.unwrap_or(200),
                    headers: reply.headers,
                })
            }
            RequestEnvelope::Batch { policy, items } => {
                let data = dispatch_batch(tree, *policy, items, context).await?;
                Ok(Response::ok(data))
            }
        }
    })
}

async fn dispatch_batch(
    tree: &App,
    policy: BatchPolicy,
    items: &[RequestEnvelope],
    context: &Context,
) -> Result<Value> {
    let results: Vec<Value> = match policy {
        BatchPolicy::All => {
            // Concurrent; the first item to fail rejects the whole batch and
            // the other members' outcomes are dropped.
            try_join_all(items.iter().map(|item| dispatch(tree, item, context)))
                .await?
                .into_iter()
                .map(|response| response.data)
                .collect()
        }
        BatchPolicy::AllSequential => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                // Later items are never started after a failure.
                out.push(dispatch(tree, item, context).await?.data);
            }
            out
        }
        BatchPolicy::AllSettled => {
            join_all(items.iter().map(|item| dispatch(tree, item, context)))
                .await
                .into_iter()
                .map(settled_entry)
                .collect()
        }
        BatchPolicy::AllSettledSequential => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(settled_entry(dispatch(tree, item, context).await));
            }
            out
        }
    };

    Ok(Value::Array(results))
}

fn settled_entry(result: Result<Response>) -> Value {
    match result {
        Ok(response) => Value::Map(vec![
            (Value::from("status"), Value::from("fulfilled")),
            (Value::from("value"), response.data),
        ]),
        Err(error) => Value::Map(vec![
            (Value::from("status"), Value::from("rejected")),
            (
                Value::from("reason"),
                Value::Map(vec![(
                    Value::from("message"),
                    Value::from(error.to_string().as_str()),
                )]),
            ),
        ]),
    }
}

/// Handle a raw packed request body end to end: decode, validate, dispatch,
/// and convert any failure into its taxonomy response.
pub async fn handle(tree: &App, body: &[u8], context: &Context) -> Response {
    let value = match MsgPackCodec::decode_value(body) {
        Ok(value) => value,
        Err(error) => {
            tracing::debug!("undecodable request body: {error}");
            return Response::error(400, "Could not parse body.");
        }
    };

    let envelope = match RequestEnvelope::from_value(&value) {
        Ok(envelope) => envelope,
        Err(error) => return Response::error(error.status(), &error.to_string()),
    };

    match dispatch(tree, &envelope, context).await {
        Ok(response) => response,
        Err(error) => {
            let message = error.to_string();
            let message = if message.is_empty() {
                GENERIC_FAILURE
            } else {
                message.as_str()
            };
            Response::error(error.status(), message)
        }
    }
}
