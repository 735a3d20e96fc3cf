//! Handler tree model.
//!
//! An [`App`] is the recursive structure a server exposes: callable leaves,
//! nested namespaces, broadcast channels, and two wrapper kinds: lazily
//! loaded sub-trees and access-guarded sub-trees. Everything else in the
//! crate operates over this shape.
//!
//! # Example
//!
//! ```
//! use canopy_rpc::app::{handler, namespace, App, Reply};
//! use rmpv::Value;
//!
//! let app: App = namespace([
//!     ("ping", handler(|_args: Vec<Value>| async { Ok(Value::from("pong")) })),
//!     (
//!         "artists",
//!         namespace([("count", handler(|_args| async { Ok(Value::from(3)) }))]),
//!     ),
//! ]);
//! ```
//!
//! Factories behind [`lazy`] and [`guard`] run once per resolution, with no
//! caching by the resolver; they are expected to be idempotent. They must not
//! produce a node that leads back to an ancestor: trees are assumed acyclic,
//! and the resolver does not detect cycles at runtime.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use rmpv::Value;

use crate::context::Context;
use crate::error::Result;
use crate::subject::{Subject, Subscription};

/// Boxed future, the crate's handler-return currency.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Sink a subscribe-style handler emits events into.
pub type EventSink = Arc<dyn Fn(Value) + Send + Sync>;

/// A handler's response: data plus optional explicit status and headers.
///
/// Plain values convert into a `Reply` with no explicit status; the
/// dispatcher fills in 200.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Response payload.
    pub data: Value,
    /// Explicit HTTP status, if the handler set one.
    pub status: Option<u16>,
    /// Extra response headers.
    pub headers: Vec<(String, String)>,
}

impl Reply {
    /// Reply carrying the given data with default status.
    pub fn new(data: impl Into<Value>) -> Self {
        Self {
            data: data.into(),
            status: None,
            headers: Vec::new(),
        }
    }

    /// Attach an explicit HTTP status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach a response header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl From<Value> for Reply {
    fn from(data: Value) -> Self {
        Reply::new(data)
    }
}

/// A callable leaf. Receives the call's ordered arguments.
pub trait Handler: Send + Sync + 'static {
    /// Execute the handler with positional arguments.
    fn call(&self, args: Vec<Value>) -> BoxFuture<'static, Result<Reply>>;
}

/// Factory behind a lazily-loaded sub-tree. Invoked with no arguments, once
/// per resolution that traverses it.
pub trait LazyFactory: Send + Sync + 'static {
    /// Produce the wrapped node.
    fn load(&self) -> BoxFuture<'static, Result<App>>;
}

/// Factory behind an access-guarded sub-tree. Evaluated fresh on every
/// request; failing denies access.
pub trait GuardFactory: Send + Sync + 'static {
    /// Produce the wrapped node, or fail with access denied.
    fn evaluate(&self, context: Context) -> BoxFuture<'static, Result<App>>;
}

/// A subscribe-style leaf: called with the subscribe message's arguments and
/// an event sink, it installs a subscription and returns its teardown handle.
pub trait SubscribeHandler: Send + Sync + 'static {
    /// Install the subscription.
    fn subscribe(&self, args: Vec<Value>, sink: EventSink)
        -> BoxFuture<'static, Result<Subscription>>;
}

/// A node in the handler tree.
///
/// Resolution must always terminate in a `Handler`, `Channel`, or
/// `Subscription` leaf; a bare `Namespace` or unresolved wrapper at the end
/// of a path is a resolution failure.
#[derive(Clone)]
pub enum App {
    /// A callable function leaf.
    Handler(Arc<dyn Handler>),
    /// A mapping from string key to child node.
    Namespace(HashMap<String, App>),
    /// A broadcast channel, reachable over the subscription protocol only.
    Channel(Subject<Value>),
    /// A lazily-loaded sub-tree.
    Lazy(Arc<dyn LazyFactory>),
    /// An access-guarded sub-tree.
    Guarded(Arc<dyn GuardFactory>),
    /// A subscribe-style callable leaf.
    Subscription(Arc<dyn SubscribeHandler>),
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            App::Handler(_) => f.write_str("App::Handler"),
            App::Namespace(map) => f.debug_map().entries(map.iter().map(|(k, _)| (k, ".."))).finish(),
            App::Channel(_) => f.write_str("App::Channel"),
            App::Lazy(_) => f.write_str("App::Lazy"),
            App::Guarded(_) => f.write_str("App::Guarded"),
            App::Subscription(_) => f.write_str("App::Subscription"),
        }
    }
}

struct FnHandler<F, Fut, R> {
    f: F,
    _marker: PhantomData<fn() -> (Fut, R)>,
}

impl<F, Fut, R> Handler for FnHandler<F, Fut, R>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: Into<Reply> + Send + 'static,
{
    fn call(&self, args: Vec<Value>) -> BoxFuture<'static, Result<Reply>> {
        let fut = (self.f)(args);
        Box::pin(async move { fut.await.map(Into::into) })
    }
}

/// Wrap an async closure as a callable leaf.
pub fn handler<F, Fut, R>(f: F) -> App
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: Into<Reply> + Send + 'static,
{
    App::Handler(Arc::new(FnHandler {
        f,
        _marker: PhantomData,
    }))
}

/// Build a namespace node from key/child pairs. Keys are unique; later
/// duplicates overwrite earlier ones.
pub fn namespace<I, K>(entries: I) -> App
where
    I: IntoIterator<Item = (K, App)>,
    K: Into<String>,
{
    App::Namespace(
        entries
            .into_iter()
            .map(|(key, node)| (key.into(), node))
            .collect(),
    )
}

/// Expose a broadcast channel as a tree node.
pub fn channel(subject: Subject<Value>) -> App {
    App::Channel(subject)
}

struct FnLazy<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> LazyFactory for FnLazy<F, Fut>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<App>> + Send + 'static,
{
    fn load(&self) -> BoxFuture<'static, Result<App>> {
        Box::pin((self.f)())
    }
}

/// Wrap a no-argument async factory as a lazily-loaded sub-tree.
pub fn lazy<F, Fut>(f: F) -> App
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<App>> + Send + 'static,
{
    App::Lazy(Arc::new(FnLazy {
        f,
        _marker: PhantomData,
    }))
}

struct FnGuard<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> GuardFactory for FnGuard<F, Fut>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<App>> + Send + 'static,
{
    fn evaluate(&self, context: Context) -> BoxFuture<'static, Result<App>> {
        Box::pin((self.f)(context))
    }
}

/// Wrap a context-aware async factory as an access-guarded sub-tree.
pub fn guard<F, Fut>(f: F) -> App
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<App>> + Send + 'static,
{
    App::Guarded(Arc::new(FnGuard {
        f,
        _marker: PhantomData,
    }))
}

struct FnSubscribe<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> SubscribeHandler for FnSubscribe<F, Fut>
where
    F: Fn(Vec<Value>, EventSink) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Subscription>> + Send + 'static,
{
    fn subscribe(
        &self,
        args: Vec<Value>,
        sink: EventSink,
    ) -> BoxFuture<'static, Result<Subscription>> {
        Box::pin((self.f)(args, sink))
    }
}

/// Wrap an async closure as a subscribe-style leaf.
pub fn subscription<F, Fut>(f: F) -> App
where
    F: Fn(Vec<Value>, EventSink) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Subscription>> + Send + 'static,
{
    App::Subscription(Arc::new(FnSubscribe {
        f,
        _marker: PhantomData,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CanopyError;

    #[tokio::test]
    async fn test_handler_plain_value_defaults() {
        let node = handler(|_args: Vec<Value>| async { Ok(Value::from("pong")) });

        let App::Handler(h) = node else {
            panic!("expected handler node");
        };
        let reply = h.call(vec![]).await.unwrap();
        assert_eq!(reply.data, Value::from("pong"));
        assert_eq!(reply.status, None);
        assert!(reply.headers.is_empty());
    }

    #[tokio::test]
    async fn test_handler_explicit_reply() {
        let node = handler(|_args: Vec<Value>| async {
            Ok(Reply::new(Value::from("created"))
                .with_status(201)
                .with_header("x-request-id", "abc"))
        });

        let App::Handler(h) = node else {
            panic!("expected handler node");
        };
        let reply = h.call(vec![]).await.unwrap();
        assert_eq!(reply.status, Some(201));
        assert_eq!(reply.headers, vec![("x-request-id".into(), "abc".into())]);
    }

    #[tokio::test]
    async fn test_handler_receives_positional_args() {
        let node = handler(|args: Vec<Value>| async move {
            let a = args[0].as_i64().unwrap();
            let b = args[1].as_i64().unwrap();
            Ok(Value::from(a + b))
        });

        let App::Handler(h) = node else {
            panic!("expected handler node");
        };
        let reply = h.call(vec![Value::from(2), Value::from(3)]).await.unwrap();
        assert_eq!(reply.data, Value::from(5));
    }

    #[tokio::test]
    async fn test_guard_denies() {
        let node = guard(|ctx: Context| async move {
            if ctx.auth() == Some("token") {
                Ok(handler(|_args: Vec<Value>| async { Ok(Value::Nil) }))
            } else {
                Err(CanopyError::access_denied("Unauthorized"))
            }
        });

        let App::Guarded(g) = node else {
            panic!("expected guarded node");
        };
        let err = g.evaluate(Context::message(None)).await.unwrap_err();
        assert_eq!(err.to_string(), "Unauthorized");
        assert!(g.evaluate(Context::message(Some("token".into()))).await.is_ok());
    }

    #[test]
    fn test_namespace_collects_entries() {
        let app = namespace([
            ("a", handler(|_args: Vec<Value>| async { Ok(Value::Nil) })),
            ("b", namespace::<[(&str, App); 0], &str>([])),
        ]);

        let App::Namespace(map) = app else {
            panic!("expected namespace node");
        };
        assert_eq!(map.len(), 2);
        assert!(matches!(map.get("a"), Some(App::Handler(_))));
        assert!(matches!(map.get("b"), Some(App::Namespace(_))));
    }
}
