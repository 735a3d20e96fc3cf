//! # canopy-rpc
//!
//! A transport-agnostic engine for calling and subscribing into a tree of
//! server-side handlers addressed by dotted paths, with MessagePack on the
//! wire.
//!
//! ## Architecture
//!
//! - **Handler tree** ([`app`]): callable leaves, namespaces, broadcast
//!   channels, plus lazy and guarded sub-trees.
//! - **Server** ([`server`]): envelope parsing, batch-aware dispatch, the
//!   HTTP surface for unary calls, and the per-connection subscription
//!   broker.
//! - **Client** ([`client`]): path building, lazy single-flight calls,
//!   batch combinators, and subscription handling over the message channel.
//! - **Transports** ([`transport`]): the two collaborator interfaces
//!   concrete bindings implement, plus an in-process implementation.
//!
//! ## Example
//!
//! ```
//! use canopy_rpc::app::{handler, namespace};
//! use canopy_rpc::client::{Client, ClientConfig};
//! use canopy_rpc::transport::LocalTransport;
//! use rmpv::Value;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), canopy_rpc::client::CallError> {
//! let app = namespace([(
//!     "ping",
//!     handler(|_args: Vec<Value>| async { Ok(Value::from("pong")) }),
//! )]);
//!
//! let transport = Arc::new(LocalTransport::new(app));
//! let client = Client::new(transport.clone(), transport, ClientConfig::default());
//!
//! let pong = client.path("ping").call(vec![]).value().await?;
//! assert_eq!(pong, Value::from("pong"));
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod client;
pub mod codec;
pub mod context;
pub mod error;
pub mod resolve;
pub mod server;
pub mod subject;
pub mod transport;

pub use app::{channel, guard, handler, lazy, namespace, subscription, App, Reply};
pub use context::{Context, HttpRequest};
pub use error::{CanopyError, Result};
pub use subject::{Subject, Subscription};
