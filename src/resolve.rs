//! Path resolution over the handler tree.
//!
//! Walks an [`App`] for a dot-path and a [`Context`], unwrapping lazy and
//! guarded nodes as they are encountered. Wrappers are unwrapped even when
//! the path is exhausted, so a lazy sub-tree's root can itself be a terminal
//! callable. Guard failures propagate as ordinary handler failures; missing
//! segments and non-callable terminals fail with a path error carrying the
//! joined dotted path.
//!
//! Channels are subscription-only: reaching one in an HTTP context fails with
//! a path error rather than exposing `send`/`subscribe` over the unary call
//! path. In a message context a channel is a valid terminal, directly or with
//! a single trailing keyword segment (the broker has already matched the
//! configured subscribe keyword before resolving).

use std::sync::Arc;

use rmpv::Value;

use crate::app::{App, Handler, SubscribeHandler};
use crate::context::Context;
use crate::error::{CanopyError, Result};
use crate::subject::Subject;

/// A terminal node produced by resolution.
pub enum Resolved {
    /// A callable leaf, invokable with positional arguments.
    Handler(Arc<dyn Handler>),
    /// A broadcast channel (message contexts only).
    Channel(Subject<Value>),
    /// A subscribe-style leaf (message contexts only).
    Subscription(Arc<dyn SubscribeHandler>),
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolved::Handler(_) => f.write_str("Handler"),
            Resolved::Channel(_) => f.write_str("Channel"),
            Resolved::Subscription(_) => f.write_str("Subscription"),
        }
    }
}

fn path_not_found(path: &[String]) -> CanopyError {
    CanopyError::Path(format!(
        "Path \"{}\" could not be found in the app.",
        path.join(".")
    ))
}

/// Resolve `path` against `tree`, producing a terminal node or failing.
pub async fn resolve(tree: &App, path: &[String], context: &Context) -> Result<Resolved> {
    let mut node = tree.clone();
    let mut index = 0;

    loop {
        // Unwrap lazy and guarded wrappers before looking at the node, even
        // when the path is exhausted. Factories run once per traversal.
        loop {
            match node {
                App::Lazy(factory) => node = factory.load().await?,
                App::Guarded(factory) => node = factory.evaluate(context.clone()).await?,
                other => {
                    node = other;
                    break;
                }
            }
        }

        if context.is_http() {
            if let App::Channel(_) = node {
                return Err(CanopyError::Path(
                    "Subjects may not be accessed by the client.".to_string(),
                ));
            }
        }

        let remaining = &path[index..];

        match node {
            App::Handler(h) if remaining.is_empty() => return Ok(Resolved::Handler(h)),
            App::Subscription(s) if remaining.is_empty() => return Ok(Resolved::Subscription(s)),
            App::Channel(subject) if remaining.len() <= 1 => {
                // Terminal channel, or channel followed by the subscribe
                // keyword segment the broker already validated.
                return Ok(Resolved::Channel(subject));
            }
            App::Namespace(mut map) if !remaining.is_empty() => {
                match map.remove(&remaining[0]) {
                    Some(child) => {
                        node = child;
                        index += 1;
                    }
                    None => return Err(path_not_found(path)),
                }
            }
            _ => return Err(path_not_found(path)),
        }
    }
}
