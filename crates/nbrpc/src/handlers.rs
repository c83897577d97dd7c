//! # Handler Registry
//!
//! The name-to-function table defining the set of operations one peer exposes
//! to the other. The registry is supplied at channel construction and is
//! immutable afterwards; unknown names are rejected at the boundary and
//! surfaced to the caller as a marshaled exception.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::message::Exception;

/// What a handler settles to: a transmissible value, or a thrown error.
pub type HandlerResult = std::result::Result<Value, Exception>;

/// A registered operation: an async function of an ordered argument list.
pub type Handler = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Registry of operations exposed to the remote peer.
#[derive(Default, Clone)]
pub struct Handlers {
    map: HashMap<String, Handler>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under `name`. Fluent, for construction-time use:
    ///
    /// ```rust
    /// # use nbrpc::Handlers;
    /// let handlers = Handlers::new()
    ///     .register("echo", |mut args| async move { Ok(args.remove(0)) });
    /// ```
    pub fn register<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args| Box::pin(handler(args)));
        self.map.insert(name.into(), handler);
        self
    }

    /// Looks up a handler by name.
    pub fn get(&self, name: &str) -> Option<Handler> {
        self.map.get(name).cloned()
    }
}
