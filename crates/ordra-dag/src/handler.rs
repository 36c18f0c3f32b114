use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;

use ordra_core::context::{ExecutionContext, Updates};

use super::graph::Graph;
use super::spec::NodeSpec;

/// Failure signalled by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Retry-eligible: timeouts, connection resets, 5xx responses.
    #[error("{0}")]
    Transient(String),
    /// Anything else; ends the node without further attempts.
    #[error("{0}")]
    Fatal(String),
}

impl HandlerError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type HandlerResult = std::result::Result<Updates, HandlerError>;

/// A unit of business logic bound to graph nodes through their `handler` name.
///
/// Handlers get a read-only view of the context and return a partial update;
/// they never mutate the shared context themselves.
pub trait NodeHandler: Send + Sync + 'static {
    fn handle<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a NodeSpec,
    ) -> BoxFuture<'a, HandlerResult>;
}

/// Adapts a blocking closure into a [`NodeHandler`].
///
/// The closure runs on tokio's blocking pool, so blocking I/O inside it does
/// not stall other nodes of the same wave.
pub struct FnHandler<F> {
    f: Arc<F>,
}

impl<F> FnHandler<F>
where
    F: Fn(&ExecutionContext, &NodeSpec) -> HandlerResult + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl<F> NodeHandler for FnHandler<F>
where
    F: Fn(&ExecutionContext, &NodeSpec) -> HandlerResult + Send + Sync + 'static,
{
    fn handle<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a NodeSpec,
    ) -> BoxFuture<'a, HandlerResult> {
        let f = Arc::clone(&self.f);
        let ctx = ctx.clone();
        let node = node.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || f(&ctx, &node))
                .await
                .unwrap_or_else(|e| Err(HandlerError::Fatal(format!("handler panicked: {}", e))))
        })
    }
}

/// Registry mapping handler names to handlers. Read-only during a run.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, handler: impl NodeHandler) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    /// Register a blocking closure.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&ExecutionContext, &NodeSpec) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(name, FnHandler::new(f));
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// `(node id, handler name)` for every node whose handler is unregistered.
    pub fn missing<'g>(&self, graph: &'g Graph) -> Vec<(&'g str, &'g str)> {
        graph
            .nodes()
            .iter()
            .filter(|n| !self.handlers.contains_key(&n.handler))
            .map(|n| (n.id.as_str(), n.handler.as_str()))
            .collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.list())
            .finish()
    }
}
