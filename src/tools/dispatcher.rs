//! Tool-call routing and result correlation

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::task::AbortHandle;

use crate::error::ToolError;
use crate::protocol::{ToolInvocation, ToolResult};

/// Business logic behind one named tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolError>;
}

/// Adapter for async closures
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        (self.0)(args).await
    }
}

/// What to do with invocations nobody registered a handler for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownToolPolicy {
    /// Leave the id unanswered and log it
    #[default]
    Ignore,
    /// Answer with an error payload
    ReplyError,
}

/// Name → handler registry that resolves whole batches
#[derive(Clone)]
pub struct ToolDispatcher {
    handlers: Arc<DashMap<String, Arc<dyn ToolHandler>>>,
    policy: UnknownToolPolicy,
}

impl ToolDispatcher {
    pub fn new(policy: UnknownToolPolicy) -> Self {
        Self {
            handlers: Arc::new(DashMap::new()),
            policy,
        }
    }

    /// Register (or replace) the handler for `name`
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        let name = name.into();
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::debug!("Replaced handler for tool '{}'", name);
        }
    }

    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        self.register(name, Arc::new(FnHandler(f)));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn policy(&self) -> UnknownToolPolicy {
        self.policy
    }

    /// Run every handler of a batch and return the results in invocation
    /// order.
    ///
    /// Handlers run concurrently as tasks, so one that panics only fails its
    /// own id. Resolves once every invocation has an answer. Dropping the
    /// returned future aborts the handlers still running.
    pub async fn dispatch(&self, batch: Vec<ToolInvocation>) -> Vec<ToolResult> {
        let mut pending = Vec::with_capacity(batch.len());
        let mut running = HandlerTasks(Vec::with_capacity(batch.len()));

        for invocation in batch {
            let handler = self
                .handlers
                .get(&invocation.name)
                .map(|entry| entry.value().clone());

            match (handler, self.policy) {
                (Some(handler), _) => {
                    tracing::debug!("Calling tool '{}' (id {})", invocation.name, invocation.id);
                    let args = invocation.args.clone();
                    let task = tokio::spawn(async move { handler.call(args).await });
                    running.0.push(task.abort_handle());
                    pending.push((invocation, Some(task)));
                }
                (None, UnknownToolPolicy::Ignore) => {
                    tracing::warn!(
                        "No handler registered for tool '{}', id {} left unanswered",
                        invocation.name,
                        invocation.id
                    );
                }
                (None, UnknownToolPolicy::ReplyError) => {
                    tracing::warn!("No handler registered for tool '{}'", invocation.name);
                    pending.push((invocation, None));
                }
            }
        }

        let mut results = Vec::with_capacity(pending.len());
        for (invocation, task) in pending {
            let result = match task {
                Some(task) => match task.await {
                    Ok(Ok(output)) => ToolResult::success(&invocation, output),
                    Ok(Err(e)) => {
                        tracing::warn!("Tool '{}' failed: {}", invocation.name, e);
                        ToolResult::failure(&invocation, e.to_string())
                    }
                    Err(e) => {
                        tracing::error!("Tool '{}' task failed: {}", invocation.name, e);
                        ToolResult::failure(&invocation, ToolError::Aborted(e.to_string()).to_string())
                    }
                },
                None => ToolResult::failure(
                    &invocation,
                    ToolError::UnknownTool(invocation.name.clone()).to_string(),
                ),
            };
            results.push(result);
        }
        results
    }
}

/// Aborts its handler tasks when the batch is dropped unfinished
struct HandlerTasks(Vec<AbortHandle>);

impl Drop for HandlerTasks {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self::new(UnknownToolPolicy::default())
    }
}
