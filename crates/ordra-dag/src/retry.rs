use std::time::{Duration, Instant};

use tracing::{debug, warn};

use ordra_core::config::ExecutorConfig;
use ordra_core::context::ExecutionContext;

use super::executor::NodeRunResult;
use super::handler::{HandlerError, HandlerResult, NodeHandler};
use super::spec::{NodeSpec, RetryPolicy};

/// Runs a handler under a node's retry policy.
#[derive(Debug, Clone)]
pub struct RetryController {
    backoff_unit: Duration,
    enforce_timeouts: bool,
}

impl Default for RetryController {
    fn default() -> Self {
        Self::from_config(&ExecutorConfig::default())
    }
}

impl RetryController {
    pub fn new(backoff_unit: Duration, enforce_timeouts: bool) -> Self {
        Self {
            backoff_unit,
            enforce_timeouts,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_unit_ms),
            config.enforce_timeouts,
        )
    }

    /// Delay before the retry that follows failed attempt `attempt_index` (0-based).
    pub fn backoff(&self, policy: &RetryPolicy, attempt_index: usize) -> Duration {
        let units = u32::try_from(policy.backoff_after(attempt_index)).unwrap_or(u32::MAX);
        self.backoff_unit.saturating_mul(units)
    }

    /// Attempt the handler up to `max_attempts` times.
    ///
    /// Transient failures are retried after the scheduled backoff; fatal
    /// failures end the node at once. Attempts and elapsed time are recorded
    /// whatever the outcome.
    pub async fn run(
        &self,
        node: &NodeSpec,
        handler: &dyn NodeHandler,
        ctx: &ExecutionContext,
    ) -> NodeRunResult {
        let start = Instant::now();
        let max_attempts = node.retry.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.attempt(node, handler, ctx).await {
                Ok(updates) => {
                    debug!(node_id = %node.id, attempt, "Node attempt succeeded");
                    return NodeRunResult::succeeded(&node.id, updates, attempt, start.elapsed());
                }
                Err(HandlerError::Transient(message)) if attempt < max_attempts => {
                    let backoff = self.backoff(&node.retry, (attempt - 1) as usize);
                    warn!(
                        node_id = %node.id,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %message,
                        "Retrying node after transient failure"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    return NodeRunResult::failed(&node.id, e.to_string(), attempt, start.elapsed());
                }
            }
        }
    }

    async fn attempt(
        &self,
        node: &NodeSpec,
        handler: &dyn NodeHandler,
        ctx: &ExecutionContext,
    ) -> HandlerResult {
        if !self.enforce_timeouts || node.timeout_seconds == 0 {
            return handler.handle(ctx, node).await;
        }
        let limit = Duration::from_secs(node.timeout_seconds);
        match tokio::time::timeout(limit, handler.handle(ctx, node)).await {
            Ok(result) => result,
            Err(_) => Err(HandlerError::Transient(format!(
                "timed out after {}s",
                node.timeout_seconds
            ))),
        }
    }
}
