use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use ordra_core::config::ExecutorConfig;
use ordra_core::context::{ExecutionContext, Updates, DAG_EXEC_KEY};
use ordra_core::error::{OrdraError, Result};

use super::graph::Graph;
use super::handler::HandlerRegistry;
use super::merge::{free_key, merge};
use super::retry::RetryController;
use super::schedule::WaveScheduler;
use super::spec::NodeSpec;

/// Outcome of one node's attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRunResult {
    pub node_id: String,
    pub ok: bool,
    /// The guard evaluated false and the handler never ran.
    #[serde(default)]
    pub skipped: bool,
    pub updates: Updates,
    #[serde(default)]
    pub error: Option<String>,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

impl NodeRunResult {
    pub fn succeeded(node_id: &str, updates: Updates, attempts: u32, elapsed: Duration) -> Self {
        Self {
            node_id: node_id.to_string(),
            ok: true,
            skipped: false,
            updates,
            error: None,
            attempts,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn failed(
        node_id: &str,
        error: impl Into<String>,
        attempts: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            ok: false,
            skipped: false,
            updates: Updates::new(),
            error: Some(error.into()),
            attempts,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Guard-false no-op: successful, no updates, zero attempts.
    pub fn skipped(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            ok: true,
            skipped: true,
            updates: Updates::new(),
            error: None,
            attempts: 0,
            elapsed_ms: 0,
        }
    }
}

/// Final report of a run, stored in the context under [`DAG_EXEC_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub node_results: BTreeMap<String, NodeRunResult>,
}

impl RunOutcome {
    /// Read the metadata block back out of a finished context.
    pub fn from_context(ctx: &ExecutionContext) -> Option<Self> {
        serde_json::from_value(ctx.get(DAG_EXEC_KEY)?.clone()).ok()
    }
}

/// Runs a [`Graph`] wave by wave.
///
/// Every pending node whose dependencies have completed forms the next wave.
/// Multi-node waves run concurrently (bounded by `max_workers`) against a
/// snapshot of the context taken when the wave starts; results are then
/// merged in ascending node-id order, so the final context does not depend
/// on completion order. The first failed node ends the run.
pub struct ParallelExecutor {
    registry: HandlerRegistry,
    max_workers: usize,
    parallel_waves: bool,
    retry: RetryController,
}

impl ParallelExecutor {
    /// Create an executor with default settings.
    pub fn new(registry: HandlerRegistry) -> Self {
        Self::with_config(registry, &ExecutorConfig::default())
    }

    pub fn with_config(registry: HandlerRegistry, config: &ExecutorConfig) -> Self {
        Self {
            registry,
            max_workers: config.max_workers.max(1),
            parallel_waves: config.parallel_waves,
            retry: RetryController::from_config(config),
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_parallel_waves(mut self, enabled: bool) -> Self {
        self.parallel_waves = enabled;
        self
    }

    pub fn with_retry_controller(mut self, retry: RetryController) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Execute the whole graph against `initial`.
    ///
    /// Returns the initial context plus every node's merged updates plus the
    /// `_dag_exec` metadata block. The key is reserved: a node whose updates
    /// contain it fails, and a value already present in `initial` is moved to
    /// `"initial._dag_exec"`. Fails with [`OrdraError::StuckGraph`] or
    /// [`OrdraError::NodeFailure`]; merged effects of earlier nodes are
    /// reported through the error's `completed` list.
    pub async fn run(&self, graph: &Graph, initial: ExecutionContext) -> Result<ExecutionContext> {
        let start = Instant::now();
        let mut ctx = initial;
        let mut scheduler = WaveScheduler::for_graph(graph);
        let mut results: BTreeMap<String, NodeRunResult> = BTreeMap::new();
        let mut wave_index = 0usize;

        info!(
            graph = graph.name().unwrap_or("<unnamed>"),
            nodes = graph.len(),
            "Starting graph run"
        );

        while scheduler.has_pending() {
            let wave = scheduler.next_wave().map_err(|e| {
                error!(error = %e, "Graph run stuck");
                e
            })?;
            wave_index += 1;
            let nodes: Vec<&NodeSpec> = wave.iter().filter_map(|id| graph.node(id)).collect();
            let parallel = self.parallel_waves && nodes.len() > 1;
            debug!(wave = wave_index, size = nodes.len(), parallel, "Dispatching wave");

            if parallel {
                for id in &wave {
                    scheduler.start(id);
                }
                let mut outcomes = self.run_wave_parallel(graph, &ctx, &nodes).await;
                outcomes.sort_by(|a, b| a.node_id.cmp(&b.node_id));

                let mut first_failure: Option<NodeRunResult> = None;
                for outcome in outcomes {
                    if outcome.ok {
                        self.absorb(&mut ctx, &mut scheduler, &outcome);
                    } else if first_failure.is_none() {
                        first_failure = Some(outcome.clone());
                    }
                    results.insert(outcome.node_id.clone(), outcome);
                }
                if let Some(failure) = first_failure {
                    return Err(self.abort(&mut scheduler, failure));
                }
            } else {
                for node in nodes {
                    scheduler.start(&node.id);
                    let outcome = self.run_node(graph, node, &ctx).await;
                    results.insert(outcome.node_id.clone(), outcome.clone());
                    if !outcome.ok {
                        return Err(self.abort(&mut scheduler, outcome));
                    }
                    self.absorb(&mut ctx, &mut scheduler, &outcome);
                }
            }
        }

        let outcome = RunOutcome {
            completed: scheduler.completed(),
            failed: scheduler.failed(),
            node_results: results,
        };
        info!(
            completed = outcome.completed.len(),
            waves = wave_index,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Graph run complete"
        );
        if let Some(prior) = ctx.remove(DAG_EXEC_KEY) {
            let stored_as = free_key(format!("initial.{}", DAG_EXEC_KEY), |k| ctx.contains_key(k));
            warn!(stored_as = %stored_as, "Initial context already held run metadata, moving it");
            ctx.set(stored_as, prior);
        }
        ctx.set(DAG_EXEC_KEY, serde_json::to_value(&outcome)?);
        Ok(ctx)
    }

    /// Run every node of a wave concurrently against one shared snapshot.
    async fn run_wave_parallel(
        &self,
        graph: &Graph,
        ctx: &ExecutionContext,
        nodes: &[&NodeSpec],
    ) -> Vec<NodeRunResult> {
        let snapshot = ctx.clone();
        futures::stream::iter(nodes.iter().copied())
            .map(|node| self.run_node(graph, node, &snapshot))
            .buffer_unordered(self.max_workers)
            .collect()
            .await
    }

    /// Evaluate the guard, resolve the handler and run it under the retry policy.
    async fn run_node(
        &self,
        graph: &Graph,
        node: &NodeSpec,
        ctx: &ExecutionContext,
    ) -> NodeRunResult {
        if let Some(guard) = graph.guard(&node.id) {
            if !guard.evaluate(ctx) {
                debug!(node_id = %node.id, guard = guard.source(), "Guard false, skipping node");
                return NodeRunResult::skipped(&node.id);
            }
        }

        let Some(handler) = self.registry.get(&node.handler) else {
            error!(node_id = %node.id, handler = %node.handler, "No handler registered");
            return NodeRunResult::failed(
                &node.id,
                format!("No handler registered for {}", node.handler),
                0,
                Duration::ZERO,
            );
        };

        info!(node_id = %node.id, handler = %node.handler, kind = %node.kind, "Executing node");
        let result = self.retry.run(node, handler.as_ref(), ctx).await;
        if result.ok && result.updates.contains_key(DAG_EXEC_KEY) {
            error!(node_id = %node.id, key = DAG_EXEC_KEY, "Node wrote a reserved context key");
            return NodeRunResult::failed(
                &node.id,
                format!("Updates may not write the reserved key {}", DAG_EXEC_KEY),
                result.attempts,
                Duration::from_millis(result.elapsed_ms),
            );
        }

        if result.elapsed_ms > node.timeout_seconds.saturating_mul(1000) {
            warn!(
                node_id = %node.id,
                elapsed_ms = result.elapsed_ms,
                timeout_seconds = node.timeout_seconds,
                "Node exceeded its timeout"
            );
        }
        debug!(
            node_id = %node.id,
            ok = result.ok,
            attempts = result.attempts,
            elapsed_ms = result.elapsed_ms,
            "Node execution complete"
        );
        result
    }

    /// Mark a successful node complete and fold its updates into the context.
    fn absorb(
        &self,
        ctx: &mut ExecutionContext,
        scheduler: &mut WaveScheduler,
        outcome: &NodeRunResult,
    ) {
        scheduler.complete(&outcome.node_id);
        for collision in merge(ctx, outcome.updates.clone(), &outcome.node_id) {
            debug!(
                node_id = %outcome.node_id,
                key = %collision.key,
                stored_as = %collision.stored_as,
                "Context key collision"
            );
        }
    }

    fn abort(&self, scheduler: &mut WaveScheduler, failure: NodeRunResult) -> OrdraError {
        scheduler.fail(&failure.node_id);
        let message = failure.error.unwrap_or_else(|| "unknown".to_string());
        error!(
            node_id = %failure.node_id,
            attempts = failure.attempts,
            error = %message,
            "Graph node failed, aborting run"
        );
        OrdraError::NodeFailure {
            node_id: failure.node_id,
            attempts: failure.attempts,
            message,
            completed: scheduler.completed(),
        }
    }
}
