//! DAG workflow engine: spec loading, validation and wave-parallel execution.
//!
//! A workflow is a set of `NodeSpec`s whose `deps` define a directed acyclic
//! graph. `GraphBuilder` validates a spec into a `Graph`; `ParallelExecutor`
//! then runs it in waves of ready nodes, each node's handler resolved by name
//! from a `HandlerRegistry`, guarded by an optional `when` expression and
//! retried by the `RetryController`. Node outputs are folded into a shared
//! `ExecutionContext` without ever overwriting an existing key.

pub mod condition;
pub mod executor;
pub mod graph;
pub mod handler;
pub mod merge;
pub mod retry;
pub mod schedule;
pub mod spec;

pub use condition::{evaluate_condition, Clause, Guard, Literal};
pub use executor::{NodeRunResult, ParallelExecutor, RunOutcome};
pub use graph::{Graph, GraphBuilder};
pub use handler::{FnHandler, HandlerError, HandlerRegistry, HandlerResult, NodeHandler};
pub use merge::{merge, Collision};
pub use retry::RetryController;
pub use schedule::{NodeState, WaveScheduler};
pub use spec::{NodeSpec, RetryPolicy, SpecFormat, WorkflowSpec};
