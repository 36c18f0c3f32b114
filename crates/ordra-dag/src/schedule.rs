use std::collections::{BTreeMap, BTreeSet};

use ordra_core::error::{OrdraError, Result};

use super::graph::Graph;

/// Lifecycle of a node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    /// Handed out by [`WaveScheduler::next_wave`], not yet dispatched.
    Ready,
    Running,
    Completed,
    Failed,
}

/// Tracks node states for one run and hands out waves of ready nodes.
#[derive(Debug, Clone)]
pub struct WaveScheduler {
    deps: BTreeMap<String, BTreeSet<String>>,
    states: BTreeMap<String, NodeState>,
}

impl WaveScheduler {
    pub fn new<I, D>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (String, D)>,
        D: IntoIterator<Item = String>,
    {
        let deps: BTreeMap<String, BTreeSet<String>> = nodes
            .into_iter()
            .map(|(id, deps)| (id, deps.into_iter().collect()))
            .collect();
        let states = deps.keys().map(|id| (id.clone(), NodeState::Pending)).collect();
        Self { deps, states }
    }

    pub fn for_graph(graph: &Graph) -> Self {
        Self::new(
            graph
                .nodes()
                .iter()
                .map(|n| (n.id.clone(), n.deps.clone())),
        )
    }

    pub fn state(&self, id: &str) -> Option<NodeState> {
        self.states.get(id).copied()
    }

    pub fn has_pending(&self) -> bool {
        self.states.values().any(|s| *s == NodeState::Pending)
    }

    /// Mark every pending node whose dependencies have all completed as
    /// ready and return their ids, sorted.
    ///
    /// Fails with [`OrdraError::StuckGraph`] when nodes are pending but none
    /// can become ready.
    pub fn next_wave(&mut self) -> Result<Vec<String>> {
        let ready: Vec<String> = self
            .deps
            .iter()
            .filter(|(id, _)| self.states[*id] == NodeState::Pending)
            .filter(|(_, deps)| {
                deps.iter()
                    .all(|d| self.states.get(d) == Some(&NodeState::Completed))
            })
            .map(|(id, _)| id.clone())
            .collect();

        if ready.is_empty() && self.has_pending() {
            return Err(OrdraError::StuckGraph {
                pending: self.with_state(NodeState::Pending),
                completed: self.completed(),
            });
        }
        for id in &ready {
            self.states.insert(id.clone(), NodeState::Ready);
        }
        Ok(ready)
    }

    /// A ready node has been dispatched.
    pub fn start(&mut self, id: &str) {
        if self.state(id) == Some(NodeState::Ready) {
            self.set(id, NodeState::Running);
        }
    }

    pub fn complete(&mut self, id: &str) {
        self.set(id, NodeState::Completed);
    }

    pub fn fail(&mut self, id: &str) {
        self.set(id, NodeState::Failed);
    }

    pub fn completed(&self) -> Vec<String> {
        self.with_state(NodeState::Completed)
    }

    pub fn failed(&self) -> Vec<String> {
        self.with_state(NodeState::Failed)
    }

    fn set(&mut self, id: &str, state: NodeState) {
        if let Some(s) = self.states.get_mut(id) {
            *s = state;
        }
    }

    fn with_state(&self, state: NodeState) -> Vec<String> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(id, _)| id.clone())
            .collect()
    }
}
