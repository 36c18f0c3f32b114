use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use petgraph::algo::{kosaraju_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use ordra_core::error::{Result, SpecError};

use super::condition::Guard;
use super::spec::{NodeSpec, SpecFormat, WorkflowSpec};

/// An immutable, validated workflow graph.
///
/// Holds every node in declaration order, a directed graph whose edges run
/// dependency → dependent, and the compiled guard of each node. Node
/// `i` in declaration order is `NodeIndex::new(i)` in the graph. A graph
/// carries no execution state and can be shared across runs.
#[derive(Debug, Clone)]
pub struct Graph {
    name: Option<String>,
    nodes: Vec<NodeSpec>,
    dag: DiGraph<String, ()>,
    node_map: HashMap<String, NodeIndex>,
    dependents: HashMap<String, Vec<String>>,
    guards: HashMap<String, Guard>,
}

impl Graph {
    /// Load and build a graph from a spec file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let spec = WorkflowSpec::load(path)?;
        Ok(GraphBuilder::from_spec(spec).build()?)
    }

    /// Parse and build a graph from spec text.
    pub fn parse(content: &str, format: SpecFormat) -> std::result::Result<Self, SpecError> {
        GraphBuilder::from_spec(WorkflowSpec::parse(content, format)?).build()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.node_map.get(id).map(|ix| &self.nodes[ix.index()])
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_map.contains_key(id)
    }

    pub fn dependencies(&self, id: &str) -> &[String] {
        self.node(id).map(|n| n.deps.as_slice()).unwrap_or(&[])
    }

    /// Nodes that depend on `id`, in declaration order.
    pub fn dependents(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All edges as `(dependency, dependent)` pairs.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.dag
            .edge_references()
            .map(|e| (self.dag[e.source()].as_str(), self.dag[e.target()].as_str()))
            .collect()
    }

    pub fn guard(&self, id: &str) -> Option<&Guard> {
        self.guards.get(id)
    }

    /// Static wave plan: nodes grouped by dependency depth, each level sorted.
    ///
    /// Guards are not evaluated here, so this is the shape of a run in which
    /// every node executes.
    pub fn levels(&self) -> Vec<Vec<String>> {
        let mut in_degree: Vec<usize> = self
            .dag
            .node_indices()
            .map(|ix| self.dag.neighbors_directed(ix, Direction::Incoming).count())
            .collect();
        let mut current: Vec<NodeIndex> = self
            .dag
            .node_indices()
            .filter(|ix| in_degree[ix.index()] == 0)
            .collect();

        let mut levels = Vec::new();
        while !current.is_empty() {
            let mut next = Vec::new();
            for &ix in &current {
                for succ in self.dag.neighbors_directed(ix, Direction::Outgoing) {
                    in_degree[succ.index()] -= 1;
                    if in_degree[succ.index()] == 0 {
                        next.push(succ);
                    }
                }
            }
            let mut level: Vec<String> = current.iter().map(|&ix| self.dag[ix].clone()).collect();
            level.sort();
            levels.push(level);
            current = next;
        }
        levels
    }
}

/// Assembles node records into a [`Graph`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    name: Option<String>,
    nodes: Vec<NodeSpec>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_spec(spec: WorkflowSpec) -> Self {
        Self {
            name: spec.name,
            nodes: spec.nodes,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn nodes(mut self, nodes: impl IntoIterator<Item = NodeSpec>) -> Self {
        self.nodes.extend(nodes);
        self
    }

    /// Validate ids, dependencies, guards and acyclicity.
    pub fn build(self) -> std::result::Result<Graph, SpecError> {
        let mut dag: DiGraph<String, ()> = DiGraph::with_capacity(self.nodes.len(), 0);
        let mut node_map = HashMap::with_capacity(self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            if node.id.is_empty() {
                return Err(SpecError::MissingId { index: i });
            }
            if node.handler.is_empty() {
                return Err(SpecError::MissingHandler {
                    node_id: node.id.clone(),
                });
            }
            if node_map.contains_key(&node.id) {
                return Err(SpecError::DuplicateId(node.id.clone()));
            }
            node_map.insert(node.id.clone(), dag.add_node(node.id.clone()));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            let to = NodeIndex::new(i);
            for dep in &node.deps {
                let Some(&from) = node_map.get(dep) else {
                    return Err(SpecError::MissingDependency {
                        node_id: node.id.clone(),
                        dependency: dep.clone(),
                    });
                };
                dag.add_edge(from, to, ());
            }
        }

        let mut guards = HashMap::new();
        for node in &self.nodes {
            let Some(expr) = node.when.as_deref() else {
                continue;
            };
            let guard = Guard::parse(expr).map_err(|reason| SpecError::InvalidGuard {
                node_id: node.id.clone(),
                expr: expr.to_string(),
                reason,
            })?;
            if let Some(guard) = guard {
                guards.insert(node.id.clone(), guard);
            }
        }

        if let Err(cycle) = toposort(&dag, None) {
            return Err(SpecError::Cycle(cycle_through(&dag, cycle.node_id())));
        }

        let dependents: HashMap<String, Vec<String>> = dag
            .node_indices()
            .map(|ix| {
                let mut succs: Vec<NodeIndex> =
                    dag.neighbors_directed(ix, Direction::Outgoing).collect();
                succs.sort();
                let ids: Vec<String> = succs.into_iter().map(|s| dag[s].clone()).collect();
                (dag[ix].clone(), ids)
            })
            .collect();

        Ok(Graph {
            name: self.name,
            nodes: self.nodes,
            dag,
            node_map,
            dependents,
            guards,
        })
    }
}

/// Shortest cycle through `start`, as an id list that begins and ends with
/// `start`, e.g. `[a, b, a]`.
///
/// The search is a breadth-first walk restricted to the strongly connected
/// component containing `start`.
fn cycle_through(dag: &DiGraph<String, ()>, start: NodeIndex) -> Vec<String> {
    let component: HashSet<NodeIndex> = kosaraju_scc(dag)
        .into_iter()
        .find(|scc| scc.contains(&start))
        .unwrap_or_default()
        .into_iter()
        .collect();

    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([start]);
    while let Some(u) = queue.pop_front() {
        let mut succs: Vec<NodeIndex> = dag.neighbors_directed(u, Direction::Outgoing).collect();
        succs.sort();
        for v in succs {
            if v == start {
                let mut path = vec![u];
                let mut cur = u;
                while let Some(&p) = parent.get(&cur) {
                    path.push(p);
                    cur = p;
                }
                path.reverse();
                path.push(start);
                return path.into_iter().map(|ix| dag[ix].clone()).collect();
            }
            if component.contains(&v) && !parent.contains_key(&v) {
                parent.insert(v, u);
                queue.push_back(v);
            }
        }
    }
    // toposort only reports nodes that sit on a cycle.
    vec![dag[start].clone(), dag[start].clone()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, deps: &[&str]) -> NodeSpec {
        NodeSpec::new(id, "noop").with_deps(deps.iter().copied())
    }

    #[test]
    fn test_build_diamond() {
        let graph = GraphBuilder::new()
            .name("diamond")
            .nodes([
                node("a", &[]),
                node("b", &["a"]),
                node("c", &["a"]),
                node("d", &["b", "c"]),
            ])
            .build()
            .unwrap();

        assert_eq!(graph.name(), Some("diamond"));
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.node_ids(), vec!["a", "b", "c", "d"]);
        assert_eq!(graph.dependents("a"), &["b".to_string(), "c".to_string()]);
        assert_eq!(graph.dependencies("d"), &["b".to_string(), "c".to_string()]);
        assert_eq!(graph.edges().len(), 4);
        assert!(graph.edges().contains(&("c", "d")));
        assert_eq!(
            graph.levels(),
            vec![vec!["a"], vec!["b", "c"], vec!["d"]]
        );
    }

    #[test]
    fn test_duplicate_id() {
        let err = GraphBuilder::new()
            .nodes([node("a", &[]), node("a", &[])])
            .build()
            .unwrap_err();
        assert_eq!(err, SpecError::DuplicateId("a".into()));
    }

    #[test]
    fn test_missing_dependency() {
        let err = GraphBuilder::new()
            .node(node("a", &["ghost"]))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            SpecError::MissingDependency {
                node_id: "a".into(),
                dependency: "ghost".into()
            }
        );
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let err = GraphBuilder::new()
            .node(node("a", &["a"]))
            .build()
            .unwrap_err();
        assert_eq!(err, SpecError::Cycle(vec!["a".into(), "a".into()]));
    }

    #[test]
    fn test_cycle_reports_path() {
        let err = GraphBuilder::new()
            .nodes([
                node("start", &[]),
                node("a", &["start", "c"]),
                node("b", &["a"]),
                node("c", &["b"]),
            ])
            .build()
            .unwrap_err();
        let cycle = match err {
            SpecError::Cycle(cycle) => cycle,
            other => panic!("expected cycle, got {other:?}"),
        };
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        for id in ["a", "b", "c"] {
            assert!(cycle.iter().any(|c| c == id));
        }
        assert!(!cycle.iter().any(|c| c == "start"));
    }

    #[test]
    fn test_long_chain_builds_without_recursion() {
        const DEPTH: usize = 100_000;
        let chain = (0..DEPTH).map(|i| {
            let node = NodeSpec::new(format!("n{}", i), "noop");
            if i == 0 {
                node
            } else {
                node.with_deps([format!("n{}", i - 1)])
            }
        });
        let graph = GraphBuilder::new().nodes(chain).build().unwrap();

        assert_eq!(graph.len(), DEPTH);
        assert_eq!(graph.edges().len(), DEPTH - 1);
        assert_eq!(graph.dependents("n0"), &["n1".to_string()]);
        let levels = graph.levels();
        assert_eq!(levels.len(), DEPTH);
        assert_eq!(levels[DEPTH - 1], vec![format!("n{}", DEPTH - 1)]);
    }

    #[test]
    fn test_long_cycle_reported_in_order() {
        const DEPTH: usize = 50_000;
        let chain = (0..DEPTH).map(|i| {
            let prev = if i == 0 { DEPTH - 1 } else { i - 1 };
            NodeSpec::new(format!("n{}", i), "noop").with_deps([format!("n{}", prev)])
        });
        let err = GraphBuilder::new().nodes(chain).build().unwrap_err();
        let cycle = match err {
            SpecError::Cycle(cycle) => cycle,
            other => panic!("expected cycle, got {other:?}"),
        };
        assert_eq!(cycle.len(), DEPTH + 1);
        assert_eq!(cycle.first(), cycle.last());
    }

    #[test]
    fn test_dependents_follow_declaration_order() {
        let graph = GraphBuilder::new()
            .nodes([
                node("root", &[]),
                node("zeta", &["root"]),
                node("alpha", &["root"]),
            ])
            .build()
            .unwrap();
        assert_eq!(
            graph.dependents("root"),
            &["zeta".to_string(), "alpha".to_string()]
        );
        assert!(graph.dependents("alpha").is_empty());
        assert_eq!(graph.levels(), vec![vec!["root"], vec!["alpha", "zeta"]]);
    }

    #[test]
    fn test_invalid_guard_rejected() {
        let err = GraphBuilder::new()
            .node(node("a", &[]).with_when("tier in GOLD"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SpecError::InvalidGuard { ref node_id, .. } if node_id == "a"));

        let err = GraphBuilder::new()
            .node(node("b", &[]).with_when("tier != 'GOLD'"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SpecError::InvalidGuard { ref node_id, .. } if node_id == "b"));
    }

    #[test]
    fn test_guards_compiled() {
        let graph = GraphBuilder::new()
            .nodes([node("a", &[]).with_when("flag"), node("b", &[])])
            .build()
            .unwrap();
        assert_eq!(graph.guard("a").map(Guard::source), Some("flag"));
        assert!(graph.guard("b").is_none());
    }

    #[test]
    fn test_parse_yaml_graph() {
        let yaml = r#"
nodes:
  - id: ingest_email
    handler: email.fetch
  - id: detect_customer
    handler: identity.resolve
    deps: [ingest_email]
"#;
        let graph = Graph::parse(yaml, SpecFormat::Yaml).unwrap();
        assert_eq!(graph.edges(), vec![("ingest_email", "detect_customer")]);
        assert!(graph.contains("detect_customer"));
        assert!(!graph.contains("post_order"));
    }

    #[test]
    fn test_empty_graph() {
        let graph = GraphBuilder::new().build().unwrap();
        assert!(graph.is_empty());
        assert!(graph.levels().is_empty());
    }
}
