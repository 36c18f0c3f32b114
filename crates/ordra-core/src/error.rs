use thiserror::Error;

/// A malformed or inconsistent graph specification. Raised before any node runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("Spec parse error: {0}")]
    Parse(String),

    #[error("Spec invalid: nodes[] missing")]
    MissingNodes,

    #[error("Node #{index} missing string id")]
    MissingId { index: usize },

    #[error("Node {node_id} missing handler")]
    MissingHandler { node_id: String },

    #[error("Duplicate node id: {0}")]
    DuplicateId(String),

    #[error("Node {node_id} depends on missing node: {dependency}")]
    MissingDependency { node_id: String, dependency: String },

    #[error("Node {node_id}: field '{field}' {reason}")]
    InvalidField {
        node_id: String,
        field: String,
        reason: String,
    },

    #[error("Node {node_id}: invalid guard '{expr}': {reason}")]
    InvalidGuard {
        node_id: String,
        expr: String,
        reason: String,
    },

    #[error("Graph has a cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

#[derive(Debug, Error)]
pub enum OrdraError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("Graph stuck; pending nodes cannot run: {pending:?}")]
    StuckGraph {
        pending: Vec<String>,
        completed: Vec<String>,
    },

    #[error("Node {node_id} failed after {attempts} attempts: {message}")]
    NodeFailure {
        node_id: String,
        attempts: u32,
        message: String,
        /// Nodes whose effects were merged before the failure.
        completed: Vec<String>,
    },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrdraError {
    /// Node ids that completed before the run terminated, if this error ended a run.
    pub fn completed(&self) -> Option<&[String]> {
        match self {
            OrdraError::StuckGraph { completed, .. } | OrdraError::NodeFailure { completed, .. } => {
                Some(completed)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrdraError>;
