//! Workflow specification loading.
//!
//! A spec document has an optional `dag_name`, an optional `defaults` block
//! (`retry`, `timeout_seconds`) and a `nodes` list. YAML, TOML and JSON are
//! all normalized into a JSON value tree first, so every field is validated
//! and coerced the same way whatever the source format.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ordra_core::error::{OrdraError, Result, SpecError};

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Retry contract of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed, at least 1.
    pub max_attempts: u32,
    /// Seconds to wait before each retry; the last entry repeats.
    pub backoff_seconds: Vec<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_seconds: vec![1],
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_seconds: Vec<u64>) -> Self {
        Self {
            max_attempts,
            backoff_seconds,
        }
        .normalized()
    }

    /// Substitute `[1]` for an empty backoff schedule.
    pub fn normalized(mut self) -> Self {
        if self.backoff_seconds.is_empty() {
            self.backoff_seconds = vec![1];
        }
        self
    }

    /// Backoff (in seconds) after the failed attempt with 0-based `attempt_index`.
    pub fn backoff_after(&self, attempt_index: usize) -> u64 {
        let last = self.backoff_seconds.len().saturating_sub(1);
        self.backoff_seconds
            .get(attempt_index.min(last))
            .copied()
            .unwrap_or(1)
    }
}

/// Identity and execution contract of one graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    /// Informational tag such as `tool` or `agent`.
    pub kind: String,
    /// Name resolved through the handler registry.
    pub handler: String,
    pub deps: Vec<String>,
    /// Guard expression; `None` means always eligible.
    pub when: Option<String>,
    pub retry: RetryPolicy,
    /// Advisory unless the executor enforces timeouts.
    pub timeout_seconds: u64,
    /// Context keys the node is expected to produce.
    pub outputs: Vec<String>,
}

impl NodeSpec {
    /// Create a node with default kind, retry and timeout.
    pub fn new(id: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "tool".to_string(),
            handler: handler.into(),
            deps: vec![],
            when: None,
            retry: RetryPolicy::default(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            outputs: vec![],
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_when(mut self, expr: impl Into<String>) -> Self {
        self.when = Some(expr.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry.normalized();
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }
}

/// Source format of a spec document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecFormat {
    Yaml,
    Toml,
    Json,
}

impl SpecFormat {
    /// Pick a format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// A parsed, field-validated workflow document.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSpec {
    pub name: Option<String>,
    pub nodes: Vec<NodeSpec>,
}

impl WorkflowSpec {
    /// Load a spec file, picking the format from its extension.
    pub fn load(path: &Path) -> Result<Self> {
        let format = SpecFormat::from_path(path).ok_or_else(|| {
            SpecError::Parse(format!(
                "unsupported spec extension: {} (expected .yaml, .yml, .toml or .json)",
                path.display()
            ))
        })?;
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, format).map_err(OrdraError::from)
    }

    /// Parse spec text in the given format.
    pub fn parse(content: &str, format: SpecFormat) -> std::result::Result<Self, SpecError> {
        let doc: Value = match format {
            SpecFormat::Yaml => {
                serde_yaml::from_str(content).map_err(|e| SpecError::Parse(e.to_string()))?
            }
            SpecFormat::Toml => {
                toml::from_str(content).map_err(|e| SpecError::Parse(e.to_string()))?
            }
            SpecFormat::Json => {
                serde_json::from_str(content).map_err(|e| SpecError::Parse(e.to_string()))?
            }
        };
        Self::from_value(&doc)
    }

    /// Validate and coerce an already-parsed document.
    pub fn from_value(doc: &Value) -> std::result::Result<Self, SpecError> {
        let root = doc
            .as_object()
            .ok_or_else(|| SpecError::Parse("spec document must be a mapping".into()))?;
        let nodes_raw = root
            .get("nodes")
            .and_then(Value::as_array)
            .ok_or(SpecError::MissingNodes)?;
        let empty = Map::new();
        let defaults = match root.get("defaults") {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(SpecError::Parse("'defaults' must be a mapping".into()));
            }
        };
        let name = root
            .get("dag_name")
            .filter(|v| !v.is_null())
            .map(scalar_string);

        let nodes = nodes_raw
            .iter()
            .enumerate()
            .map(|(index, raw)| parse_node(index, raw, defaults))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self { name, nodes })
    }
}

fn parse_node(
    index: usize,
    raw: &Value,
    defaults: &Map<String, Value>,
) -> std::result::Result<NodeSpec, SpecError> {
    let node = raw.as_object().ok_or(SpecError::MissingId { index })?;
    let id = match node.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => return Err(SpecError::MissingId { index }),
    };

    let kind = match node.get("type") {
        None | Some(Value::Null) => "tool".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(invalid(&id, "type", "must be a string")),
    };

    let handler = match node.get("handler") {
        None | Some(Value::Null) => String::new(),
        Some(v @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) => scalar_string(v),
        Some(_) => return Err(invalid(&id, "handler", "must be a string")),
    };
    if handler.is_empty() {
        return Err(SpecError::MissingHandler { node_id: id });
    }

    let deps = string_list(&id, "deps", node.get("deps"))?;
    let outputs = string_list(&id, "outputs", node.get("outputs"))?;

    let when = match node.get("when") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(invalid(&id, "when", "must be a string expression")),
    };

    let retry = parse_retry(&id, node, defaults)?;
    let timeout_seconds = match node
        .get("timeout_seconds")
        .or_else(|| defaults.get("timeout_seconds"))
    {
        None | Some(Value::Null) => DEFAULT_TIMEOUT_SECONDS,
        Some(v) => coerce_u64(v).ok_or_else(|| {
            invalid(&id, "timeout_seconds", "must be a non-negative integer")
        })?,
    };

    Ok(NodeSpec {
        id,
        kind,
        handler,
        deps,
        when,
        retry,
        timeout_seconds,
        outputs,
    })
}

/// Node `retry`, else `defaults.retry`, else `{max_attempts: 1, backoff_seconds: [1]}`.
fn parse_retry(
    id: &str,
    node: &Map<String, Value>,
    defaults: &Map<String, Value>,
) -> std::result::Result<RetryPolicy, SpecError> {
    let Some(raw) = present(node.get("retry")).or_else(|| present(defaults.get("retry"))) else {
        return Ok(RetryPolicy::default());
    };
    let retry = raw
        .as_object()
        .ok_or_else(|| invalid(id, "retry", "must be a mapping"))?;

    let max_attempts = match retry.get("max_attempts") {
        None | Some(Value::Null) => 1,
        Some(v) => coerce_u64(v)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| invalid(id, "retry.max_attempts", "must be a positive integer"))?,
    };
    if max_attempts < 1 {
        return Err(invalid(id, "retry.max_attempts", "must be at least 1"));
    }

    let backoff_seconds = match retry.get("backoff_seconds") {
        None | Some(Value::Null) => vec![1],
        Some(Value::Array(items)) => items
            .iter()
            .map(coerce_u64)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                invalid(id, "retry.backoff_seconds", "must contain non-negative integers")
            })?,
        Some(v) => vec![coerce_u64(v).ok_or_else(|| {
            invalid(id, "retry.backoff_seconds", "must be an integer or a list of integers")
        })?],
    };

    Ok(RetryPolicy::new(max_attempts, backoff_seconds))
}

/// Absent, null and empty mappings all defer to the next fallback.
fn present(value: Option<&Value>) -> Option<&Value> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) if map.is_empty() => None,
        Some(v) => Some(v),
    }
}

fn string_list(
    id: &str,
    field: &str,
    value: Option<&Value>,
) -> std::result::Result<Vec<String>, SpecError> {
    match value {
        None | Some(Value::Null) => Ok(vec![]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(scalar_string(item)),
                _ => Err(invalid(id, field, "must contain only strings")),
            })
            .collect(),
        Some(_) => Err(invalid(id, field, "must be a list")),
    }
}

/// Accept integers and integer-valued strings.
fn coerce_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn invalid(id: &str, field: &str, reason: &str) -> SpecError {
    SpecError::InvalidField {
        node_id: id.to_string(),
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
