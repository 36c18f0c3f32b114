//! Mock handlers and spec fixtures shared by Ordra's integration tests.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tempfile::NamedTempFile;

use ordra_core::context::{ExecutionContext, Updates};
use ordra_dag::handler::{HandlerError, HandlerResult, NodeHandler};
use ordra_dag::spec::NodeSpec;

/// Build an update map from a JSON object literal.
///
/// Panics if `value` is not an object.
pub fn updates(value: Value) -> Updates {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        other => panic!("updates must be a JSON object, got {other}"),
    }
}

/// Replays a fixed script of results, one per call. The last entry repeats
/// once the script runs out.
pub struct ScriptedHandler {
    script: Mutex<VecDeque<HandlerResult>>,
    last: Mutex<Option<HandlerResult>>,
    calls: AtomicU32,
}

impl ScriptedHandler {
    pub fn new(script: impl IntoIterator<Item = HandlerResult>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    /// Fails transiently `n` times, then succeeds with `then`.
    pub fn transient_then(n: usize, then: Updates) -> Self {
        let mut script: Vec<HandlerResult> = (1..=n)
            .map(|i| Err(HandlerError::transient(format!("transient failure {}", i))))
            .collect();
        script.push(Ok(then));
        Self::new(script)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> HandlerResult {
        let mut script = self.script.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        if let Some(result) = script.pop_front() {
            *last = Some(result.clone());
            return result;
        }
        last.clone()
            .unwrap_or_else(|| Err(HandlerError::fatal("script exhausted")))
    }
}

impl NodeHandler for ScriptedHandler {
    fn handle<'a>(
        &'a self,
        _ctx: &'a ExecutionContext,
        _node: &'a NodeSpec,
    ) -> BoxFuture<'a, HandlerResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = self.next();
        Box::pin(async move { result })
    }
}

/// Always returns the same updates.
pub struct StaticHandler {
    updates: Updates,
}

impl StaticHandler {
    pub fn new(updates: Updates) -> Self {
        Self { updates }
    }
}

impl NodeHandler for StaticHandler {
    fn handle<'a>(
        &'a self,
        _ctx: &'a ExecutionContext,
        _node: &'a NodeSpec,
    ) -> BoxFuture<'a, HandlerResult> {
        let updates = self.updates.clone();
        Box::pin(async move { Ok(updates) })
    }
}

/// Records which nodes ran, in start order, and the peak number of
/// concurrently running calls. Writes `"<node id>_done": true`.
pub struct RecordingHandler {
    delay: Duration,
    started: Mutex<Vec<String>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            started: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeHandler for RecordingHandler {
    fn handle<'a>(
        &'a self,
        _ctx: &'a ExecutionContext,
        node: &'a NodeSpec,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            self.started.lock().unwrap().push(node.id.clone());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);
            let mut out = Updates::new();
            out.insert(format!("{}_done", node.id), Value::Bool(true));
            Ok(out)
        })
    }
}

/// Write `content` to a temp file ending in `.{extension}`.
pub fn write_spec_file(content: &str, extension: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .prefix("ordra-spec-")
        .suffix(&format!(".{}", extension))
        .tempfile()
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Order-intake workflow: ingest, classify, extract, validate in parallel,
/// decide, then post only for gold-tier customers.
pub const ORDER_INTAKE_YAML: &str = r#"
dag_name: order_intake
defaults:
  retry: { max_attempts: 2, backoff_seconds: [0] }
  timeout_seconds: 20
nodes:
  - id: ingest
    type: tool
    handler: email.ingest
    outputs: [email]
  - id: classify
    handler: customer.classify
    deps: [ingest]
    outputs: [customer_id, trust_tier]
  - id: extract
    type: agent
    handler: po.extract
    deps: [ingest]
    outputs: [order]
  - id: credit
    handler: validate.credit
    deps: [classify, extract]
    outputs: [validation]
  - id: atp
    handler: validate.atp
    deps: [classify, extract]
    outputs: [validation]
  - id: decide
    handler: decide
    deps: [credit, atp]
    outputs: [decision]
  - id: post
    handler: erp.post
    deps: [decide]
    when: "trust_tier == 'GOLD' and decision.action in ['POST', 'AUTO']"
    retry: { max_attempts: 3, backoff_seconds: [0, 0] }
    outputs: [erp_document]
"#;

/// Diamond `a -> {b, c} -> d` in TOML.
pub const DIAMOND_TOML: &str = r#"
dag_name = "diamond"

[defaults]
timeout_seconds = 5

[[nodes]]
id = "a"
handler = "record"

[[nodes]]
id = "b"
handler = "record"
deps = ["a"]

[[nodes]]
id = "c"
handler = "record"
deps = ["a"]

[[nodes]]
id = "d"
handler = "record"
deps = ["b", "c"]
"#;

/// Three-node cycle behind a valid root.
pub const CYCLIC_JSON: &str = r#"{
  "dag_name": "cyclic",
  "nodes": [
    {"id": "root", "handler": "noop"},
    {"id": "x", "handler": "noop", "deps": ["root", "z"]},
    {"id": "y", "handler": "noop", "deps": ["x"]},
    {"id": "z", "handler": "noop", "deps": ["y"]}
  ]
}"#;
