use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved key under which the executor records run metadata.
pub const DAG_EXEC_KEY: &str = "_dag_exec";

/// Partial context update produced by one node.
pub type Updates = BTreeMap<String, Value>;

/// Key-value store threaded through one run.
///
/// Keys are ordered, so two contexts holding the same entries serialize to
/// identical bytes regardless of insertion order. Values are plain JSON so
/// handler contracts stay checkable with serde.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    data: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context from initial data.
    pub fn from_map(data: BTreeMap<String, Value>) -> Self {
        Self { data }
    }

    /// Build a context from a JSON object. Anything else yields `None`.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self {
                data: map.into_iter().collect(),
            }),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), Value::String(value.into()));
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Resolve a dotted path (`a.b.c`) by walking nested objects.
    ///
    /// Merge collisions are stored under top-level keys that contain dots
    /// (`"<node>.<key>"`), so an exact top-level key is tried when the walk
    /// finds nothing.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        self.walk(path).or_else(|| self.data.get(path))
    }

    fn walk(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.data.get(segments.next()?)?;
        for seg in segments {
            current = current.as_object()?.get(seg)?;
        }
        Some(current)
    }

    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.data
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.data
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.data.clone().into_iter().collect())
    }
}

impl From<BTreeMap<String, Value>> for ExecutionContext {
    fn from(data: BTreeMap<String, Value>) -> Self {
        Self::from_map(data)
    }
}

/// Truthiness of a resolved value; absent counts as false.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

/// String form used by guard comparisons.
///
/// Absent and null render as `None`, booleans as `True`/`False`, so guard
/// literals written against either spelling of a spec keep matching.
pub fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "None".to_string(),
        Some(Value::Bool(true)) => "True".to_string(),
        Some(Value::Bool(false)) => "False".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> ExecutionContext {
        ExecutionContext::from_json(value).unwrap()
    }

    #[test]
    fn test_basic_operations() {
        let mut ctx = ExecutionContext::new();
        ctx.set_str("customer", "ACME");
        ctx.set("lines", json!(3));

        assert_eq!(ctx.get_str("customer"), Some("ACME"));
        assert_eq!(ctx.get("lines"), Some(&json!(3)));
        assert_eq!(ctx.get("missing"), None);
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        assert!(ExecutionContext::from_json(json!([1, 2])).is_none());
        assert!(ExecutionContext::from_json(json!({})).unwrap().is_empty());
    }

    #[test]
    fn test_lookup_dotted_path() {
        let ctx = ctx(json!({
            "decision": {"action": "AUTO_POST", "meta": {"score": 0.9}},
            "extract.issues": ["qualified"]
        }));
        assert_eq!(ctx.lookup("decision.action"), Some(&json!("AUTO_POST")));
        assert_eq!(ctx.lookup("decision.meta.score"), Some(&json!(0.9)));
        assert_eq!(ctx.lookup("decision.missing"), None);
        assert_eq!(ctx.lookup("decision.action.deeper"), None);
        assert_eq!(ctx.lookup("extract.issues"), Some(&json!(["qualified"])));
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&Value::Null)));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(!is_truthy(Some(&json!(0.0))));
        assert!(!is_truthy(Some(&json!(""))));
        assert!(!is_truthy(Some(&json!([]))));
        assert!(!is_truthy(Some(&json!({}))));
        assert!(is_truthy(Some(&json!(true))));
        assert!(is_truthy(Some(&json!(-1))));
        assert!(is_truthy(Some(&json!("no"))));
        assert!(is_truthy(Some(&json!([0]))));
    }

    #[test]
    fn test_render() {
        assert_eq!(render(None), "None");
        assert_eq!(render(Some(&Value::Null)), "None");
        assert_eq!(render(Some(&json!("GOLD"))), "GOLD");
        assert_eq!(render(Some(&json!(42))), "42");
        assert_eq!(render(Some(&json!(true))), "True");
        assert_eq!(render(Some(&json!(false))), "False");
        assert_eq!(render(Some(&json!([1, "a"]))), r#"[1,"a"]"#);
    }

    #[test]
    fn test_serialization_is_key_ordered() {
        let mut a = ExecutionContext::new();
        a.set("z", json!(1));
        a.set("a", json!(2));
        let mut b = ExecutionContext::new();
        b.set("a", json!(2));
        b.set("z", json!(1));
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
        assert_eq!(serde_json::to_string(&a).unwrap(), r#"{"a":2,"z":1}"#);
    }
}
