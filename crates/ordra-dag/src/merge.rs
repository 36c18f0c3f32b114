use serde_json::Value;
use tracing::warn;

use ordra_core::context::{ExecutionContext, Updates};

/// A key that was already present and was stored under a node-qualified name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    /// Key as the node wrote it (`key`, or `outer.inner` for nested objects).
    pub key: String,
    /// Where the incoming value ended up.
    pub stored_as: String,
}

/// Fold `updates` produced by `node_id` into `base` without overwriting anything.
///
/// New keys are inserted directly. When both sides hold objects the merge goes
/// one level deep and colliding inner keys are renamed `"<node_id>.<inner>"`.
/// Any other collision stores the incoming value at `"<node_id>.<key>"`.
/// If that name is itself taken, the first free `"<node_id>.<key>#<n>"`
/// (n from 2) is used instead.
pub fn merge(base: &mut ExecutionContext, updates: Updates, node_id: &str) -> Vec<Collision> {
    let mut collisions = Vec::new();
    let data = base.data_mut();
    for (key, value) in updates {
        let existing_is_object = match data.get(&key) {
            None => {
                data.insert(key, value);
                continue;
            }
            Some(existing) => existing.is_object(),
        };
        match value {
            Value::Object(incoming) if existing_is_object => {
                let Some(Value::Object(inner)) = data.get_mut(&key) else {
                    continue;
                };
                for (inner_key, inner_value) in incoming {
                    if inner.contains_key(&inner_key) {
                        let qualified =
                            free_key(format!("{}.{}", node_id, inner_key), |k| inner.contains_key(k));
                        collisions.push(Collision {
                            key: format!("{}.{}", key, inner_key),
                            stored_as: format!("{}.{}", key, qualified),
                        });
                        inner.insert(qualified, inner_value);
                    } else {
                        inner.insert(inner_key, inner_value);
                    }
                }
            }
            value => {
                let qualified = free_key(format!("{}.{}", node_id, key), |k| data.contains_key(k));
                collisions.push(Collision {
                    key,
                    stored_as: qualified.clone(),
                });
                data.insert(qualified, value);
            }
        }
    }
    collisions
}

/// `name`, or the first `name#<n>` for which `taken` is false.
pub(crate) fn free_key(name: String, taken: impl Fn(&str) -> bool) -> String {
    if !taken(&name) {
        return name;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}#{}", name, n);
        if !taken(&candidate) {
            warn!(key = %name, stored_as = %candidate, "Qualified key already taken");
            return candidate;
        }
        n += 1;
    }
}
