//! `fields` option: keep only the requested paths of a payload.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Wildcard segment matching every key of an object.
const WILDCARD: &str = "*";

#[derive(Debug, Default)]
struct PathTree {
    children: BTreeMap<String, PathTree>,
}

impl PathTree {
    fn build(paths: &[String]) -> Self {
        let mut root = Self::default();
        for path in paths {
            let mut node = &mut root;
            for segment in path.split('.').map(str::trim).filter(|s| !s.is_empty()) {
                // Modifiers such as `:excerpt(200)` are not supported; keep the field.
                let key = segment.split(':').next().unwrap_or(segment);
                node = node.children.entry(key.to_string()).or_default();
            }
        }
        root
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Keep the dot separated `fields` of `value`, e.g. `record.id`,
/// `record.expand.author.name` or `record.*`. Arrays apply the same paths
/// to every element. An empty list returns the value unchanged.
pub fn pick(value: &Value, fields: &[String]) -> Value {
    if fields.is_empty() {
        return value.clone();
    }
    pick_tree(value, &PathTree::build(fields))
}

fn pick_tree(value: &Value, tree: &PathTree) -> Value {
    if tree.is_leaf() {
        return value.clone();
    }
    match value {
        Value::Object(map) => {
            let wildcard = tree.children.get(WILDCARD);
            let mut out = Map::new();
            for (key, child) in map {
                if let Some(subtree) = tree.children.get(key).or(wildcard) {
                    out.insert(key.clone(), pick_tree(child, subtree));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|item| pick_tree(item, tree)).collect()),
        scalar => scalar.clone(),
    }
}
