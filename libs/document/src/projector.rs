//! Field projection
//!
//! Reduces a document to the branches named by a list of [`FieldPath`]s. Resolution
//! rules, applied segment by segment:
//!
//! - at a sequence, descend into its first element only, repeatedly for nested
//!   sequences (an empty sequence stops the walk)
//! - at a mapping, descend by key
//! - anything else (missing key, scalar before the path is exhausted) abandons that
//!   one path; it contributes nothing and is not an error
//!
//! Resolved values are written back under their full path, creating intermediate
//! mappings as needed and merging paths that share a prefix.

use serde_json::{Map, Value};

use crate::path::FieldPath;

/// Resolve a single path against a document.
///
/// A `null` found at the end of the path is a resolved value.
pub fn resolve<'a>(doc: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.segments() {
        while let Value::Array(items) = current {
            current = items.first()?;
        }
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Project a document onto the requested paths.
///
/// Always returns a mapping; it is empty when no path resolves.
pub fn project(doc: &Value, paths: &[FieldPath]) -> Value {
    let mut out = Map::new();
    for path in paths {
        if let Some(value) = resolve(doc, path) {
            insert_at(&mut out, path.segments(), value.clone());
        }
    }
    Value::Object(out)
}

/// Project every item of a result list.
pub fn project_items(items: &[Value], paths: &[FieldPath]) -> Vec<Value> {
    items.iter().map(|item| project(item, paths)).collect()
}

fn insert_at(target: &mut Map<String, Value>, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut node = target;
    for segment in parents {
        let entry = node
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        node = match entry {
            Value::Object(map) => map,
            // A shorter path already copied this whole branch.
            _ => return,
        };
    }
    node.insert(last.clone(), value);
}
