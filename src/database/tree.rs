//! JSON tree helpers shared by the in-memory backend and the streaming cache
//!
//! The database tree has no empty objects and no explicit nulls: writing
//! `null` deletes a node, and parents left without children disappear.

use serde_json::{Map, Value};

/// Node at `segments`, if present
pub fn get<'a, S: AsRef<str>>(root: &'a Value, segments: &[S]) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments {
        node = node.as_object()?.get(segment.as_ref())?;
    }
    if node.is_null() {
        return None;
    }
    Some(node)
}

/// Replace the node at `segments` with `value`
///
/// Intermediate nodes are created as objects (replacing any leaf in the
/// way). A `null` value, or an empty object, removes the node.
pub fn set<S: AsRef<str>>(root: &mut Value, segments: &[S], value: Value) {
    let value = normalize(value);

    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    if value.is_null() {
        remove(root, segments);
        return;
    }

    let mut node = root;
    for segment in parents {
        node = ensure_object(node)
            .entry(segment.as_ref().to_string())
            .or_insert(Value::Null);
    }
    ensure_object(node).insert(last.as_ref().to_string(), value);
}

/// Apply each `(relative path, value)` pair of `changes` below `segments`
///
/// Keys may contain `/` to address deeper nodes, the way a backend merge
/// update does.
pub fn merge<S: AsRef<str>>(root: &mut Value, segments: &[S], changes: &Map<String, Value>) {
    for (key, value) in changes {
        let mut target: Vec<&str> = segments.iter().map(AsRef::as_ref).collect();
        target.extend(key.split('/').filter(|part| !part.is_empty()));
        set(root, &target, value.clone());
    }
}

/// Remove the node at `segments` and prune empty ancestors
pub fn remove<S: AsRef<str>>(root: &mut Value, segments: &[S]) {
    let Some((first, rest)) = segments.split_first() else {
        *root = Value::Null;
        return;
    };

    let Some(map) = root.as_object_mut() else {
        return;
    };

    if rest.is_empty() {
        map.remove(first.as_ref());
    } else if let Some(child) = map.get_mut(first.as_ref()) {
        remove(child, rest);
        if child.is_null() || child.as_object().is_some_and(Map::is_empty) {
            map.remove(first.as_ref());
        }
    }

    if map.is_empty() {
        *root = Value::Null;
    }
}

/// Strip nulls and empty objects, recursively
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if cleaned.is_empty() {
                Value::Null
            } else {
                Value::Object(cleaned)
            }
        }
        other => other,
    }
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}
