//! Database snapshots
//!
//! A `DataSnapshot` is what a backend hands back for a read or a listener
//! delivery: the node's key, its JSON value, and the query it was read
//! with, which decides the order its children iterate in.

use super::query::{compare_keys, compare_values, QuerySpec};
use serde_json::Value;
use std::cmp::Ordering;

/// Immutable view of one node
#[derive(Debug, Clone, PartialEq)]
pub struct DataSnapshot {
    key: Option<String>,
    value: Value,
    order_by: Option<String>,
}

impl DataSnapshot {
    /// Snapshot of a node with no query ordering
    pub fn new(key: Option<String>, value: Value) -> Self {
        Self {
            key,
            value,
            order_by: None,
        }
    }

    /// Snapshot read through `query`
    pub fn with_query(key: Option<String>, value: Value, query: &QuerySpec) -> Self {
        Self {
            key,
            value,
            order_by: query.order_by.clone(),
        }
    }

    /// Key of the node, `None` at the root
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Raw value
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Take the raw value
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Check if the node holds data
    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }

    /// Child field the children are ordered by
    pub fn order_by(&self) -> Option<&str> {
        self.order_by.as_deref()
    }

    /// Number of direct children
    pub fn children_count(&self) -> usize {
        self.value.as_object().map_or(0, |map| map.len())
    }

    /// Direct children in backend order
    ///
    /// Leaves have no children.
    pub fn children(&self) -> Vec<DataSnapshot> {
        let Some(map) = self.value.as_object() else {
            return Vec::new();
        };

        let mut children: Vec<(&String, &Value)> = map.iter().collect();
        match &self.order_by {
            None => children.sort_by(|(a, _), (b, _)| compare_keys(a, b)),
            Some(field) => children.sort_by(|(ka, va), (kb, vb)| {
                let a = va.get(field).unwrap_or(&Value::Null);
                let b = vb.get(field).unwrap_or(&Value::Null);
                match compare_values(a, b) {
                    Ordering::Equal => compare_keys(ka, kb),
                    other => other,
                }
            }),
        }

        children
            .into_iter()
            .map(|(key, value)| DataSnapshot {
                key: Some(key.clone()),
                value: value.clone(),
                order_by: None,
            })
            .collect()
    }
}
