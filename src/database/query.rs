//! Ordering and filtering
//!
//! Queries order a node's children by a named child field and keep those
//! whose field falls inside optional bounds. The comparison rules are the
//! backend's: `null < false < true < numbers < strings < objects`, ties
//! broken by key, and keys that look like 32-bit integers sort numerically
//! before all other keys.

use crate::error::{ConfigError, FirebaseError};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Upper bound appended to a prefix to select every string sharing it
pub const PREFIX_UPPER_BOUND: char = '\u{f8ff}';

/// Filter applied after ordering
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Ordered values starting with the given string
    Prefix(String),
    /// Ordered values greater than or equal to the bound
    StartsAt(Value),
    /// Ordered values less than or equal to the bound
    EndsAt(Value),
    /// Ordered values equal to the given value
    Equals(Value),
    /// Ordered values inside the inclusive range
    Range(Value, Value),
}

impl Filter {
    /// Prefix filter
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    /// Range filter
    pub fn range(start: impl Into<Value>, end: impl Into<Value>) -> Self {
        Self::Range(start.into(), end.into())
    }
}

/// Caller-facing listing options
///
/// Both fields must be present for a listing to run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListOptions {
    /// Child field to order by
    pub order_by: Option<String>,
    /// Filter on the ordered field
    pub filter: Option<Filter>,
}

impl ListOptions {
    /// Options ordering by `key` and filtering with `filter`
    pub fn new(order_by: impl Into<String>, filter: Filter) -> Self {
        Self {
            order_by: Some(order_by.into()),
            filter: Some(filter),
        }
    }

    /// Validate and lower into a backend query
    pub fn into_query(self) -> Result<QuerySpec, FirebaseError> {
        let order_by = self.order_by.ok_or(ConfigError::MissingOrderKey)?;
        if order_by.is_empty() {
            return Err(ConfigError::MissingOrderKey.into());
        }
        let filter = self.filter.ok_or(ConfigError::MissingFilter)?;
        Ok(QuerySpec::ordered_by(order_by).with_filter(filter))
    }
}

/// Query as sent to a backend
///
/// The default query reads the node as-is, children ordered by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    /// Child field to order by, key order when absent
    pub order_by: Option<String>,
    /// Inclusive lower bound on the ordered field
    pub start_at: Option<Value>,
    /// Inclusive upper bound on the ordered field
    pub end_at: Option<Value>,
    /// Exact match on the ordered field
    pub equal_to: Option<Value>,
}

impl QuerySpec {
    /// Query ordering by a child field with no bounds
    pub fn ordered_by(child: impl Into<String>) -> Self {
        Self {
            order_by: Some(child.into()),
            ..Self::default()
        }
    }

    /// Apply a filter's bounds
    ///
    /// # Example
    /// ```
    /// use firebase_kit::database::{Filter, QuerySpec};
    /// use serde_json::json;
    ///
    /// let query = QuerySpec::ordered_by("name").with_filter(Filter::prefix("ab"));
    /// assert_eq!(query.start_at, Some(json!("ab")));
    /// assert_eq!(query.end_at, Some(json!("ab\u{f8ff}")));
    /// ```
    pub fn with_filter(mut self, filter: Filter) -> Self {
        match filter {
            Filter::Prefix(prefix) => {
                let upper = format!("{prefix}{PREFIX_UPPER_BOUND}");
                self.start_at = Some(Value::String(prefix));
                self.end_at = Some(Value::String(upper));
            }
            Filter::StartsAt(start) => self.start_at = Some(start),
            Filter::EndsAt(end) => self.end_at = Some(end),
            Filter::Equals(value) => self.equal_to = Some(value),
            Filter::Range(start, end) => {
                self.start_at = Some(start);
                self.end_at = Some(end);
            }
        }
        self
    }

    /// Check if the query has any bounds
    pub fn is_filtered(&self) -> bool {
        self.start_at.is_some() || self.end_at.is_some() || self.equal_to.is_some()
    }

    /// Check if the query reads the node unmodified
    pub fn is_default(&self) -> bool {
        self.order_by.is_none() && !self.is_filtered()
    }

    /// Value a child is ordered by under this query
    pub fn sort_value<'a>(&self, child: &'a Value) -> &'a Value {
        match &self.order_by {
            Some(field) => child.get(field).unwrap_or(&Value::Null),
            None => &Value::Null,
        }
    }

    /// Check if a child passes the bounds
    pub fn matches(&self, child: &Value) -> bool {
        let value = self.sort_value(child);
        if let Some(equal) = &self.equal_to {
            if compare_values(value, equal) != Ordering::Equal {
                return false;
            }
        }
        if let Some(start) = &self.start_at {
            if compare_values(value, start) == Ordering::Less {
                return false;
            }
        }
        if let Some(end) = &self.end_at {
            if compare_values(value, end) == Ordering::Greater {
                return false;
            }
        }
        true
    }

    /// Keep the children of `node` that pass the bounds
    ///
    /// Unfiltered queries, and leaves, are returned unchanged.
    pub fn apply(&self, node: Value) -> Value {
        if !self.is_filtered() {
            return node;
        }
        match node {
            Value::Object(children) => {
                let kept: Map<String, Value> = children
                    .into_iter()
                    .filter(|(_, child)| self.matches(child))
                    .collect();
                if kept.is_empty() {
                    Value::Null
                } else {
                    Value::Object(kept)
                }
            }
            other => other,
        }
    }
}

/// Rank of a value's type in backend ordering
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) | Value::Object(_) => 5,
    }
}

/// Compare two values with backend ordering rules
///
/// Objects compare equal to each other; callers break the tie by key.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let by_rank = type_rank(a).cmp(&type_rank(b));
    if by_rank != Ordering::Equal {
        return by_rank;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Compare two child keys with backend ordering rules
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    match (int_key(a), int_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn int_key(key: &str) -> Option<i32> {
    // "007" or "+1" are plain string keys
    let canonical = key == "0"
        || key
            .strip_prefix('-')
            .unwrap_or(key)
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit() && c != '0');
    if !canonical {
        return None;
    }
    key.parse().ok()
}
