//! Model conversion
//!
//! Models are any serde types that encode to a JSON object. Dates go
//! through chrono's serde support and land in the database as ISO-8601
//! strings. Decoding is per node and fallible: a node that does not fit the
//! model is reported in [`Response::failures`], never replaced with a
//! default value.

use super::snapshot::DataSnapshot;
use crate::error::{ConfigError, FirebaseError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Backend key paired with its decoded value
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    /// Key of the node in its parent
    pub key: String,
    /// Decoded model
    pub value: T,
}

/// A node that could not be decoded
#[derive(Debug)]
pub struct DecodeFailure {
    /// Key of the node in its parent
    pub key: String,
    /// Why decoding failed
    pub error: serde_json::Error,
}

impl From<DecodeFailure> for FirebaseError {
    fn from(failure: DecodeFailure) -> Self {
        FirebaseError::Decoding {
            key: failure.key,
            source: failure.error,
        }
    }
}

/// Result of one read delivery
#[derive(Debug)]
pub struct Response<T> {
    /// Successfully decoded nodes, in backend order
    pub items: Vec<Envelope<T>>,
    /// Nodes that did not fit the model
    pub failures: Vec<DecodeFailure>,
}

impl<T> Default for Response<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> Response<T> {
    /// Number of decoded items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if nothing decoded
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Check if every node decoded
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Decoded values without their keys
    pub fn values(self) -> Vec<T> {
        self.items.into_iter().map(|envelope| envelope.value).collect()
    }

    /// The items, or the first decode failure as an error
    pub fn into_result(mut self) -> Result<Vec<Envelope<T>>, FirebaseError> {
        if self.failures.is_empty() {
            return Ok(self.items);
        }
        Err(self.failures.swap_remove(0).into())
    }
}

impl<T: DeserializeOwned> Response<T> {
    fn push(&mut self, key: String, value: Value) {
        match decode(value) {
            Ok(value) => self.items.push(Envelope { key, value }),
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "Failed to decode node");
                self.failures.push(DecodeFailure { key, error });
            }
        }
    }

    /// Decode each child of `snapshot`, in backend order
    pub fn from_children(snapshot: &DataSnapshot) -> Self {
        let mut response = Self::default();
        for child in snapshot.children() {
            let key = child.key().unwrap_or_default().to_string();
            response.push(key, child.into_value());
        }
        response
    }

    /// Decode the whole of `snapshot` as one record keyed by its own key
    ///
    /// A missing node decodes to nothing.
    pub fn from_record(snapshot: &DataSnapshot) -> Self {
        let mut response = Self::default();
        if !snapshot.exists() {
            return response;
        }
        let key = snapshot.key().unwrap_or_default().to_string();
        response.push(key, snapshot.value().clone());
        response
    }

    /// Decode the given nodes
    pub fn from_nodes(nodes: Vec<DataSnapshot>) -> Self {
        let mut response = Self::default();
        for node in nodes {
            let key = node.key().unwrap_or_default().to_string();
            response.push(key, node.into_value());
        }
        response
    }
}

/// Encode a model into a key-value map
///
/// Fails with [`ConfigError::NotAnObject`] for models that serialize to
/// anything other than an object.
pub fn to_map<T: Serialize + ?Sized>(value: &T) -> Result<Map<String, Value>, FirebaseError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(ConfigError::NotAnObject.into()),
    }
}

/// Decode a model from a raw value
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(value)
}
