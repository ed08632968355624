//! Server-Sent Events for streaming reads
//!
//! The REST API streams a node as `put` and `patch` events, each carrying
//! a path relative to the watched node and the data to write there.
//! `SseDecoder` turns raw bytes into events; `StreamCache` replays them
//! into a local copy of the node.

use super::tree;
use crate::error::FirebaseError;
use serde::Deserialize;
use serde_json::Value;

/// One decoded SSE message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name, `message` when the server sent none
    pub event: String,
    /// Data lines joined with `\n`
    pub data: String,
}

/// Largest event the decoder buffers, in bytes
pub const MAX_EVENT_BYTES: usize = 64 * 1024 * 1024;

/// Incremental SSE decoder
///
/// Chunks may split lines (and UTF-8 sequences) anywhere. An event that
/// grows past the size limit, complete or not, is an error.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
    limit: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_EVENT_BYTES)
    }
}

impl SseDecoder {
    /// New decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder rejecting events larger than `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            event: None,
            data: Vec::new(),
            data_len: 0,
            limit,
        }
    }

    /// Feed a chunk, returning every event it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, FirebaseError> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
            self.check_limit(self.data_len)?;
        }
        // What is left is an unfinished line of the current event
        self.check_limit(self.buffer.len() + self.data_len)?;
        Ok(events)
    }

    fn check_limit(&mut self, pending: usize) -> Result<(), FirebaseError> {
        if pending <= self.limit {
            return Ok(());
        }
        self.buffer.clear();
        self.event = None;
        self.data.clear();
        self.data_len = 0;
        Err(FirebaseError::internal(format!(
            "Event stream message exceeds {} bytes",
            self.limit
        )))
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.event.is_none() && self.data.is_empty() {
                return None;
            }
            self.data_len = 0;
            return Some(SseEvent {
                event: self.event.take().unwrap_or_else(|| "message".to_string()),
                data: std::mem::take(&mut self.data).join("\n"),
            });
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data_len += value.len() + 1;
                self.data.push(value.to_string());
            }
            _ => {}
        }
        None
    }
}

/// Database event carried by an SSE message
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Replace the node at `path`
    Put {
        /// Path relative to the watched node
        path: String,
        /// New value
        data: Value,
    },
    /// Merge children into the node at `path`
    Patch {
        /// Path relative to the watched node
        path: String,
        /// Children to merge
        data: Value,
    },
    /// Connection heartbeat
    KeepAlive,
    /// Security rules no longer allow the read
    Cancel(String),
    /// The auth credential expired or was revoked
    AuthRevoked(String),
}

#[derive(Deserialize)]
struct PathData {
    path: String,
    data: Value,
}

impl ServerEvent {
    /// Interpret an SSE message, `None` for events this client ignores
    pub fn parse(event: &SseEvent) -> Result<Option<Self>, FirebaseError> {
        let parsed = match event.event.as_str() {
            "put" => {
                let PathData { path, data } = serde_json::from_str(&event.data)?;
                Self::Put { path, data }
            }
            "patch" => {
                let PathData { path, data } = serde_json::from_str(&event.data)?;
                Self::Patch { path, data }
            }
            "keep-alive" => Self::KeepAlive,
            "cancel" => Self::Cancel(reason(&event.data, "Permission denied")),
            "auth_revoked" => Self::AuthRevoked(reason(&event.data, "Auth token revoked")),
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }
}

fn reason(data: &str, fallback: &str) -> String {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::String(message)) => message,
        _ => fallback.to_string(),
    }
}

/// Local copy of a watched node
#[derive(Debug, Default)]
pub struct StreamCache {
    value: Value,
}

impl StreamCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Apply a `put` or `patch`; returns whether the node changed
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        let before = self.value.clone();
        match event {
            ServerEvent::Put { path, data } => {
                tree::set(&mut self.value, &segments(path), data.clone());
            }
            ServerEvent::Patch { path, data } => {
                if let Some(changes) = data.as_object() {
                    tree::merge(&mut self.value, &segments(path), changes);
                }
            }
            _ => return false,
        }
        self.value != before
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}
