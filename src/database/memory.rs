//! In-process database backend
//!
//! Keeps the whole tree as one JSON value and pushes snapshots to listeners
//! whenever their (filtered) view changes. Used as the test double for the
//! façade and handy for local development.

use super::backend::{DatabaseBackend, SnapshotStream};
use super::path::DatabasePath;
use super::query::QuerySpec;
use super::snapshot::DataSnapshot;
use super::tree;
use crate::error::FirebaseError;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Shared in-memory tree database
///
/// Clones share the same tree.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    state: Mutex<MemoryState>,
    calls: AtomicUsize,
}

#[derive(Default)]
struct MemoryState {
    root: Value,
    watchers: Vec<Watcher>,
    fail_next: Option<String>,
    auth_token: Option<String>,
}

struct Watcher {
    path: DatabasePath,
    query: QuerySpec,
    last: Value,
    tx: mpsc::UnboundedSender<Result<DataSnapshot, FirebaseError>>,
}

impl MemoryBackend {
    /// Empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Database seeded with `data` at the root
    pub fn with_data(data: Value) -> Self {
        let state = MemoryState {
            root: tree::normalize(data),
            ..MemoryState::default()
        };
        Self {
            inner: Arc::new(MemoryInner {
                state: Mutex::new(state),
                calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of backend operations issued so far
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Make the next operation fail with `message`
    pub async fn fail_next(&self, message: impl Into<String>) {
        self.inner.state.lock().await.fail_next = Some(message.into());
    }

    /// Terminate every listener with a backend error
    pub async fn break_listeners(&self, message: impl Into<String>) {
        let message = message.into();
        let mut state = self.inner.state.lock().await;
        for watcher in state.watchers.drain(..) {
            let _ = watcher.tx.send(Err(FirebaseError::Backend(message.clone())));
        }
    }

    /// Copy of the whole tree
    pub async fn data(&self) -> Value {
        self.inner.state.lock().await.root.clone()
    }

    /// Number of listeners still attached
    pub async fn listener_count(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        state.watchers.retain(|watcher| !watcher.tx.is_closed());
        state.watchers.len()
    }

    /// Token last passed to `set_auth_token`
    pub async fn auth_token(&self) -> Option<String> {
        self.inner.state.lock().await.auth_token.clone()
    }

    async fn begin(&self) -> Result<tokio::sync::MutexGuard<'_, MemoryState>, FirebaseError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.inner.state.lock().await;
        if let Some(message) = state.fail_next.take() {
            return Err(FirebaseError::Backend(message));
        }
        Ok(state)
    }
}

impl MemoryState {
    fn view(&self, path: &DatabasePath, query: &QuerySpec) -> Value {
        let node = tree::get(&self.root, path.segments())
            .cloned()
            .unwrap_or(Value::Null);
        query.apply(node)
    }

    fn notify(&mut self, changed: &DatabasePath) {
        let mut watchers = std::mem::take(&mut self.watchers);
        watchers.retain_mut(|watcher| {
            if watcher.tx.is_closed() {
                return false;
            }
            if !watcher.path.overlaps(changed) {
                return true;
            }
            let view = self.view(&watcher.path, &watcher.query);
            if view == watcher.last {
                return true;
            }
            watcher.last = view.clone();
            let snapshot = DataSnapshot::with_query(
                watcher.path.key().map(str::to_string),
                view,
                &watcher.query,
            );
            watcher.tx.send(Ok(snapshot)).is_ok()
        });
        self.watchers = watchers;
    }
}

impl DatabaseBackend for MemoryBackend {
    async fn get(
        &self,
        path: &DatabasePath,
        query: &QuerySpec,
    ) -> Result<DataSnapshot, FirebaseError> {
        let state = self.begin().await?;
        let value = state.view(path, query);
        Ok(DataSnapshot::with_query(path.key().map(str::to_string), value, query))
    }

    async fn set(&self, path: &DatabasePath, value: Value) -> Result<(), FirebaseError> {
        let mut state = self.begin().await?;
        tree::set(&mut state.root, path.segments(), value);
        state.notify(path);
        Ok(())
    }

    async fn update(
        &self,
        path: &DatabasePath,
        changes: Map<String, Value>,
    ) -> Result<(), FirebaseError> {
        let mut state = self.begin().await?;
        tree::merge(&mut state.root, path.segments(), &changes);
        state.notify(path);
        Ok(())
    }

    async fn remove(&self, path: &DatabasePath) -> Result<(), FirebaseError> {
        let mut state = self.begin().await?;
        tree::remove(&mut state.root, path.segments());
        state.notify(path);
        Ok(())
    }

    async fn listen(
        &self,
        path: &DatabasePath,
        query: &QuerySpec,
    ) -> Result<SnapshotStream, FirebaseError> {
        let mut state = self.begin().await?;
        let (tx, rx) = mpsc::unbounded_channel();

        let view = state.view(path, query);
        let initial = DataSnapshot::with_query(path.key().map(str::to_string), view.clone(), query);
        let _ = tx.send(Ok(initial));

        state.watchers.push(Watcher {
            path: path.clone(),
            query: query.clone(),
            last: view,
            tx,
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn set_auth_token(&self, token: Option<String>) {
        self.inner.state.lock().await.auth_token = token;
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("calls", &self.calls())
            .finish()
    }
}
