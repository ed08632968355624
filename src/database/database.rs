//! Data access façade
//!
//! `Database` turns segment lists into paths, models into key-value maps,
//! and backend snapshots back into typed [`Response`]s. Every operation
//! validates its inputs before the backend sees anything and resolves to
//! exactly one `Result`.

use super::backend::DatabaseBackend;
use super::codec::{to_map, Response};
use super::listener::{diff_children, ChildEventKind, ListenerHandle, ListenerRegistry};
use super::path::{DatabasePath, IntoPath};
use super::push_id;
use super::query::{ListOptions, QuerySpec};
use super::snapshot::DataSnapshot;
use crate::error::{ConfigError, FirebaseError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Callback receiving every delivery of a continuous read
pub type ResponseCallback<T> = Box<dyn FnMut(Result<Response<T>, FirebaseError>) + Send + 'static>;

/// Outcome of a merge update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The backend merged the fields
    Applied,
    /// Nothing to write; the backend was not called
    Skipped,
}

/// How a listing executes
pub enum ListMode<T> {
    /// Read once and return the results
    Once,
    /// Keep delivering results to the callback until cancelled
    Listen(ResponseCallback<T>),
}

impl<T> ListMode<T> {
    /// Continuous mode with `callback`
    pub fn listen<F>(callback: F) -> Self
    where
        F: FnMut(Result<Response<T>, FirebaseError>) + Send + 'static,
    {
        Self::Listen(Box::new(callback))
    }
}

/// Result of a listing
#[derive(Debug)]
pub enum Listing<T> {
    /// One-shot results
    Snapshot(Response<T>),
    /// Handle of the continuous listing
    Listening(ListenerHandle),
}

impl<T> Listing<T> {
    /// One-shot results, if this was a one-shot listing
    pub fn into_response(self) -> Option<Response<T>> {
        match self {
            Self::Snapshot(response) => Some(response),
            Self::Listening(_) => None,
        }
    }

    /// Subscription handle, if this was a continuous listing
    pub fn handle(&self) -> Option<ListenerHandle> {
        match self {
            Self::Snapshot(_) => None,
            Self::Listening(handle) => Some(*handle),
        }
    }
}

/// Typed access to a tree database
///
/// Cheap to clone; clones share the backend and the subscriptions.
///
/// # Example
/// ```no_run
/// # async fn example() -> Result<(), firebase_kit::FirebaseError> {
/// use firebase_kit::database::{Database, MemoryBackend};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct User {
///     name: String,
/// }
///
/// let db = Database::new(MemoryBackend::new());
/// db.create(["users", "42"], &User { name: "Ann".into() }, false).await?;
///
/// let user = db.read_record::<User>(["users", "42"]).await?;
/// assert_eq!(user.items[0].key, "42");
///
/// let users = db.read_once::<User>(["users"]).await?;
/// assert_eq!(users.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct Database<B: DatabaseBackend> {
    inner: Arc<DatabaseInner<B>>,
}

struct DatabaseInner<B> {
    backend: B,
    listeners: ListenerRegistry,
}

impl<B: DatabaseBackend> Clone for Database<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: DatabaseBackend> Database<B> {
    /// Façade over `backend`
    pub fn new(backend: B) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                backend,
                listeners: ListenerRegistry::default(),
            }),
        }
    }

    /// The underlying backend
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Write `value` at `path`, or at a new chronological key under it
    ///
    /// Returns the path actually written.
    pub async fn create<T>(
        &self,
        path: impl IntoPath,
        value: &T,
        generate_key: bool,
    ) -> Result<DatabasePath, FirebaseError>
    where
        T: Serialize + ?Sized,
    {
        let mut path = path.into_path()?;
        let map = to_map(value)?;

        if generate_key {
            path = path.child(push_id::generate())?;
        }

        tracing::debug!(endpoint = %path, "create");
        self.inner.backend.set(&path, Value::Object(map)).await?;
        Ok(path)
    }

    /// Read the children of `path` once
    ///
    /// Each child decodes on its own, one envelope per child in backend
    /// order. Children that do not fit `T` land in [`Response::failures`]
    /// without affecting their siblings.
    pub async fn read_once<T>(&self, path: impl IntoPath) -> Result<Response<T>, FirebaseError>
    where
        T: DeserializeOwned,
    {
        let path = path.into_path()?;
        tracing::debug!(endpoint = %path, "read_once");

        let snapshot = self.inner.backend.get(&path, &QuerySpec::default()).await?;
        Ok(Response::from_children(&snapshot))
    }

    /// Read the node at `path` once as a single record
    ///
    /// Yields one envelope keyed by the last path segment, or nothing when
    /// the node does not exist.
    pub async fn read_record<T>(&self, path: impl IntoPath) -> Result<Response<T>, FirebaseError>
    where
        T: DeserializeOwned,
    {
        let path = path.into_path()?;
        tracing::debug!(endpoint = %path, "read_record");

        let snapshot = self.inner.backend.get(&path, &QuerySpec::default()).await?;
        Ok(Response::from_record(&snapshot))
    }

    /// Read the children of `path` now and after every change
    ///
    /// Decodes like [`Database::read_once`]. A backend error is delivered
    /// once and ends the subscription.
    pub async fn read_continuous<T, F>(
        &self,
        path: impl IntoPath,
        mut callback: F,
    ) -> Result<ListenerHandle, FirebaseError>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(Result<Response<T>, FirebaseError>) + Send + 'static,
    {
        let path = path.into_path()?;
        tracing::debug!(endpoint = %path, "read_continuous");

        let stream = self.inner.backend.listen(&path, &QuerySpec::default()).await?;
        let handle = self
            .inner
            .listeners
            .spawn(stream, move |item| {
                callback(item.map(|snapshot| Response::from_children(&snapshot)))
            })
            .await;
        Ok(handle)
    }

    /// Merge the fields of `value` into the node at `path`
    ///
    /// Siblings not present in `value` are kept. A value that encodes to an
    /// empty map is [`UpdateOutcome::Skipped`] without a backend call.
    pub async fn update<T>(
        &self,
        path: impl IntoPath,
        value: &T,
    ) -> Result<UpdateOutcome, FirebaseError>
    where
        T: Serialize + ?Sized,
    {
        let path = path.into_path()?;
        let map = to_map(value)?;
        if map.is_empty() {
            tracing::debug!(endpoint = %path, "update skipped, nothing to write");
            return Ok(UpdateOutcome::Skipped);
        }

        tracing::debug!(endpoint = %path, fields = map.len(), "update");
        self.inner.backend.update(&path, map).await?;
        Ok(UpdateOutcome::Applied)
    }

    /// Write the same `value` at every path in one atomic update
    ///
    /// Each path's node is replaced; nodes outside the paths are kept.
    /// Nothing is written, and the result is [`UpdateOutcome::Skipped`],
    /// when there are no paths or `value` encodes to an empty map. The root
    /// and paths containing one another are rejected before the backend is
    /// called.
    pub async fn update_many<P, T>(
        &self,
        paths: impl IntoIterator<Item = P>,
        value: &T,
    ) -> Result<UpdateOutcome, FirebaseError>
    where
        P: IntoPath,
        T: Serialize + ?Sized,
    {
        let paths = paths
            .into_iter()
            .map(IntoPath::into_path)
            .collect::<Result<Vec<_>, _>>()?;
        validate_update_paths(&paths)?;
        let map = to_map(value)?;
        if paths.is_empty() || map.is_empty() {
            tracing::debug!("update_many skipped, nothing to write");
            return Ok(UpdateOutcome::Skipped);
        }

        let changes: Map<String, Value> = paths
            .iter()
            .map(|path| (path.segments().join("/"), Value::Object(map.clone())))
            .collect();

        tracing::debug!(paths = changes.len(), "update_many");
        self.inner.backend.update(&DatabasePath::root(), changes).await?;
        Ok(UpdateOutcome::Applied)
    }

    /// Delete the subtree at `path`
    pub async fn delete(&self, path: impl IntoPath) -> Result<(), FirebaseError> {
        let path = path.into_path()?;
        tracing::debug!(endpoint = %path, "delete");
        self.inner.backend.remove(&path).await
    }

    /// Deliver the children of `path` affected by `kind` on every change
    ///
    /// The first delivery reports every existing child as added.
    /// Deliveries with no affected children are not made. Children are in
    /// key order here, so a change never moves one and
    /// [`ChildEventKind::Moved`] is only delivered by
    /// [`Database::listen_ordered_child_events`].
    pub async fn listen_child_events<T, F>(
        &self,
        path: impl IntoPath,
        kind: ChildEventKind,
        callback: F,
    ) -> Result<ListenerHandle, FirebaseError>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(Result<Response<T>, FirebaseError>) + Send + 'static,
    {
        let path = path.into_path()?;
        self.spawn_child_events(path, QuerySpec::default(), kind, callback)
            .await
    }

    /// Like [`Database::listen_child_events`], with children ordered by the
    /// `order_by` field
    ///
    /// A change that shifts a child past its siblings is reported as
    /// [`ChildEventKind::Moved`]. An empty `order_by` fails with
    /// [`ConfigError::MissingOrderKey`](crate::ConfigError::MissingOrderKey).
    pub async fn listen_ordered_child_events<T, F>(
        &self,
        path: impl IntoPath,
        order_by: impl Into<String>,
        kind: ChildEventKind,
        callback: F,
    ) -> Result<ListenerHandle, FirebaseError>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(Result<Response<T>, FirebaseError>) + Send + 'static,
    {
        let path = path.into_path()?;
        let order_by = order_by.into();
        if order_by.is_empty() {
            return Err(ConfigError::MissingOrderKey.into());
        }
        self.spawn_child_events(path, QuerySpec::ordered_by(order_by), kind, callback)
            .await
    }

    async fn spawn_child_events<T, F>(
        &self,
        path: DatabasePath,
        query: QuerySpec,
        kind: ChildEventKind,
        mut callback: F,
    ) -> Result<ListenerHandle, FirebaseError>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(Result<Response<T>, FirebaseError>) + Send + 'static,
    {
        tracing::debug!(endpoint = %path, ?kind, order_by = ?query.order_by, "listen_child_events");

        let stream = self.inner.backend.listen(&path, &query).await?;
        let mut previous: Vec<DataSnapshot> = Vec::new();
        let handle = self
            .inner
            .listeners
            .spawn(stream, move |item| match item {
                Ok(snapshot) => {
                    let current = snapshot.children();
                    let affected = diff_children(&previous, &current, kind);
                    previous = current;
                    if !affected.is_empty() {
                        callback(Ok(Response::from_nodes(affected)));
                    }
                }
                Err(e) => callback(Err(e)),
            })
            .await;
        Ok(handle)
    }

    /// List the children of `path` ordered by a field and filtered
    ///
    /// Both `options.order_by` and `options.filter` are required; missing
    /// either fails before the backend is called. Results decode child by
    /// child in backend order.
    pub async fn list<T>(
        &self,
        path: impl IntoPath,
        options: ListOptions,
        mode: ListMode<T>,
    ) -> Result<Listing<T>, FirebaseError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let path = path.into_path()?;
        let query = options.into_query()?;
        tracing::debug!(endpoint = %path, order_by = ?query.order_by, "list");

        match mode {
            ListMode::Once => {
                let snapshot = self.inner.backend.get(&path, &query).await?;
                Ok(Listing::Snapshot(Response::from_children(&snapshot)))
            }
            ListMode::Listen(mut callback) => {
                let stream = self.inner.backend.listen(&path, &query).await?;
                let handle = self
                    .inner
                    .listeners
                    .spawn(stream, move |item| {
                        callback(item.map(|snapshot| Response::from_children(&snapshot)))
                    })
                    .await;
                Ok(Listing::Listening(handle))
            }
        }
    }

    /// Stop one subscription; returns whether it was active
    pub async fn cancel_subscription(&self, handle: ListenerHandle) -> bool {
        self.inner.listeners.cancel(handle).await
    }

    /// Stop every subscription; returns how many were active
    pub async fn cancel_all_subscriptions(&self) -> usize {
        let count = self.inner.listeners.cancel_all().await;
        tracing::debug!(count, "All listeners cancelled");
        count
    }

    /// Number of active subscriptions
    pub async fn active_subscriptions(&self) -> usize {
        self.inner.listeners.len().await
    }
}

/// Reject paths a root merge would apply destructively
fn validate_update_paths(paths: &[DatabasePath]) -> Result<(), FirebaseError> {
    if paths.iter().any(DatabasePath::is_root) {
        return Err(ConfigError::RootUpdatePath.into());
    }
    for (i, first) in paths.iter().enumerate() {
        for second in &paths[i + 1..] {
            if first.overlaps(second) {
                let (outer, inner) = if first.is_ancestor_of(second) {
                    (first, second)
                } else {
                    (second, first)
                };
                return Err(ConfigError::OverlappingPaths {
                    first: outer.to_string(),
                    second: inner.to_string(),
                }
                .into());
            }
        }
    }
    Ok(())
}

impl<B: DatabaseBackend + std::fmt::Debug> std::fmt::Debug for Database<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("backend", &self.inner.backend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryBackend;
    use crate::database::query::Filter;
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        name: String,
    }

    fn ann() -> User {
        User {
            name: "Ann".to_string(),
        }
    }

    fn database() -> Database<MemoryBackend> {
        Database::new(MemoryBackend::new())
    }

    #[tokio::test]
    async fn test_create_then_read_record() {
        let db = database();
        db.create(["users", "42"], &ann(), false).await.unwrap();

        let response = db.read_record::<User>(["users", "42"]).await.unwrap();

        assert_eq!(response.len(), 1);
        assert_eq!(response.items[0].key, "42");
        assert_eq!(response.items[0].value, ann());

        let users = db.read_once::<User>(["users"]).await.unwrap();
        assert_eq!(users.items[0].key, "42");
        assert_eq!(users.items[0].value, ann());
    }

    #[tokio::test]
    async fn test_read_once_keeps_good_children_beside_corrupt_one() {
        let db = Database::new(MemoryBackend::with_data(json!({"users": {
            "1": {"name": "Ann"},
            "2": {"name": "Bob"},
            "3": "corrupt",
        }})));

        let response = db.read_once::<User>(["users"]).await.unwrap();

        let keys: Vec<_> = response.items.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["1", "2"]);
        let failed: Vec<_> = response.failures.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(failed, ["3"]);
    }

    #[derive(Debug, Deserialize)]
    struct Profile {
        address: serde_json::Map<String, Value>,
        prefs: serde_json::Map<String, Value>,
    }

    #[tokio::test]
    async fn test_read_record_with_object_fields() {
        let db = Database::new(MemoryBackend::with_data(json!({"profiles": {"42": {
            "address": {"city": "Kyiv"},
            "prefs": {"dark": true},
        }}})));

        let response = db.read_record::<Profile>(["profiles", "42"]).await.unwrap();

        assert!(response.is_complete());
        assert_eq!(response.len(), 1);
        assert_eq!(response.items[0].key, "42");
        assert_eq!(response.items[0].value.address["city"], json!("Kyiv"));
        assert_eq!(response.items[0].value.prefs["dark"], json!(true));
    }

    #[tokio::test]
    async fn test_read_once_collection() {
        let db = Database::new(MemoryBackend::with_data(json!({"users": {
            "1": {"name": "Ann"},
            "2": {"name": "Bob"},
        }})));

        let names: Vec<String> = db
            .read_once::<User>(["users"])
            .await
            .unwrap()
            .values()
            .into_iter()
            .map(|user| user.name)
            .collect();

        assert_eq!(names, ["Ann", "Bob"]);
    }

    #[tokio::test]
    async fn test_empty_segment_never_reaches_backend() {
        let db = database();

        let err = db.create(["users", ""], &ann(), false).await.unwrap_err();
        assert!(matches!(
            err,
            FirebaseError::Config(ConfigError::EmptyPathSegment { index: 1 })
        ));
        assert!(db.read_once::<User>(["", "42"]).await.is_err());
        assert!(db.delete(["users", ""]).await.is_err());

        assert_eq!(db.backend().calls(), 0);
    }

    #[tokio::test]
    async fn test_create_with_generated_key() {
        let db = database();

        let first = db.create(["users"], &ann(), true).await.unwrap();
        let second = db.create(["users"], &ann(), true).await.unwrap();

        assert_eq!(first.depth(), 2);
        assert!(first.key().unwrap() < second.key().unwrap());
        assert_eq!(db.read_once::<User>(["users"]).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_backend_error_passed_through() {
        let db = database();
        db.backend().fail_next("Permission denied").await;

        let err = db.create(["users", "42"], &ann(), false).await.unwrap_err();

        assert_eq!(err.backend_message(), Some("Permission denied"));
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let db = Database::new(MemoryBackend::with_data(json!({
            "users": {"42": {"name": "Ann", "age": 30}}
        })));

        let outcome = db.update(["users", "42"], &json!({"age": 31})).await.unwrap();

        assert_eq!(outcome, UpdateOutcome::Applied);
        assert_eq!(
            db.backend().data().await,
            json!({"users": {"42": {"name": "Ann", "age": 31}}})
        );
    }

    #[tokio::test]
    async fn test_empty_update_is_skipped() {
        let db = database();

        let outcome = db.update(["users", "42"], &json!({})).await.unwrap();

        assert_eq!(outcome, UpdateOutcome::Skipped);
        assert_eq!(db.backend().calls(), 0);
    }

    #[tokio::test]
    async fn test_update_many_fans_out() {
        let db = database();

        let outcome = db
            .update_many([["inbox", "a", "m1"], ["inbox", "b", "m1"]], &ann())
            .await
            .unwrap();

        assert_eq!(outcome, UpdateOutcome::Applied);
        assert_eq!(db.backend().calls(), 1);
        assert_eq!(
            db.backend().data().await,
            json!({"inbox": {"a": {"m1": {"name": "Ann"}}, "b": {"m1": {"name": "Ann"}}}})
        );

        let none: Vec<DatabasePath> = Vec::new();
        assert_eq!(db.update_many(none, &ann()).await.unwrap(), UpdateOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_update_many_rejects_root_and_overlapping_paths() {
        let seed = json!({"users": {"1": {"name": "Ann"}}, "posts": {"p1": {"name": "hello"}}});
        let db = Database::new(MemoryBackend::with_data(seed.clone()));

        let err = db
            .update_many([DatabasePath::root()], &json!({"x": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, FirebaseError::Config(ConfigError::RootUpdatePath)));

        let err = db
            .update_many(
                [
                    DatabasePath::new(["users", "1", "name"]).unwrap(),
                    DatabasePath::new(["users"]).unwrap(),
                ],
                &ann(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: Update paths 'users' and 'users/1/name' overlap"
        );

        let err = db
            .update_many([["inbox", "a"], ["inbox", "a"]], &ann())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FirebaseError::Config(ConfigError::OverlappingPaths { .. })
        ));

        assert_eq!(db.backend().calls(), 0);
        assert_eq!(db.backend().data().await, seed);
    }

    #[tokio::test]
    async fn test_delete_removes_subtree() {
        let db = Database::new(MemoryBackend::with_data(json!({"users": {"42": {"name": "Ann"}}})));

        db.delete(["users", "42"]).await.unwrap();

        assert!(db.read_record::<User>(["users", "42"]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_requires_order_key_and_filter() {
        let db = database();

        let no_key = ListOptions {
            order_by: None,
            filter: Some(Filter::prefix("a")),
        };
        let err = db.list::<User>(["users"], no_key, ListMode::Once).await.unwrap_err();
        assert!(matches!(err, FirebaseError::Config(ConfigError::MissingOrderKey)));

        let no_filter = ListOptions {
            order_by: Some("name".to_string()),
            filter: None,
        };
        let err = db.list::<User>(["users"], no_filter, ListMode::Once).await.unwrap_err();
        assert!(matches!(err, FirebaseError::Config(ConfigError::MissingFilter)));

        assert_eq!(db.backend().calls(), 0);
    }

    #[tokio::test]
    async fn test_list_prefix_once_in_order() {
        let db = Database::new(MemoryBackend::with_data(json!({"users": {
            "1": {"name": "abe"},
            "2": {"name": "bob"},
            "3": {"name": "abby"},
        }})));

        let listing = db
            .list::<User>(["users"], ListOptions::new("name", Filter::prefix("ab")), ListMode::Once)
            .await
            .unwrap();

        assert!(listing.handle().is_none());
        let response = listing.into_response().unwrap();
        let keys: Vec<_> = response.items.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["3", "1"]);
    }

    #[tokio::test]
    async fn test_list_listen_redelivers() {
        let db = database();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let listing = db
            .list::<User>(
                ["users"],
                ListOptions::new("name", Filter::Equals(json!("Ann"))),
                ListMode::listen(move |result: Result<Response<User>, FirebaseError>| {
                    let _ = tx.send(result.map(|r| r.len()).unwrap_or(usize::MAX));
                }),
            )
            .await
            .unwrap();
        assert!(listing.handle().is_some());

        assert_eq!(rx.recv().await, Some(0));
        db.create(["users", "1"], &ann(), false).await.unwrap();
        assert_eq!(rx.recv().await, Some(1));
    }

    #[tokio::test]
    async fn test_read_continuous_follows_changes() {
        let db = database();
        let (tx, mut rx) = mpsc::unbounded_channel();

        db.read_continuous::<User, _>(["users"], move |result| {
            let _ = tx.send(result.unwrap().len());
        })
        .await
        .unwrap();

        assert_eq!(rx.recv().await, Some(0));
        db.create(["users", "1"], &ann(), false).await.unwrap();
        assert_eq!(rx.recv().await, Some(1));
        db.create(["users", "2"], &ann(), false).await.unwrap();
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_read_continuous_reports_stream_error() {
        let db = database();
        let (tx, mut rx) = mpsc::unbounded_channel();

        db.read_continuous::<User, _>(["users"], move |result| {
            let _ = tx.send(result.err().and_then(|e| e.backend_message().map(str::to_string)));
        })
        .await
        .unwrap();
        assert_eq!(rx.recv().await, Some(None));

        db.backend().break_listeners("Permission denied").await;

        assert_eq!(rx.recv().await, Some(Some("Permission denied".to_string())));
        assert_eq!(rx.recv().await, None);
        assert_eq!(db.active_subscriptions().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_all_stops_both_listeners() {
        let db = database();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for tag in ["first", "second"] {
            let tx = tx.clone();
            db.read_continuous::<User, _>(["users"], move |_| {
                let _ = tx.send(tag);
            })
            .await
            .unwrap();
        }
        drop(tx);

        // Initial deliveries
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert_eq!(db.active_subscriptions().await, 2);

        assert_eq!(db.cancel_all_subscriptions().await, 2);
        db.create(["users", "1"], &ann(), false).await.unwrap();

        // Both tasks exit without delivering, dropping the last senders
        assert_eq!(rx.recv().await, None);
        assert_eq!(db.active_subscriptions().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_subscription_only_stops_one() {
        let db = database();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut handles = Vec::new();
        for tag in ["kept", "cancelled"] {
            let tx = tx.clone();
            let handle = db
                .read_continuous::<User, _>(["users"], move |_| {
                    let _ = tx.send(tag);
                })
                .await
                .unwrap();
            handles.push(handle);
        }
        let _ = rx.recv().await;
        let _ = rx.recv().await;

        assert!(db.cancel_subscription(handles[1]).await);
        db.create(["users", "1"], &ann(), false).await.unwrap();

        assert_eq!(rx.recv().await, Some("kept"));
        let late = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(late.is_err(), "cancelled listener delivered {late:?}");
    }

    #[tokio::test]
    async fn test_listen_child_events() {
        let db = Database::new(MemoryBackend::with_data(json!({"users": {"1": {"name": "Ann"}}})));
        let (added_tx, mut added) = mpsc::unbounded_channel();
        let (removed_tx, mut removed) = mpsc::unbounded_channel();

        db.listen_child_events::<User, _>(["users"], ChildEventKind::Added, move |result| {
            for envelope in result.unwrap().items {
                let _ = added_tx.send(envelope.key);
            }
        })
        .await
        .unwrap();
        db.listen_child_events::<User, _>(["users"], ChildEventKind::Removed, move |result| {
            for envelope in result.unwrap().items {
                let _ = removed_tx.send((envelope.key, envelope.value.name));
            }
        })
        .await
        .unwrap();

        assert_eq!(added.recv().await.as_deref(), Some("1"));

        db.create(["users", "2"], &json!({"name": "Bob"}), false).await.unwrap();
        assert_eq!(added.recv().await.as_deref(), Some("2"));

        db.delete(["users", "1"]).await.unwrap();
        assert_eq!(removed.recv().await, Some(("1".to_string(), "Ann".to_string())));
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Player {
        score: i64,
    }

    #[tokio::test]
    async fn test_ordered_child_events_report_moves() {
        let db = Database::new(MemoryBackend::with_data(json!({"players": {
            "a": {"score": 1},
            "b": {"score": 2},
            "c": {"score": 3},
        }})));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let on_moved = move |result: Result<Response<Player>, FirebaseError>| {
            for envelope in result.unwrap().items {
                let _ = tx.send((envelope.key, envelope.value.score));
            }
        };
        db.listen_ordered_child_events(["players"], "score", ChildEventKind::Moved, on_moved)
            .await
            .unwrap();

        // Still first in order, nothing moves
        db.update(["players", "a"], &json!({"score": 0})).await.unwrap();
        db.update(["players", "a"], &json!({"score": 5})).await.unwrap();

        assert_eq!(rx.recv().await, Some(("a".to_string(), 5)));

        let ignore = |_: Result<Response<Player>, FirebaseError>| {};
        let err = db
            .listen_ordered_child_events(["players"], "", ChildEventKind::Moved, ignore)
            .await
            .unwrap_err();
        assert!(matches!(err, FirebaseError::Config(ConfigError::MissingOrderKey)));
    }
}
