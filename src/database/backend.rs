//! Database backend seam
//!
//! The façade never talks to a network directly; it drives a
//! `DatabaseBackend`. [`RestBackend`](super::rest::RestBackend) talks to a
//! real database, [`MemoryBackend`](super::memory::MemoryBackend) keeps the
//! tree in process.

use super::path::DatabasePath;
use super::query::QuerySpec;
use super::snapshot::DataSnapshot;
use crate::error::FirebaseError;
use futures::Stream;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;

/// Stream of snapshots for one continuous read
///
/// Each item is the full, current state of the watched node. Dropping the
/// stream detaches the listener on the backend side.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Result<DataSnapshot, FirebaseError>> + Send>>;

/// Tree-structured remote storage
pub trait DatabaseBackend: Send + Sync + 'static {
    /// Read the node at `path` once
    fn get(
        &self,
        path: &DatabasePath,
        query: &QuerySpec,
    ) -> impl Future<Output = Result<DataSnapshot, FirebaseError>> + Send;

    /// Replace the node at `path`
    fn set(
        &self,
        path: &DatabasePath,
        value: Value,
    ) -> impl Future<Output = Result<(), FirebaseError>> + Send;

    /// Merge `changes` into the node at `path`
    ///
    /// Keys may contain `/` to address deeper nodes. Siblings not named in
    /// `changes` are left alone.
    fn update(
        &self,
        path: &DatabasePath,
        changes: Map<String, Value>,
    ) -> impl Future<Output = Result<(), FirebaseError>> + Send;

    /// Delete the subtree at `path`
    fn remove(&self, path: &DatabasePath) -> impl Future<Output = Result<(), FirebaseError>> + Send;

    /// Watch the node at `path`
    ///
    /// The first item is the current state; later items follow every change.
    fn listen(
        &self,
        path: &DatabasePath,
        query: &QuerySpec,
    ) -> impl Future<Output = Result<SnapshotStream, FirebaseError>> + Send;

    /// Credential used for later requests, `None` for unauthenticated access
    fn set_auth_token(&self, _token: Option<String>) -> impl Future<Output = ()> + Send {
        async {}
    }
}
