//! Continuous reads
//!
//! Each subscription is one tokio task draining a backend
//! [`SnapshotStream`]. The task selects between the stream and a oneshot
//! cancel signal, cancel first, so cancelling stops every delivery not
//! already running. Tasks unregister themselves when the stream ends.

use super::backend::SnapshotStream;
use super::snapshot::DataSnapshot;
use crate::error::FirebaseError;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

/// Opaque identifier of an active subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    /// Raw numeric id
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Kind of child-level event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildEventKind {
    /// A child appeared
    Added,
    /// A child's value changed
    Changed,
    /// A child disappeared
    Removed,
    /// A changed child now sits after a different sibling
    Moved,
}

/// Children affected by `kind` between two ordered child lists
///
/// Removed children are reported with their previous value; all others
/// with their current one. Results follow the order of `next` (or `prev`
/// for removals).
pub fn diff_children(
    prev: &[DataSnapshot],
    next: &[DataSnapshot],
    kind: ChildEventKind,
) -> Vec<DataSnapshot> {
    let index = |children: &[DataSnapshot]| -> HashMap<String, (usize, Value)> {
        children
            .iter()
            .enumerate()
            .filter_map(|(i, child)| Some((child.key()?.to_string(), (i, child.value().clone()))))
            .collect()
    };
    let before = index(prev);
    let after = index(next);

    let predecessor = |children: &[DataSnapshot], position: usize| -> Option<String> {
        position
            .checked_sub(1)
            .and_then(|p| children.get(p))
            .and_then(|child| child.key().map(str::to_string))
    };

    match kind {
        ChildEventKind::Added => next
            .iter()
            .filter(|child| child.key().is_some_and(|key| !before.contains_key(key)))
            .cloned()
            .collect(),
        ChildEventKind::Removed => prev
            .iter()
            .filter(|child| child.key().is_some_and(|key| !after.contains_key(key)))
            .cloned()
            .collect(),
        ChildEventKind::Changed => next
            .iter()
            .filter(|child| {
                let Some((_, old)) = child.key().and_then(|key| before.get(key)) else {
                    return false;
                };
                old != child.value()
            })
            .cloned()
            .collect(),
        ChildEventKind::Moved => next
            .iter()
            .enumerate()
            .filter(|(position, child)| {
                let Some((old_position, old)) = child.key().and_then(|key| before.get(key)) else {
                    return false;
                };
                old != child.value()
                    && predecessor(prev, *old_position) != predecessor(next, *position)
            })
            .map(|(_, child)| child.clone())
            .collect(),
    }
}

/// Active subscriptions of one database façade
#[derive(Clone, Default)]
pub(crate) struct ListenerRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    active: Mutex<HashMap<ListenerHandle, oneshot::Sender<()>>>,
}

impl ListenerRegistry {
    /// Drive `stream` on a new task, handing every item to `on_item`
    ///
    /// A stream error is delivered once and ends the subscription.
    pub(crate) async fn spawn<F>(
        &self,
        mut stream: SnapshotStream,
        mut on_item: F,
    ) -> ListenerHandle
    where
        F: FnMut(Result<DataSnapshot, FirebaseError>) + Send + 'static,
    {
        let handle = ListenerHandle(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        self.inner.active.lock().await.insert(handle, cancel_tx);

        let registry = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => {
                        tracing::debug!(%handle, "Listener cancelled");
                        break;
                    }
                    item = stream.next() => {
                        match item {
                            Some(Ok(snapshot)) => on_item(Ok(snapshot)),
                            Some(Err(e)) => {
                                tracing::error!(%handle, error = %e, "Listener failed");
                                on_item(Err(e));
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
            registry.inner.active.lock().await.remove(&handle);
        });

        tracing::debug!(%handle, "Listener attached");
        handle
    }

    /// Stop one subscription; returns whether it was active
    pub(crate) async fn cancel(&self, handle: ListenerHandle) -> bool {
        let sender = self.inner.active.lock().await.remove(&handle);
        match sender {
            Some(cancel_tx) => {
                let _ = cancel_tx.send(());
                true
            }
            None => false,
        }
    }

    /// Stop every subscription; returns how many were active
    pub(crate) async fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.inner.active.lock().await.drain().collect();
        let count = drained.len();
        for (_, cancel_tx) in drained {
            let _ = cancel_tx.send(());
        }
        count
    }

    /// Number of active subscriptions
    pub(crate) async fn len(&self) -> usize {
        self.inner.active.lock().await.len()
    }
}
