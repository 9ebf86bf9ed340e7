//! Where observed trees come from.
//!
//! A [`PageSource`] hands out fresh snapshots on demand and pushes a notice
//! whenever the watched subtree mutates. Notices carry no payload beyond a
//! counter; the watcher always re-reads the whole tree.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};

use crate::tracker::WatchScope;
use crate::tree::{DomSnapshot, SnapshotError};

/// Capacity of mutation notice channels. Notices past it are dropped.
pub const NOTICE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationNotice {
    /// Mutation records observed since the previous notice.
    pub records: u64,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("browser error: {0}")]
    Browser(String),
    #[error("page script error: {0}")]
    Script(String),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("page source closed")]
    Closed,
}

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn snapshot(&self) -> Result<DomSnapshot, SourceError>;

    /// Start observing `scope`. Notices stop when the receiver is dropped.
    async fn watch(&self, scope: WatchScope) -> Result<mpsc::Receiver<MutationNotice>, SourceError>;
}

/// In-process source whose tree is replaced by hand. Every replacement
/// notifies all watchers.
#[derive(Debug)]
pub struct MemorySource {
    state: Mutex<MemoryState>,
}

#[derive(Debug)]
struct MemoryState {
    snapshot: DomSnapshot,
    watchers: Vec<mpsc::Sender<MutationNotice>>,
    scopes: Vec<WatchScope>,
}

impl MemorySource {
    pub fn new(snapshot: DomSnapshot) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                snapshot,
                watchers: Vec::new(),
                scopes: Vec::new(),
            }),
        }
    }

    /// Swap in a new tree and notify watchers.
    pub async fn replace(&self, snapshot: DomSnapshot) {
        let mut state = self.state.lock().await;
        state.snapshot = snapshot;
        state.watchers.retain(|sender| {
            !matches!(
                sender.try_send(MutationNotice { records: 1 }),
                Err(TrySendError::Closed(_))
            )
        });
    }

    /// Scopes requested through [`PageSource::watch`], oldest first.
    pub async fn watched_scopes(&self) -> Vec<WatchScope> {
        self.state.lock().await.scopes.clone()
    }
}

#[async_trait]
impl PageSource for MemorySource {
    async fn snapshot(&self) -> Result<DomSnapshot, SourceError> {
        Ok(self.state.lock().await.snapshot.clone())
    }

    async fn watch(&self, scope: WatchScope) -> Result<mpsc::Receiver<MutationNotice>, SourceError> {
        let (tx, rx) = mpsc::channel(NOTICE_CHANNEL_CAPACITY);
        let mut state = self.state.lock().await;
        state.watchers.push(tx);
        state.scopes.push(scope);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{NodeId, ObservedTree, SnapshotElement as E};

    #[tokio::test]
    async fn replace_notifies_watchers_and_serves_new_tree() {
        let source = MemorySource::new(DomSnapshot::from_root(E::new("body").with_id(1)));
        let mut notices = source.watch(WatchScope::Node(NodeId(1))).await.unwrap();

        source
            .replace(DomSnapshot::from_root(E::new("main").with_id(7)))
            .await;

        assert_eq!(notices.recv().await, Some(MutationNotice { records: 1 }));
        let snapshot = source.snapshot().await.unwrap();
        assert_eq!(snapshot.tag_name(NodeId(7)), Some("main"));
        assert_eq!(source.watched_scopes().await, vec![WatchScope::Node(NodeId(1))]);
    }

    #[tokio::test]
    async fn dropped_watchers_are_forgotten() {
        let source = MemorySource::new(DomSnapshot::empty());
        drop(source.watch(WatchScope::Document).await.unwrap());
        source.replace(DomSnapshot::empty()).await;
        assert!(source.state.lock().await.watchers.is_empty());
    }
}
