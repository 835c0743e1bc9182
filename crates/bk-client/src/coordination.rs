//! Coordination-service seam.
//!
//! The client needs four things from the coordination service: the live
//! bookie list, fresh ledger ids, and a place to read and write metadata
//! records. [`InMemoryCoordinator`] keeps all of it in process, keyed by the
//! same hierarchical ledger paths a ZooKeeper deployment uses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bk_types::{ledger_path, BookieAddr, LedgerId};
use bytes::Bytes;
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// Child of the available-bookies node that groups read-only bookies.
const READONLY_MARKER: &str = "readonly";

#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Writable bookies currently registered.
    async fn list_bookies(&self) -> ClientResult<Vec<BookieAddr>>;

    /// A ledger id never handed out before.
    async fn allocate_ledger_id(&self) -> ClientResult<LedgerId>;

    /// The raw metadata record stored for `ledger_id`.
    async fn read_metadata(&self, ledger_id: LedgerId) -> ClientResult<Bytes>;

    /// Store a new metadata record; fails with `MetadataExists` if present.
    async fn write_metadata(&self, ledger_id: LedgerId, data: Bytes) -> ClientResult<()>;
}

/// A [`Coordinator`] backed by in-process maps.
#[derive(Debug, Default)]
pub struct InMemoryCoordinator {
    bookies: RwLock<Vec<BookieAddr>>,
    next_id: AtomicI64,
    nodes: RwLock<HashMap<String, Bytes>>,
}

impl InMemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bookies<I, S>(bookies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let coordinator = Self::new();
        coordinator.register_bookies(bookies);
        coordinator
    }

    /// Replace the registered bookies with the children of the
    /// available-bookies node, skipping the read-only group.
    pub fn register_bookies<I, S>(&self, children: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let live: Vec<BookieAddr> = children
            .into_iter()
            .map(Into::into)
            .filter(|child| child != READONLY_MARKER)
            .collect();
        *self.bookies.write().expect("bookie list lock poisoned") = live;
    }

    /// Paths of all stored metadata records, sorted.
    pub fn metadata_paths(&self) -> Vec<String> {
        let nodes = self.nodes.read().expect("metadata lock poisoned");
        let mut paths: Vec<String> = nodes.keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl Coordinator for InMemoryCoordinator {
    async fn list_bookies(&self) -> ClientResult<Vec<BookieAddr>> {
        let bookies = self
            .bookies
            .read()
            .map_err(|e| ClientError::Coordination(format!("lock poisoned: {e}")))?;
        Ok(bookies.clone())
    }

    async fn allocate_ledger_id(&self) -> ClientResult<LedgerId> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn read_metadata(&self, ledger_id: LedgerId) -> ClientResult<Bytes> {
        let path = ledger_path(ledger_id)?;
        let nodes = self
            .nodes
            .read()
            .map_err(|e| ClientError::Coordination(format!("lock poisoned: {e}")))?;
        nodes
            .get(&path)
            .cloned()
            .ok_or(ClientError::MetadataNotFound(ledger_id))
    }

    async fn write_metadata(&self, ledger_id: LedgerId, data: Bytes) -> ClientResult<()> {
        let path = ledger_path(ledger_id)?;
        let mut nodes = self
            .nodes
            .write()
            .map_err(|e| ClientError::Coordination(format!("lock poisoned: {e}")))?;
        if nodes.contains_key(&path) {
            return Err(ClientError::MetadataExists(ledger_id));
        }
        debug!(ledger_id, path = %path, len = data.len(), "stored ledger metadata");
        nodes.insert(path, data);
        Ok(())
    }
}
