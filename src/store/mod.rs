//! Key-value store client subsystem.
//!
//! # Data Flow
//! ```text
//! Engine (snapshot / parser re-fetch / subscription)
//!     → KvStore::get / get_key (one revision per read)
//!     → KvStore::watch(prefix, after) → WatchStream
//!         → WatchEvent { key, value, op, revision } in revision order
//! ```
//!
//! # Design Decisions
//! - The store is a trait so the engine never depends on a concrete backend
//! - `delete` removes the key and everything below `key/`, which is how
//!   cascading deletes of servers and middlewares are expressed
//! - Watches start strictly after the given revision

pub mod memory;

pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Store-wide, monotonically increasing mutation counter.
pub type Revision = u64;

/// A single stored entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    /// Revision of the last mutation of this key.
    pub mod_revision: Revision,
}

/// Result of a prefix read: entries sorted by key, read at `revision`.
#[derive(Debug, Clone, Default)]
pub struct GetResponse {
    pub entries: Vec<KeyValue>,
    pub revision: Revision,
}

/// Result of a key-or-prefix delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteResponse {
    pub deleted: usize,
    pub revision: Revision,
}

/// Mutation kind reported by a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Put,
    Delete,
    /// Anything a store backend reports that is neither a put nor a delete.
    Other(String),
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Put => write!(f, "put"),
            Operation::Delete => write!(f, "delete"),
            Operation::Other(op) => write!(f, "{}", op),
        }
    }
}

/// One raw mutation observed by a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub key: String,
    /// Value written by a put; `None` for deletes.
    pub value: Option<String>,
    pub op: Operation,
    pub revision: Revision,
}

/// Store access failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store was shut down.
    #[error("store is closed")]
    Closed,

    /// History needed to resume a watch has been discarded.
    #[error("revision {requested} has been compacted (oldest available is {compacted})")]
    Compacted {
        requested: Revision,
        compacted: Revision,
    },

    /// Transient connectivity failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Receiving half of a watch.
///
/// The stream ends (`None`) when the store cancels the watch gracefully;
/// an `Err` item means the watch broke and no further events follow.
#[derive(Debug)]
pub struct WatchStream {
    rx: mpsc::UnboundedReceiver<Result<WatchEvent, StoreError>>,
}

impl WatchStream {
    pub fn new(rx: mpsc::UnboundedReceiver<Result<WatchEvent, StoreError>>) -> Self {
        Self { rx }
    }

    /// Wait for the next event.
    pub async fn next(&mut self) -> Option<Result<WatchEvent, StoreError>> {
        self.rx.recv().await
    }
}

/// A watchable hierarchical key-value store.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Read every entry whose key starts with `prefix`, ordered by key.
    async fn get(&self, prefix: &str) -> Result<GetResponse, StoreError>;

    /// Read a single key.
    async fn get_key(&self, key: &str) -> Result<Option<KeyValue>, StoreError>;

    /// Write `value` at `key`, optionally expiring after `ttl`.
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>)
        -> Result<Revision, StoreError>;

    /// Delete `key` and every key below `key/`.
    async fn delete(&self, key: &str) -> Result<DeleteResponse, StoreError>;

    /// Watch keys under `prefix` for mutations with revision > `after`.
    async fn watch(&self, prefix: &str, after: Revision) -> Result<WatchStream, StoreError>;
}
