//! In-process watchable store.
//!
//! # Responsibilities
//! - Keep entries ordered by key with per-key modification revisions
//! - Keep a bounded mutation history so watches can resume from a revision
//! - Fan mutations out to live watchers under the same lock that applies
//!   them, so a watch never sees a gap between replay and live events
//! - Expire TTL'd keys lazily, emitting delete events like any other delete

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    DeleteResponse, GetResponse, KeyValue, KvStore, Operation, Revision, StoreError, WatchEvent,
    WatchStream,
};

/// Default number of mutations retained for watch replay.
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

#[derive(Debug)]
struct Entry {
    value: String,
    mod_revision: Revision,
    expires_at: Option<Instant>,
}

#[derive(Debug)]
struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<Result<WatchEvent, StoreError>>,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    revision: Revision,
    history: VecDeque<WatchEvent>,
    compacted: Revision,
    watchers: Vec<Watcher>,
    closed: bool,
}

/// A watchable key-value store held in memory.
///
/// Cloning is cheap and every clone shares the same data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    history_limit: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Create a store that retains at most `limit` mutations for replay.
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            history_limit: limit.max(1),
        }
    }

    /// Current store revision.
    pub fn revision(&self) -> Revision {
        self.state.lock().expect("store mutex poisoned").revision
    }

    /// Discard history up to and including `revision`.
    pub fn compact(&self, revision: Revision) {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let revision = revision.min(state.revision);
        while state.history.front().is_some_and(|e| e.revision <= revision) {
            state.history.pop_front();
        }
        state.compacted = state.compacted.max(revision);
        tracing::debug!(revision, "Store history compacted");
    }

    /// Break every open watch with a transient error.
    pub fn disconnect_watchers(&self) {
        let mut state = self.state.lock().expect("store mutex poisoned");
        for watcher in state.watchers.drain(..) {
            let _ = watcher
                .tx
                .send(Err(StoreError::Unavailable("watch stream reset".into())));
        }
    }

    /// Shut the store down; open watches end gracefully.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.closed = true;
        state.watchers.clear();
    }

    /// Number of live watchers.
    pub fn watcher_count(&self) -> usize {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.watchers.retain(|w| !w.tx.is_closed());
        state.watchers.len()
    }

    fn check_open(state: &State) -> Result<(), StoreError> {
        if state.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn record(&self, state: &mut State, event: WatchEvent) {
        state
            .watchers
            .retain(|w| !event.key.starts_with(&w.prefix) || w.tx.send(Ok(event.clone())).is_ok());
        state.history.push_back(event);
        while state.history.len() > self.history_limit {
            if let Some(dropped) = state.history.pop_front() {
                state.compacted = dropped.revision;
            }
        }
        // A revision is either fully retained or fully compacted.
        let compacted = state.compacted;
        while state.history.front().is_some_and(|e| e.revision <= compacted) {
            state.history.pop_front();
        }
    }

    fn remove_keys(&self, state: &mut State, keys: Vec<String>) -> usize {
        if keys.is_empty() {
            return 0;
        }
        state.revision += 1;
        let revision = state.revision;
        for key in &keys {
            state.entries.remove(key);
            self.record(
                state,
                WatchEvent {
                    key: key.clone(),
                    value: None,
                    op: Operation::Delete,
                    revision,
                },
            );
        }
        keys.len()
    }

    fn purge_expired(&self, state: &mut State) {
        let now = Instant::now();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at.is_some_and(|at| at <= now))
            .map(|(k, _)| k.clone())
            .collect();
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "Expiring keys");
            self.remove_keys(state, expired);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, prefix: &str) -> Result<GetResponse, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        Self::check_open(&state)?;
        self.purge_expired(&mut state);
        let entries = state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| KeyValue {
                key: k.clone(),
                value: e.value.clone(),
                mod_revision: e.mod_revision,
            })
            .collect();
        Ok(GetResponse {
            entries,
            revision: state.revision,
        })
    }

    async fn get_key(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        Self::check_open(&state)?;
        self.purge_expired(&mut state);
        Ok(state.entries.get(key).map(|e| KeyValue {
            key: key.to_string(),
            value: e.value.clone(),
            mod_revision: e.mod_revision,
        }))
    }

    async fn put(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<Revision, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        Self::check_open(&state)?;
        self.purge_expired(&mut state);
        state.revision += 1;
        let revision = state.revision;
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                mod_revision: revision,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        self.record(
            &mut state,
            WatchEvent {
                key: key.to_string(),
                value: Some(value),
                op: Operation::Put,
                revision,
            },
        );
        Ok(revision)
    }

    async fn delete(&self, key: &str) -> Result<DeleteResponse, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        Self::check_open(&state)?;
        self.purge_expired(&mut state);
        let child_prefix = format!("{}/", key.trim_end_matches('/'));
        let keys: Vec<String> = state
            .entries
            .range(key.to_string()..)
            .take_while(|(k, _)| k.starts_with(key))
            .filter(|(k, _)| k.as_str() == key || k.starts_with(&child_prefix))
            .map(|(k, _)| k.clone())
            .collect();
        let deleted = self.remove_keys(&mut state, keys);
        Ok(DeleteResponse {
            deleted,
            revision: state.revision,
        })
    }

    async fn watch(&self, prefix: &str, after: Revision) -> Result<WatchStream, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        Self::check_open(&state)?;
        if after < state.compacted {
            return Err(StoreError::Compacted {
                requested: after,
                compacted: state.compacted,
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        for event in state
            .history
            .iter()
            .filter(|e| e.revision > after && e.key.starts_with(prefix))
        {
            let _ = tx.send(Ok(event.clone()));
        }
        state.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        tracing::debug!(prefix, after, "Watch registered");
        Ok(WatchStream::new(rx))
    }
}
