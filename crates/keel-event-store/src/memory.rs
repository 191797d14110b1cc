//! In-memory implementation of the `Storage` trait.
//!
//! Writes of a unit of work are buffered and applied under one lock on
//! `commit`, after every buffered `(aggregate_id, version)` has been checked
//! against the committed log. Read models held in memory register commit
//! hooks so they change in the same critical section as the log.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use keel_core::error::StoreError;
use keel_core::event::EventRecord;
use keel_core::repository::{EventLog, SnapshotStore, Storage, UnitOfWork};
use keel_core::snapshot::Snapshot;

/// Deferred write applied when a unit of work commits.
pub type CommitHook = Box<dyn FnOnce() + Send>;

#[derive(Debug, Default)]
struct MemoryState {
    events: BTreeMap<(u64, i64), EventRecord>,
    snapshots: BTreeMap<(u64, i64), Snapshot>,
}

fn lock(state: &Mutex<MemoryState>) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
    state
        .lock()
        .map_err(|_| StoreError::Database("in-memory store lock poisoned".to_owned()))
}

/// Event log and snapshot store kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed events of one aggregate, in version order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the store lock is poisoned.
    pub fn events(&self, aggregate_id: u64) -> Result<Vec<EventRecord>, StoreError> {
        let state = lock(&self.state)?;
        Ok(state
            .events
            .range((aggregate_id, i64::MIN)..=(aggregate_id, i64::MAX))
            .map(|(_, record)| record.clone())
            .collect())
    }

    /// Committed snapshots of one aggregate, in version order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the store lock is poisoned.
    pub fn snapshots(&self, aggregate_id: u64) -> Result<Vec<Snapshot>, StoreError> {
        let state = lock(&self.state)?;
        Ok(state
            .snapshots
            .range((aggregate_id, i64::MIN)..=(aggregate_id, i64::MAX))
            .map(|(_, snapshot)| snapshot.clone())
            .collect())
    }

    /// Number of committed events across all aggregates.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the store lock is poisoned.
    pub fn event_count(&self) -> Result<usize, StoreError> {
        Ok(lock(&self.state)?.events.len())
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    type Tx = MemoryUnitOfWork;

    async fn begin(&self) -> Result<MemoryUnitOfWork, StoreError> {
        Ok(MemoryUnitOfWork {
            state: Arc::clone(&self.state),
            pending_events: Vec::new(),
            pending_snapshots: Vec::new(),
            hooks: Vec::new(),
        })
    }
}

/// Buffered unit of work over an `InMemoryStorage`.
pub struct MemoryUnitOfWork {
    state: Arc<Mutex<MemoryState>>,
    pending_events: Vec<EventRecord>,
    pending_snapshots: Vec<Snapshot>,
    hooks: Vec<CommitHook>,
}

impl fmt::Debug for MemoryUnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryUnitOfWork")
            .field("pending_events", &self.pending_events.len())
            .field("pending_snapshots", &self.pending_snapshots.len())
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

impl MemoryUnitOfWork {
    /// Registers a write that runs only if this unit commits, while the store
    /// lock is held.
    pub fn on_commit<F>(&mut self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    fn pending_contains(&self, aggregate_id: u64, version: i64) -> bool {
        self.pending_events
            .iter()
            .any(|r| r.aggregate_id == aggregate_id && r.version == version)
    }
}

#[async_trait]
impl EventLog for MemoryUnitOfWork {
    async fn append(&mut self, records: &[EventRecord]) -> Result<(), StoreError> {
        {
            let state = lock(&self.state)?;
            for (i, record) in records.iter().enumerate() {
                let key = (record.aggregate_id, record.version);
                let repeated = records[..i]
                    .iter()
                    .any(|r| (r.aggregate_id, r.version) == key);
                if repeated
                    || state.events.contains_key(&key)
                    || self.pending_contains(record.aggregate_id, record.version)
                {
                    return Err(StoreError::Conflict {
                        aggregate_id: record.aggregate_id,
                        version: record.version,
                    });
                }
            }
        }

        self.pending_events.extend_from_slice(records);
        Ok(())
    }

    async fn load_from(
        &mut self,
        aggregate_id: u64,
        after_version: i64,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let mut records: Vec<EventRecord> = {
            let state = lock(&self.state)?;
            state
                .events
                .range((aggregate_id, after_version.saturating_add(1))..=(aggregate_id, i64::MAX))
                .map(|(_, record)| record.clone())
                .collect()
        };
        records.extend(
            self.pending_events
                .iter()
                .filter(|r| r.aggregate_id == aggregate_id && r.version > after_version)
                .cloned(),
        );
        records.sort_by_key(|r| r.version);
        Ok(records)
    }
}

#[async_trait]
impl SnapshotStore for MemoryUnitOfWork {
    async fn save(&mut self, snapshot: Snapshot) -> Result<(), StoreError> {
        self.pending_snapshots.push(snapshot);
        Ok(())
    }

    async fn latest(&mut self, aggregate_id: u64) -> Result<Option<Snapshot>, StoreError> {
        let committed = {
            let state = lock(&self.state)?;
            state
                .snapshots
                .range((aggregate_id, i64::MIN)..=(aggregate_id, i64::MAX))
                .next_back()
                .map(|(_, snapshot)| snapshot.clone())
        };
        let pending = self
            .pending_snapshots
            .iter()
            .filter(|s| s.aggregate_id == aggregate_id)
            .max_by_key(|s| s.version)
            .cloned();

        Ok(match (committed, pending) {
            (Some(c), Some(p)) => Some(if p.version > c.version { p } else { c }),
            (c, p) => c.or(p),
        })
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn commit(self) -> Result<(), StoreError> {
        let mut state = lock(&self.state)?;

        for record in &self.pending_events {
            if state
                .events
                .contains_key(&(record.aggregate_id, record.version))
            {
                return Err(StoreError::Conflict {
                    aggregate_id: record.aggregate_id,
                    version: record.version,
                });
            }
        }
        for snapshot in &self.pending_snapshots {
            if state
                .snapshots
                .contains_key(&(snapshot.aggregate_id, snapshot.version))
            {
                return Err(StoreError::Conflict {
                    aggregate_id: snapshot.aggregate_id,
                    version: snapshot.version,
                });
            }
        }

        let count = self.pending_events.len();
        for record in self.pending_events {
            state
                .events
                .insert((record.aggregate_id, record.version), record);
        }
        for snapshot in self.pending_snapshots {
            state
                .snapshots
                .insert((snapshot.aggregate_id, snapshot.version), snapshot);
        }
        for hook in self.hooks {
            hook();
        }

        debug!(events = count, "committed in-memory unit of work");
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        debug!(
            events = self.pending_events.len(),
            "rolled back in-memory unit of work"
        );
        Ok(())
    }
}
