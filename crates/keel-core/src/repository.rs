//! Event log, snapshot store and unit-of-work contracts.
//!
//! Every command execution runs inside one `UnitOfWork`: the restore reads,
//! the event append, the snapshot write and the projection update either all
//! become visible on `commit` or none of them do.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::event::EventRecord;
use crate::snapshot::Snapshot;

/// Append-only persistence of `(aggregate_id, version) -> event`.
#[async_trait]
pub trait EventLog: Send {
    /// Appends `records`. All-or-nothing: if any `(aggregate_id, version)`
    /// already exists, nothing is appended and `StoreError::Conflict` is
    /// returned. Depending on the store the conflict surfaces here or on
    /// `UnitOfWork::commit`.
    async fn append(&mut self, records: &[EventRecord]) -> Result<(), StoreError>;

    /// Loads events of one aggregate with `version > after_version`, ascending.
    async fn load_from(
        &mut self,
        aggregate_id: u64,
        after_version: i64,
    ) -> Result<Vec<EventRecord>, StoreError>;
}

/// Persistence of `(aggregate_id, version) -> aggregate state`.
#[async_trait]
pub trait SnapshotStore: Send {
    /// Saves a snapshot.
    async fn save(&mut self, snapshot: Snapshot) -> Result<(), StoreError>;

    /// Returns the highest-version snapshot of an aggregate, if any.
    async fn latest(&mut self, aggregate_id: u64) -> Result<Option<Snapshot>, StoreError>;
}

/// One atomic unit of work spanning the event log and snapshot store.
#[async_trait]
pub trait UnitOfWork: EventLog + SnapshotStore {
    /// Makes every write of this unit visible.
    async fn commit(self) -> Result<(), StoreError>;

    /// Discards every write of this unit.
    async fn rollback(self) -> Result<(), StoreError>;
}

/// A store backend that hands out units of work.
#[async_trait]
pub trait Storage: Send + Sync {
    /// The unit-of-work type of this backend.
    type Tx: UnitOfWork + 'static;

    /// Starts a new unit of work.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}
