//! Test storage — a `Storage` whose every operation fails.

use async_trait::async_trait;
use keel_core::error::StoreError;
use keel_core::event::EventRecord;
use keel_core::repository::{EventLog, SnapshotStore, Storage, UnitOfWork};
use keel_core::snapshot::Snapshot;

fn connection_refused() -> StoreError {
    StoreError::Database("connection refused".into())
}

/// A storage backend that always returns an infrastructure error. Useful for
/// testing error-handling paths.
#[derive(Debug, Default)]
pub struct FailingStorage;

#[async_trait]
impl Storage for FailingStorage {
    type Tx = FailingUnitOfWork;

    async fn begin(&self) -> Result<FailingUnitOfWork, StoreError> {
        Err(connection_refused())
    }
}

/// Unit of work of `FailingStorage`. Never handed out by `begin`.
#[derive(Debug)]
pub struct FailingUnitOfWork;

#[async_trait]
impl EventLog for FailingUnitOfWork {
    async fn append(&mut self, _records: &[EventRecord]) -> Result<(), StoreError> {
        Err(connection_refused())
    }

    async fn load_from(
        &mut self,
        _aggregate_id: u64,
        _after_version: i64,
    ) -> Result<Vec<EventRecord>, StoreError> {
        Err(connection_refused())
    }
}

#[async_trait]
impl SnapshotStore for FailingUnitOfWork {
    async fn save(&mut self, _snapshot: Snapshot) -> Result<(), StoreError> {
        Err(connection_refused())
    }

    async fn latest(&mut self, _aggregate_id: u64) -> Result<Option<Snapshot>, StoreError> {
        Err(connection_refused())
    }
}

#[async_trait]
impl UnitOfWork for FailingUnitOfWork {
    async fn commit(self) -> Result<(), StoreError> {
        Err(connection_refused())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
