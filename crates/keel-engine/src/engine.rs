//! Command execution engine.
//!
//! One `execute` call is one unit of work:
//!
//! 1. resolve the aggregate's registration,
//! 2. allocate an id when none is given,
//! 3. restore state from the latest snapshot plus trailing events,
//! 4. hand the command to the aggregate,
//! 5. append the produced events at consecutive versions,
//! 6. save a snapshot at every version the cadence calls for,
//! 7. pass each new event to the projection,
//! 8. commit.
//!
//! Any failure rolls the whole unit back. The engine keeps no per-aggregate
//! state and takes no locks; two executions racing for the same version are
//! separated by the store's uniqueness on `(aggregate_id, version)`.

use std::sync::Arc;

use tracing::{Span, debug, instrument, warn};

use keel_core::aggregate::{Aggregate, AggregateId};
use keel_core::clock::Clock;
use keel_core::error::{EventStoreError, SerializationError};
use keel_core::event::EventRecord;
use keel_core::id::IdGenerator;
use keel_core::projection::ProjectedEvent;
use keel_core::repository::{EventLog, SnapshotStore, Storage, UnitOfWork};
use keel_core::snapshot::Snapshot;

use crate::registry::{AggregateRegistration, AggregateRegistry};

/// Executes commands against event-sourced aggregates.
pub struct CommandEngine<S: Storage> {
    storage: S,
    registry: Arc<AggregateRegistry<S::Tx>>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl<S: Storage + std::fmt::Debug> std::fmt::Debug for CommandEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEngine")
            .field("storage", &self.storage)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl<S: Storage> CommandEngine<S> {
    /// Creates a new `CommandEngine`.
    #[must_use]
    pub fn new(
        storage: S,
        registry: Arc<AggregateRegistry<S::Tx>>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            registry,
            ids,
            clock,
        }
    }

    /// The storage backend.
    #[must_use]
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// The registry the engine resolves aggregates through.
    #[must_use]
    pub fn registry(&self) -> &AggregateRegistry<S::Tx> {
        &self.registry
    }

    /// Executes `command` against aggregate `aggregate_id`, or against a new
    /// aggregate when `aggregate_id` is `None`.
    ///
    /// Returns the aggregate id and the version of the last event produced.
    /// A command that produces no events leaves the version unchanged (`-1`
    /// for a new aggregate).
    ///
    /// # Errors
    ///
    /// - `EventStoreError::Configuration` if `A` is not registered.
    /// - `EventStoreError::Domain` if the aggregate rejects the command.
    /// - `EventStoreError::Conflict` if another execution appended first.
    /// - `EventStoreError::Serialization` if history cannot be decoded or new
    ///   events cannot be encoded.
    /// - `EventStoreError::Storage` or `EventStoreError::Projection` if the
    ///   store or the read model fails.
    #[instrument(
        name = "execute",
        skip_all,
        fields(aggregate_type = A::TYPE, aggregate_id = tracing::field::Empty)
    )]
    pub async fn execute<A: Aggregate>(
        &self,
        command: A::Command,
        aggregate_id: Option<u64>,
    ) -> Result<AggregateId, EventStoreError> {
        let registration = *self.registry.registration::<A>()?;

        let (id, existing) = match aggregate_id {
            Some(id) => (id, true),
            None => (self.ids.next_id(), false),
        };
        Span::current().record("aggregate_id", id);
        debug!(?command, existing, "executing command");

        let mut tx = self.storage.begin().await?;
        match self
            .run::<A>(&mut tx, &registration, command, id, existing)
            .await
        {
            Ok(result) => {
                if let Err(e) = tx.commit().await {
                    let e = EventStoreError::from(e);
                    if e.is_conflict() {
                        warn!(error = %e, "commit lost the race for the next version");
                    }
                    return Err(e);
                }
                debug!(version = result.version, "command committed");
                Ok(result)
            }
            Err(e) => {
                if e.is_conflict() {
                    warn!(error = %e, "append lost the race for the next version");
                } else {
                    debug!(error = %e, "command failed");
                }
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Executes `command` against a new aggregate.
    ///
    /// # Errors
    ///
    /// Same as `execute`.
    pub async fn execute_new<A: Aggregate>(
        &self,
        command: A::Command,
    ) -> Result<AggregateId, EventStoreError> {
        self.execute::<A>(command, None).await
    }

    /// Reconstructs the current state of an aggregate, starting from its latest
    /// snapshot when the cadence enables snapshots.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError` if `A` is not registered, the store fails, or
    /// history cannot be decoded.
    pub async fn load<A: Aggregate>(
        &self,
        aggregate_id: u64,
    ) -> Result<(A, AggregateId), EventStoreError> {
        let registration = *self.registry.registration::<A>()?;
        self.read(aggregate_id, registration.snapshot_after != 0)
            .await
    }

    /// Reconstructs the current state of an aggregate from its full history,
    /// ignoring snapshots.
    ///
    /// # Errors
    ///
    /// Same as `load`.
    pub async fn replay<A: Aggregate>(
        &self,
        aggregate_id: u64,
    ) -> Result<(A, AggregateId), EventStoreError> {
        self.registry.registration::<A>()?;
        self.read(aggregate_id, false).await
    }

    async fn read<A: Aggregate>(
        &self,
        aggregate_id: u64,
        use_snapshot: bool,
    ) -> Result<(A, AggregateId), EventStoreError> {
        let mut tx = self.storage.begin().await?;
        let restored = restore::<A, S::Tx>(&mut tx, aggregate_id, use_snapshot).await;
        if let Err(rollback) = tx.rollback().await {
            warn!(error = %rollback, "rollback after read failed");
        }
        let (state, version) = restored?;
        Ok((state, AggregateId::new(aggregate_id, version)))
    }

    async fn run<A: Aggregate>(
        &self,
        tx: &mut S::Tx,
        registration: &AggregateRegistration,
        command: A::Command,
        id: u64,
        existing: bool,
    ) -> Result<AggregateId, EventStoreError> {
        let (mut state, mut version) = if existing {
            restore::<A, S::Tx>(tx, id, registration.snapshot_after != 0).await?
        } else {
            (A::default(), -1)
        };

        let events = state.handle(command).map_err(EventStoreError::domain)?;
        if events.is_empty() {
            debug!(version, "command produced no events");
            return Ok(AggregateId::new(id, version));
        }

        let now = self.clock.now();
        let mut records = Vec::with_capacity(events.len());
        let mut snapshots = Vec::new();
        for event in &events {
            version += 1;
            state.apply(event);
            let record = EventRecord::from_event(id, version, event, now)?;
            if self.registry.aggregate_for_event(&record.event_name) != Some(A::TYPE) {
                return Err(SerializationError::UnknownEventName {
                    event_name: record.event_name,
                    event_type: std::any::type_name::<A::Event>(),
                }
                .into());
            }
            records.push(record);
            if registration.snapshot_due(version) {
                snapshots.push(Snapshot::capture(id, version, &state, now)?);
            }
        }

        tx.append(&records).await?;
        for snapshot in snapshots {
            debug!(version = snapshot.version, "saving snapshot");
            tx.save(snapshot).await?;
        }
        if let Some(projection) = self.registry.projection() {
            for record in &records {
                projection
                    .sync(tx, &ProjectedEvent::new(A::TYPE, record))
                    .await?;
            }
            debug!(events = records.len(), "projected events");
        }

        Ok(AggregateId::new(id, version))
    }
}

/// Rebuilds an aggregate from its latest snapshot (if `use_snapshot`) and the
/// events after it. History must continue exactly one version after the
/// starting point.
async fn restore<A, Tx>(
    tx: &mut Tx,
    aggregate_id: u64,
    use_snapshot: bool,
) -> Result<(A, i64), EventStoreError>
where
    A: Aggregate,
    Tx: UnitOfWork,
{
    let snapshot = if use_snapshot {
        tx.latest(aggregate_id).await?
    } else {
        None
    };
    let (mut state, mut version) = match snapshot {
        Some(snapshot) => {
            debug!(version = snapshot.version, "restoring from snapshot");
            (snapshot.restore::<A>()?, snapshot.version)
        }
        None => (A::default(), -1),
    };

    let records = tx.load_from(aggregate_id, version).await?;
    debug!(from_version = version, events = records.len(), "replaying events");
    for record in records {
        if record.version != version + 1 {
            return Err(SerializationError::OutOfSequence {
                aggregate_id,
                expected: version + 1,
                found: record.version,
            }
            .into());
        }
        let event = record.to_event::<A::Event>()?;
        state.apply(&event);
        version = record.version;
    }

    Ok((state, version))
}
