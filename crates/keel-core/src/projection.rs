//! Synchronous read-model projection.

use async_trait::async_trait;

use crate::error::{ProjectionError, SerializationError};
use crate::event::{DomainEvent, EventRecord};

/// A newly produced event, handed to the projection before commit.
#[derive(Debug, Clone, Copy)]
pub struct ProjectedEvent<'a> {
    aggregate_type: &'static str,
    record: &'a EventRecord,
}

impl<'a> ProjectedEvent<'a> {
    /// Wraps a record produced for an aggregate of type `aggregate_type`.
    #[must_use]
    pub fn new(aggregate_type: &'static str, record: &'a EventRecord) -> Self {
        Self {
            aggregate_type,
            record,
        }
    }

    /// Type name of the aggregate that produced the event.
    #[must_use]
    pub fn aggregate_type(&self) -> &'static str {
        self.aggregate_type
    }

    /// Aggregate that produced the event.
    #[must_use]
    pub fn aggregate_id(&self) -> u64 {
        self.record.aggregate_id
    }

    /// Version the event was appended at.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.record.version
    }

    /// Registered domain name of the event.
    #[must_use]
    pub fn event_name(&self) -> &str {
        &self.record.event_name
    }

    /// The stored record.
    #[must_use]
    pub fn record(&self) -> &'a EventRecord {
        self.record
    }

    /// Decodes the event into its typed form.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError` if the name or payload does not match `E`.
    pub fn decode<E: DomainEvent>(&self) -> Result<E, SerializationError> {
        self.record.to_event()
    }
}

/// Updates a read model from newly produced events. At most one projection is
/// registered per process; it is invoked once per event, in version order,
/// inside the unit of work `Tx` so its writes commit or roll back with the
/// append.
#[async_trait]
pub trait Projection<Tx: Send>: Send + Sync {
    /// Applies one event to the read model.
    async fn sync(
        &self,
        tx: &mut Tx,
        event: &ProjectedEvent<'_>,
    ) -> Result<(), ProjectionError>;
}
