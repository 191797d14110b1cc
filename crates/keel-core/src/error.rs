//! Error taxonomy for the command engine and its stores.
//!
//! `EventStoreError` is what callers of the engine see. It keeps concurrency
//! conflicts, domain rejections and configuration defects apart so the caller
//! can decide whether to retry, report to a user, or treat the failure as a
//! deployment bug.

use std::error::Error;

use thiserror::Error;

/// Boxed error raised by an aggregate's command handler.
pub type BoxedDomainError = Box<dyn Error + Send + Sync + 'static>;

/// Failures raised by the event log and snapshot stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record already exists at `(aggregate_id, version)`.
    #[error("concurrency conflict on aggregate {aggregate_id}: version {version} already exists")]
    Conflict {
        /// The aggregate whose stream was written concurrently.
        aggregate_id: u64,
        /// The version that collided.
        version: i64,
    },

    /// An infrastructure/persistence error.
    #[error("database error: {0}")]
    Database(String),
}

/// Failures while turning events and snapshots into their stored form and back.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// An event or aggregate state could not be encoded.
    #[error("failed to encode {what}: {source}")]
    Encode {
        /// What was being encoded (`"event"` or `"snapshot"`).
        what: &'static str,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// An event type did not serialize to a `{ event_name, payload }` object.
    #[error("event type {event_type} is not adjacently tagged with `event_name`/`payload`")]
    Untagged {
        /// Rust type name of the event enum.
        event_type: &'static str,
    },

    /// A stored event name is not registered for the aggregate being replayed.
    #[error("unregistered event name `{event_name}` for {event_type}")]
    UnknownEventName {
        /// The name read from storage.
        event_name: String,
        /// Rust type name of the event enum that was expected.
        event_type: &'static str,
    },

    /// A stored event payload could not be decoded.
    #[error("malformed payload for event `{event_name}` at version {version} of aggregate {aggregate_id}: {source}")]
    Event {
        /// Aggregate the record belongs to.
        aggregate_id: u64,
        /// Version of the record.
        version: i64,
        /// Stored event name.
        event_name: String,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// A stored snapshot could not be decoded.
    #[error("malformed snapshot at version {version} of aggregate {aggregate_id}: {source}")]
    Snapshot {
        /// Aggregate the snapshot belongs to.
        aggregate_id: u64,
        /// Version of the snapshot.
        version: i64,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// Replayed history has a gap or a repeated version.
    #[error("history of aggregate {aggregate_id} is out of sequence: expected version {expected}, found {found}")]
    OutOfSequence {
        /// Aggregate being replayed.
        aggregate_id: u64,
        /// The version that should have come next.
        expected: i64,
        /// The version actually read.
        found: i64,
    },
}

/// Setup defects detected while building the registry or on first use.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The same aggregate type was registered twice.
    #[error("aggregate type `{0}` is registered more than once")]
    DuplicateAggregate(&'static str),

    /// Two aggregate types claim the same domain event name.
    #[error("event name `{name}` is claimed by both `{first}` and `{second}`")]
    DuplicateEventName {
        /// The contested name.
        name: &'static str,
        /// Aggregate type that registered it first.
        first: &'static str,
        /// Aggregate type that tried to register it again.
        second: &'static str,
    },

    /// An event type declares no domain names.
    #[error("event type of aggregate `{0}` declares no event names")]
    NoEventNames(&'static str),

    /// More than one projection handler was declared.
    #[error("only one projection handler may be registered")]
    MultipleProjections,

    /// A command was executed for an aggregate type that was never registered.
    #[error("aggregate type `{0}` is not registered")]
    UnregisteredAggregate(&'static str),
}

/// Failures raised by a projection handler while updating its read model.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The projected event could not be decoded.
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// The read model's storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The read model rejected the update.
    #[error("read model error: {0}")]
    ReadModel(String),
}

/// Top-level error returned by command execution.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Another execution appended at the same `(aggregate_id, version)` first.
    /// The whole command may be retried.
    #[error("concurrency conflict on aggregate {aggregate_id} at version {version}")]
    Conflict {
        /// The aggregate that had the conflict.
        aggregate_id: u64,
        /// The version that was already taken.
        version: i64,
    },

    /// The registry or the requested aggregate type is misconfigured.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The aggregate's command handler rejected the command.
    #[error("command rejected: {source}")]
    Domain {
        /// The error raised by the command handler.
        #[source]
        source: BoxedDomainError,
    },

    /// A stored event or snapshot could not be read, or a new one written.
    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// The event log or snapshot store failed.
    #[error("storage error: {0}")]
    Storage(#[source] StoreError),

    /// The projection handler failed.
    #[error("projection error: {0}")]
    Projection(#[from] ProjectionError),
}

impl EventStoreError {
    /// Wraps a command handler error.
    pub fn domain<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Domain {
            source: Box::new(error),
        }
    }

    /// Returns `true` for optimistic-concurrency conflicts.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns the command handler's error if it is of type `E`.
    #[must_use]
    pub fn domain_error<E>(&self) -> Option<&E>
    where
        E: Error + 'static,
    {
        match self {
            Self::Domain { source } => source.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<StoreError> for EventStoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict {
                aggregate_id,
                version,
            } => Self::Conflict {
                aggregate_id,
                version,
            },
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("insufficient funds")]
    struct InsufficientFunds;

    #[test]
    fn test_store_conflict_maps_to_event_store_conflict() {
        let err: EventStoreError = StoreError::Conflict {
            aggregate_id: 7,
            version: 3,
        }
        .into();

        assert!(err.is_conflict());
        match err {
            EventStoreError::Conflict {
                aggregate_id,
                version,
            } => {
                assert_eq!(aggregate_id, 7);
                assert_eq!(version, 3);
            }
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_database_failure_maps_to_storage() {
        let err: EventStoreError = StoreError::Database("connection refused".into()).into();

        assert!(!err.is_conflict());
        assert!(matches!(err, EventStoreError::Storage(StoreError::Database(_))));
    }

    #[test]
    fn test_domain_error_preserves_original_cause() {
        let err = EventStoreError::domain(InsufficientFunds);

        assert!(err.domain_error::<InsufficientFunds>().is_some());
        assert_eq!(
            err.source().map(ToString::to_string),
            Some("insufficient funds".to_owned())
        );
        assert_eq!(err.to_string(), "command rejected: insufficient funds");
    }

    #[test]
    fn test_domain_error_downcast_to_other_type_is_none() {
        let err = EventStoreError::domain(InsufficientFunds);

        assert!(err.domain_error::<std::fmt::Error>().is_none());
    }
}
