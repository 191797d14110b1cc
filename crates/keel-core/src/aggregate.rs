//! Aggregate abstraction.

use std::error::Error;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::event::DomainEvent;

/// Identifies an aggregate instance and its version after the most recently
/// applied event. `version` is `-1` while no event exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateId {
    /// Aggregate identifier.
    pub id: u64,
    /// Version of the last applied event.
    pub version: i64,
}

impl AggregateId {
    /// Creates a new `AggregateId`.
    #[must_use]
    pub fn new(id: u64, version: i64) -> Self {
        Self { id, version }
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

/// Trait for event-sourced aggregates.
///
/// `Default` is the empty state that replay starts from. The whole state is
/// serialized into snapshots, so fields that must not be persisted belong
/// elsewhere.
pub trait Aggregate: Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Aggregate type name, used for logging and projection routing.
    const TYPE: &'static str;

    /// Save a snapshot whenever a new version is a positive multiple of this
    /// value. `0` disables snapshotting.
    const SNAPSHOT_AFTER: u32 = 0;

    /// Commands this aggregate accepts.
    type Command: fmt::Debug + Send;

    /// Events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Business-rule violations raised by `handle`.
    type Error: Error + Send + Sync + 'static;

    /// Validates `command` against the current state and returns the events it
    /// produces. An empty list means no state change. Must not perform I/O.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` if the command violates a business rule.
    fn handle(&self, command: Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Applies an event to mutate internal state (used during replay and after
    /// `handle`). Must be deterministic.
    fn apply(&mut self, event: &Self::Event);
}
