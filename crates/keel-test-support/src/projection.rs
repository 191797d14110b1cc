//! Test projections — mock `Projection` implementations for tests.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use keel_core::error::ProjectionError;
use keel_core::projection::{ProjectedEvent, Projection};

/// One `sync` call seen by a `RecordingProjection`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedCall {
    /// Aggregate type name.
    pub aggregate_type: &'static str,
    /// Aggregate id.
    pub aggregate_id: u64,
    /// Event version.
    pub version: i64,
    /// Domain event name.
    pub event_name: String,
}

/// A projection that records every event it is handed and always succeeds.
/// Calls are recorded immediately, not on commit.
#[derive(Debug, Default)]
pub struct RecordingProjection {
    calls: Mutex<Vec<ProjectedCall>>,
}

impl RecordingProjection {
    /// Create an empty recording projection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded calls, in call order.
    pub fn calls(&self) -> Vec<ProjectedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl<Tx: Send> Projection<Tx> for RecordingProjection {
    async fn sync(&self, _tx: &mut Tx, event: &ProjectedEvent<'_>) -> Result<(), ProjectionError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ProjectedCall {
                aggregate_type: event.aggregate_type(),
                aggregate_id: event.aggregate_id(),
                version: event.version(),
                event_name: event.event_name().to_owned(),
            });
        Ok(())
    }
}

/// A projection that fails on every event whose name matches, or on every
/// event when no name is given. Useful for testing rollback paths.
#[derive(Debug, Default)]
pub struct FailingProjection {
    event_name: Option<String>,
}

impl FailingProjection {
    /// Fails on every event.
    #[must_use]
    pub fn always() -> Self {
        Self::default()
    }

    /// Fails only on events named `event_name`.
    #[must_use]
    pub fn on(event_name: &str) -> Self {
        Self {
            event_name: Some(event_name.to_owned()),
        }
    }
}

#[async_trait]
impl<Tx: Send> Projection<Tx> for FailingProjection {
    async fn sync(&self, _tx: &mut Tx, event: &ProjectedEvent<'_>) -> Result<(), ProjectionError> {
        match &self.event_name {
            Some(name) if name != event.event_name() => Ok(()),
            _ => Err(ProjectionError::ReadModel(format!(
                "read model unavailable for {}",
                event.event_name()
            ))),
        }
    }
}
