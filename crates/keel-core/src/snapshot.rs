//! Snapshot of aggregate state at a given version.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::SerializationError;

/// Fully reconstructed aggregate state as of `version`.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Aggregate this snapshot belongs to.
    pub aggregate_id: u64,
    /// Version of the last event folded into `state`.
    pub version: i64,
    /// Serialized aggregate state.
    pub state: Value,
    /// Timestamp of snapshot creation.
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Serializes `state` into a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError::Encode` if the state cannot be serialized.
    pub fn capture<T: Serialize>(
        aggregate_id: u64,
        version: i64,
        state: &T,
        created_at: DateTime<Utc>,
    ) -> Result<Self, SerializationError> {
        let state = serde_json::to_value(state).map_err(|source| SerializationError::Encode {
            what: "snapshot",
            source,
        })?;
        Ok(Self {
            aggregate_id,
            version,
            state,
            created_at,
        })
    }

    /// Deserializes the stored state.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError::Snapshot` if the state does not match `T`.
    pub fn restore<T: DeserializeOwned>(&self) -> Result<T, SerializationError> {
        T::deserialize(&self.state).map_err(|source| SerializationError::Snapshot {
            aggregate_id: self.aggregate_id,
            version: self.version,
            source,
        })
    }
}
