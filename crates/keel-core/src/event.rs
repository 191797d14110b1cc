//! Domain event abstractions and their stored form.
//!
//! Event types are closed enums serialized adjacently tagged:
//!
//! ```
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! #[serde(tag = "event_name", content = "payload")]
//! enum CounterEvent {
//!     Incremented { by: u32 },
//!     #[serde(rename = "CounterReset")]
//!     Reset,
//! }
//!
//! impl keel_core::event::DomainEvent for CounterEvent {
//!     const NAMES: &'static [&'static str] = &["Incremented", "CounterReset"];
//! }
//! ```
//!
//! The variant name is the default domain name and `#[serde(rename)]` is the
//! explicit override. The name is stored next to the payload and selects the
//! variant again on replay.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::SerializationError;

/// Key holding the domain event name in the serialized enum.
pub const EVENT_NAME_TAG: &str = "event_name";

/// Key holding the variant payload in the serialized enum.
pub const EVENT_PAYLOAD_TAG: &str = "payload";

/// Trait that all domain event enums implement.
pub trait DomainEvent: Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static {
    /// Every domain name this type can be persisted under.
    const NAMES: &'static [&'static str];

    /// Returns `true` if `name` is one of this type's domain names.
    fn is_known_name(name: &str) -> bool {
        Self::NAMES.contains(&name)
    }
}

/// Splits an event into its domain name and payload.
///
/// # Errors
///
/// Returns `SerializationError::Encode` if serde fails and
/// `SerializationError::Untagged` if the enum is not adjacently tagged.
pub fn encode<E: DomainEvent>(event: &E) -> Result<(String, Value), SerializationError> {
    let value = serde_json::to_value(event).map_err(|source| SerializationError::Encode {
        what: "event",
        source,
    })?;

    let Value::Object(mut fields) = value else {
        return Err(SerializationError::Untagged {
            event_type: std::any::type_name::<E>(),
        });
    };
    let Some(Value::String(name)) = fields.remove(EVENT_NAME_TAG) else {
        return Err(SerializationError::Untagged {
            event_type: std::any::type_name::<E>(),
        });
    };
    let payload = fields.remove(EVENT_PAYLOAD_TAG).unwrap_or(Value::Null);

    Ok((name, payload))
}

/// Rebuilds an event from its domain name and payload.
///
/// The payload is always passed back, `null` included: unit variants accept it
/// and newtype variants over unit types require it.
///
/// # Errors
///
/// Returns the serde error if the name or payload does not match `E`.
pub fn decode<E: DomainEvent>(event_name: &str, payload: &Value) -> Result<E, serde_json::Error> {
    let mut fields = Map::with_capacity(2);
    fields.insert(EVENT_NAME_TAG.to_owned(), Value::String(event_name.to_owned()));
    fields.insert(EVENT_PAYLOAD_TAG.to_owned(), payload.clone());
    serde_json::from_value(Value::Object(fields))
}

/// Stored representation of a domain event. Immutable once written; the
/// store enforces uniqueness of `(aggregate_id, version)`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Aggregate this event belongs to.
    pub aggregate_id: u64,
    /// Position in the aggregate stream, starting at 0.
    pub version: i64,
    /// Registered domain name, used to pick the variant on replay.
    pub event_name: String,
    /// Serialized variant payload.
    pub payload: Value,
    /// Timestamp of record creation.
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    /// Builds a record for `event` at `version` of `aggregate_id`.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError` if the event cannot be encoded.
    pub fn from_event<E: DomainEvent>(
        aggregate_id: u64,
        version: i64,
        event: &E,
        created_at: DateTime<Utc>,
    ) -> Result<Self, SerializationError> {
        let (event_name, payload) = encode(event)?;
        Ok(Self {
            aggregate_id,
            version,
            event_name,
            payload,
            created_at,
        })
    }

    /// Decodes the stored payload back into `E`.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError::UnknownEventName` if the stored name is not
    /// one of `E::NAMES`, and `SerializationError::Event` if the payload is
    /// malformed.
    pub fn to_event<E: DomainEvent>(&self) -> Result<E, SerializationError> {
        if !E::is_known_name(&self.event_name) {
            return Err(SerializationError::UnknownEventName {
                event_name: self.event_name.clone(),
                event_type: std::any::type_name::<E>(),
            });
        }
        decode(&self.event_name, &self.payload).map_err(|source| SerializationError::Event {
            aggregate_id: self.aggregate_id,
            version: self.version,
            event_name: self.event_name.clone(),
            source,
        })
    }
}
