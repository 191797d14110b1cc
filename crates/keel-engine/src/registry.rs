//! Aggregate registry.
//!
//! Built once at start-up and immutable afterwards. Every aggregate type that
//! the engine executes commands for, and the projection handler if any, is
//! registered on the builder before `build`; `build` resolves the process-wide
//! event name table and rejects configurations that cannot work. Event types
//! are never registered on their own: they are reached through the aggregate
//! that declares them.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use keel_core::aggregate::Aggregate;
use keel_core::error::ConfigurationError;
use keel_core::event::DomainEvent;
use keel_core::projection::Projection;

/// What the engine knows about one aggregate type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateRegistration {
    /// Aggregate type name.
    pub aggregate_type: &'static str,
    /// Snapshot cadence; `0` disables snapshots.
    pub snapshot_after: u32,
    /// Domain names of the aggregate's events.
    pub event_names: &'static [&'static str],
}

impl AggregateRegistration {
    fn of<A: Aggregate>(snapshot_after: u32) -> Self {
        Self {
            aggregate_type: A::TYPE,
            snapshot_after,
            event_names: <A::Event as DomainEvent>::NAMES,
        }
    }

    /// Returns `true` if a snapshot is due once the aggregate reaches `version`.
    #[must_use]
    pub fn snapshot_due(&self, version: i64) -> bool {
        self.snapshot_after != 0 && version != 0 && version % i64::from(self.snapshot_after) == 0
    }
}

/// Immutable lookup table from aggregate type to its registration, plus the
/// event name table and the optional projection.
pub struct AggregateRegistry<Tx: Send> {
    aggregates: HashMap<TypeId, AggregateRegistration>,
    event_owners: HashMap<&'static str, &'static str>,
    projection: Option<Arc<dyn Projection<Tx>>>,
}

impl<Tx: Send> fmt::Debug for AggregateRegistry<Tx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRegistry")
            .field("aggregates", &self.aggregates.values().collect::<Vec<_>>())
            .field("has_projection", &self.projection.is_some())
            .finish_non_exhaustive()
    }
}

impl<Tx: Send> AggregateRegistry<Tx> {
    /// Starts an empty registry.
    #[must_use]
    pub fn builder() -> AggregateRegistryBuilder<Tx> {
        AggregateRegistryBuilder {
            aggregates: Vec::new(),
            projections: Vec::new(),
        }
    }

    /// Looks up the registration of `A`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::UnregisteredAggregate` if `A` was never
    /// registered.
    pub fn registration<A: Aggregate>(&self) -> Result<&AggregateRegistration, ConfigurationError> {
        self.aggregates
            .get(&TypeId::of::<A>())
            .ok_or(ConfigurationError::UnregisteredAggregate(A::TYPE))
    }

    /// Aggregate type that owns the domain event `event_name`.
    #[must_use]
    pub fn aggregate_for_event(&self, event_name: &str) -> Option<&'static str> {
        self.event_owners.get(event_name).copied()
    }

    /// The registered projection handler.
    #[must_use]
    pub fn projection(&self) -> Option<&Arc<dyn Projection<Tx>>> {
        self.projection.as_ref()
    }
}

/// Collects registrations; validation happens in `build`.
pub struct AggregateRegistryBuilder<Tx: Send> {
    aggregates: Vec<(TypeId, AggregateRegistration)>,
    projections: Vec<Arc<dyn Projection<Tx>>>,
}

impl<Tx: Send> fmt::Debug for AggregateRegistryBuilder<Tx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRegistryBuilder")
            .field("aggregates", &self.aggregates.len())
            .field("projections", &self.projections.len())
            .finish()
    }
}

impl<Tx: Send> AggregateRegistryBuilder<Tx> {
    /// Registers `A` with its declared `SNAPSHOT_AFTER` cadence.
    #[must_use]
    pub fn aggregate<A: Aggregate>(self) -> Self {
        self.aggregate_with_snapshots::<A>(A::SNAPSHOT_AFTER)
    }

    /// Registers `A`, overriding its snapshot cadence.
    #[must_use]
    pub fn aggregate_with_snapshots<A: Aggregate>(mut self, snapshot_after: u32) -> Self {
        self.aggregates
            .push((TypeId::of::<A>(), AggregateRegistration::of::<A>(snapshot_after)));
        self
    }

    /// Registers the projection handler. At most one may be registered.
    #[must_use]
    pub fn projection(mut self, projection: Arc<dyn Projection<Tx>>) -> Self {
        self.projections.push(projection);
        self
    }

    /// Validates the collected registrations and freezes them.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if an aggregate type is registered twice,
    /// an event type declares no names, two aggregate types claim the same
    /// event name, or more than one projection was registered.
    pub fn build(self) -> Result<AggregateRegistry<Tx>, ConfigurationError> {
        if self.projections.len() > 1 {
            return Err(ConfigurationError::MultipleProjections);
        }

        let mut aggregates = HashMap::with_capacity(self.aggregates.len());
        let mut event_owners = HashMap::new();

        for (type_id, registration) in self.aggregates {
            if aggregates.insert(type_id, registration).is_some() {
                return Err(ConfigurationError::DuplicateAggregate(
                    registration.aggregate_type,
                ));
            }
            if registration.event_names.is_empty() {
                return Err(ConfigurationError::NoEventNames(registration.aggregate_type));
            }
            for &name in registration.event_names {
                if let Some(first) = event_owners.insert(name, registration.aggregate_type) {
                    return Err(ConfigurationError::DuplicateEventName {
                        name,
                        first,
                        second: registration.aggregate_type,
                    });
                }
            }
        }

        Ok(AggregateRegistry {
            aggregates,
            event_owners,
            projection: self.projections.into_iter().next(),
        })
    }
}

#[cfg(test)]
mod tests {
    use keel_test_support::RecordingProjection;
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("never raised")]
    struct Never;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "event_name", content = "payload")]
    enum LampEvent {
        SwitchedOn,
        #[serde(rename = "LampSwitchedOff")]
        SwitchedOff,
    }

    impl DomainEvent for LampEvent {
        const NAMES: &'static [&'static str] = &["SwitchedOn", "LampSwitchedOff"];
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Lamp {
        on: bool,
    }

    impl Aggregate for Lamp {
        const TYPE: &'static str = "Lamp";
        const SNAPSHOT_AFTER: u32 = 10;
        type Command = ();
        type Event = LampEvent;
        type Error = Never;

        fn handle(&self, (): ()) -> Result<Vec<LampEvent>, Never> {
            Ok(vec![LampEvent::SwitchedOn])
        }

        fn apply(&mut self, event: &LampEvent) {
            self.on = matches!(event, LampEvent::SwitchedOn);
        }
    }

    /// Shares `SwitchedOn` with `Lamp`.
    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Heater;

    impl Aggregate for Heater {
        const TYPE: &'static str = "Heater";
        type Command = ();
        type Event = LampEvent;
        type Error = Never;

        fn handle(&self, (): ()) -> Result<Vec<LampEvent>, Never> {
            Ok(Vec::new())
        }

        fn apply(&mut self, _event: &LampEvent) {}
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum Silent {}

    impl DomainEvent for Silent {
        const NAMES: &'static [&'static str] = &[];
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Mute;

    impl Aggregate for Mute {
        const TYPE: &'static str = "Mute";
        type Command = ();
        type Event = Silent;
        type Error = Never;

        fn handle(&self, (): ()) -> Result<Vec<Silent>, Never> {
            Ok(Vec::new())
        }

        fn apply(&mut self, _event: &Silent) {}
    }

    type Registry = AggregateRegistry<()>;

    #[test]
    fn test_build_registers_aggregate_with_declared_cadence() {
        // Act
        let registry = Registry::builder().aggregate::<Lamp>().build().unwrap();

        // Assert
        let registration = registry.registration::<Lamp>().unwrap();
        assert_eq!(registration.aggregate_type, "Lamp");
        assert_eq!(registration.snapshot_after, 10);
        assert_eq!(registry.aggregate_for_event("LampSwitchedOff"), Some("Lamp"));
        assert_eq!(registry.aggregate_for_event("SwitchedOff"), None);
        assert!(registry.projection().is_none());
    }

    #[test]
    fn test_cadence_override_wins_over_declared_cadence() {
        let registry = Registry::builder()
            .aggregate_with_snapshots::<Lamp>(3)
            .build()
            .unwrap();

        assert_eq!(registry.registration::<Lamp>().unwrap().snapshot_after, 3);
    }

    #[test]
    fn test_unregistered_aggregate_is_a_configuration_error() {
        let registry = Registry::builder().aggregate::<Lamp>().build().unwrap();

        let result = registry.registration::<Mute>();

        assert!(matches!(
            result,
            Err(ConfigurationError::UnregisteredAggregate("Mute"))
        ));
    }

    #[test]
    fn test_duplicate_aggregate_is_rejected() {
        let result = Registry::builder()
            .aggregate::<Lamp>()
            .aggregate_with_snapshots::<Lamp>(5)
            .build();

        assert!(matches!(
            result,
            Err(ConfigurationError::DuplicateAggregate("Lamp"))
        ));
    }

    #[test]
    fn test_event_name_claimed_twice_is_rejected() {
        let result = Registry::builder()
            .aggregate::<Lamp>()
            .aggregate::<Heater>()
            .build();

        match result {
            Err(ConfigurationError::DuplicateEventName {
                name,
                first,
                second,
            }) => {
                assert_eq!(name, "SwitchedOn");
                assert_eq!(first, "Lamp");
                assert_eq!(second, "Heater");
            }
            other => panic!("expected DuplicateEventName, got {other:?}"),
        }
    }

    #[test]
    fn test_event_type_without_names_is_rejected() {
        let result = Registry::builder().aggregate::<Mute>().build();

        assert!(matches!(result, Err(ConfigurationError::NoEventNames("Mute"))));
    }

    #[test]
    fn test_second_projection_is_rejected() {
        let result = Registry::builder()
            .aggregate::<Lamp>()
            .projection(Arc::new(RecordingProjection::new()))
            .projection(Arc::new(RecordingProjection::new()))
            .build();

        assert!(matches!(result, Err(ConfigurationError::MultipleProjections)));
    }

    #[test]
    fn test_single_projection_is_kept() {
        let registry = Registry::builder()
            .aggregate::<Lamp>()
            .projection(Arc::new(RecordingProjection::new()))
            .build()
            .unwrap();

        assert!(registry.projection().is_some());
    }

    #[test]
    fn test_snapshot_due_only_on_positive_multiples() {
        let registration = AggregateRegistration {
            aggregate_type: "Lamp",
            snapshot_after: 5,
            event_names: LampEvent::NAMES,
        };
        let disabled = AggregateRegistration {
            snapshot_after: 0,
            ..registration
        };

        let due: Vec<i64> = (0..=20).filter(|v| registration.snapshot_due(*v)).collect();

        assert_eq!(due, vec![5, 10, 15, 20]);
        assert!((0..=20).all(|v| !disabled.snapshot_due(v)));
    }
}
