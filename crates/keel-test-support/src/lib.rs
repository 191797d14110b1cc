//! Shared test doubles for the keel command engine.

mod clock;
mod ids;
mod projection;
mod storage;

pub use clock::{FixedClock, fixed_time};
pub use ids::SequenceIdGenerator;
pub use projection::{FailingProjection, ProjectedCall, RecordingProjection};
pub use storage::{FailingStorage, FailingUnitOfWork};
