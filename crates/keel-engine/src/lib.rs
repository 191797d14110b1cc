//! Keel engine — aggregate registry and command execution.
//!
//! `CommandEngine::execute` drives one command through restore, handle,
//! append, snapshot and projection inside a single unit of work.

pub mod engine;
pub mod registry;

pub use engine::CommandEngine;
pub use registry::{AggregateRegistration, AggregateRegistry, AggregateRegistryBuilder};
