//! Keel Core — shared event-sourcing abstractions.
//!
//! This crate defines the aggregate, event, snapshot, store and projection
//! contracts that the command engine orchestrates, plus the identity
//! generator. It contains no infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod error;
pub mod event;
pub mod id;
pub mod projection;
pub mod repository;
pub mod snapshot;
