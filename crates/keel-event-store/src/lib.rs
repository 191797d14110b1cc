//! Keel event store — `EventLog`/`SnapshotStore` implementations.
//!
//! `PgStorage` runs every unit of work inside one `PostgreSQL` transaction.
//! `InMemoryStorage` buffers writes and applies them atomically on commit.
//! The `PostgreSQL` tables are created by the workspace `migrations/`.

pub mod memory;
pub mod pg_event_repository;

pub use memory::{InMemoryStorage, MemoryUnitOfWork};
pub use pg_event_repository::{PgStorage, PgUnitOfWork};
