//! `PostgreSQL` implementation of the `Storage` trait.
//!
//! Every unit of work is one database transaction. The primary key on
//! `(aggregate_id, version)` turns a concurrent append into a unique
//! violation, which is reported as `StoreError::Conflict`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, QueryBuilder, Transaction};
use tracing::debug;

use keel_core::error::StoreError;
use keel_core::event::EventRecord;
use keel_core::repository::{EventLog, SnapshotStore, Storage, UnitOfWork};
use keel_core::snapshot::Snapshot;

const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL-backed event log and snapshot store.
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Creates a new `PgStorage`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Storage for PgStorage {
    type Tx = PgUnitOfWork;

    async fn begin(&self) -> Result<PgUnitOfWork, StoreError> {
        let tx = self.pool.begin().await.map_err(database_error)?;
        Ok(PgUnitOfWork { tx })
    }
}

/// One database transaction. Projections write their read models through
/// `connection` so those writes share the transaction with the append.
#[derive(Debug)]
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PgUnitOfWork {
    /// The connection of the open transaction.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut *self.tx
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    aggregate_id: i64,
    version: i64,
    event_name: String,
    json: Value,
    created_at: DateTime<Utc>,
}

impl From<EventRow> for EventRecord {
    fn from(row: EventRow) -> Self {
        Self {
            aggregate_id: from_db_id(row.aggregate_id),
            version: row.version,
            event_name: row.event_name,
            payload: row.json,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct SnapshotRow {
    aggregate_id: i64,
    version: i64,
    json: Value,
    created_at: DateTime<Utc>,
}

impl From<SnapshotRow> for Snapshot {
    fn from(row: SnapshotRow) -> Self {
        Self {
            aggregate_id: from_db_id(row.aggregate_id),
            version: row.version,
            state: row.json,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl EventLog for PgUnitOfWork {
    async fn append(&mut self, records: &[EventRecord]) -> Result<(), StoreError> {
        let Some(first) = records.first() else {
            return Ok(());
        };

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO event_records (aggregate_id, version, event_name, json, created_at) ",
        );
        builder.push_values(records, |mut row, record| {
            row.push_bind(to_db_id(record.aggregate_id))
                .push_bind(record.version)
                .push_bind(record.event_name.as_str())
                .push_bind(Json(&record.payload))
                .push_bind(record.created_at);
        });

        builder
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict {
                        aggregate_id: first.aggregate_id,
                        version: first.version,
                    }
                } else {
                    database_error(e)
                }
            })?;

        debug!(
            aggregate_id = first.aggregate_id,
            from_version = first.version,
            count = records.len(),
            "appended events"
        );
        Ok(())
    }

    async fn load_from(
        &mut self,
        aggregate_id: u64,
        after_version: i64,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT aggregate_id, version, event_name, json, created_at \
             FROM event_records \
             WHERE aggregate_id = $1 AND version > $2 \
             ORDER BY version ASC",
        )
        .bind(to_db_id(aggregate_id))
        .bind(after_version)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(database_error)?;

        Ok(rows.into_iter().map(EventRecord::from).collect())
    }
}

#[async_trait]
impl SnapshotStore for PgUnitOfWork {
    async fn save(&mut self, snapshot: Snapshot) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO aggregate_snapshots (aggregate_id, version, json, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(to_db_id(snapshot.aggregate_id))
        .bind(snapshot.version)
        .bind(Json(&snapshot.state))
        .bind(snapshot.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict {
                    aggregate_id: snapshot.aggregate_id,
                    version: snapshot.version,
                }
            } else {
                database_error(e)
            }
        })?;
        Ok(())
    }

    async fn latest(&mut self, aggregate_id: u64) -> Result<Option<Snapshot>, StoreError> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            "SELECT aggregate_id, version, json, created_at \
             FROM aggregate_snapshots \
             WHERE aggregate_id = $1 \
             ORDER BY version DESC \
             LIMIT 1",
        )
        .bind(to_db_id(aggregate_id))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(database_error)?;

        Ok(row.map(Snapshot::from))
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(database_error)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(database_error)
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

fn database_error(error: sqlx::Error) -> StoreError {
    StoreError::Database(error.to_string())
}

/// Converts an aggregate id to its `BIGINT` column value. Ids are stored
/// bit-for-bit, so ids above `i64::MAX` become negative.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn to_db_id(id: u64) -> i64 {
    id as i64
}

/// Inverse of `to_db_id`.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub fn from_db_id(id: i64) -> u64 {
    id as u64
}
