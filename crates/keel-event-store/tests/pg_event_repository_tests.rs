//! Integration tests for `PgStorage`.
//!
//! These need a running `PostgreSQL` reachable through `DATABASE_URL`.

use chrono::{DateTime, TimeZone, Utc};
use keel_core::error::StoreError;
use keel_core::event::EventRecord;
use keel_core::repository::{EventLog, SnapshotStore, Storage, UnitOfWork};
use keel_core::snapshot::Snapshot;
use keel_event_store::pg_event_repository::PgStorage;
use sqlx::PgPool;

fn created_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
}

/// Helper to build an `EventRecord` with sensible defaults.
fn make_record(aggregate_id: u64, version: i64) -> EventRecord {
    EventRecord {
        aggregate_id,
        version,
        event_name: "TestEvent".to_owned(),
        payload: serde_json::json!({ "key": "value", "version": version }),
        created_at: created_at(),
    }
}

// --- load_from ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_load_from_returns_empty_vec_for_nonexistent_aggregate(pool: PgPool) {
    let storage = PgStorage::new(pool);
    let mut uow = storage.begin().await.unwrap();

    let events = uow.load_from(42, -1).await.unwrap();

    assert!(events.is_empty());
}

// --- append + load_from round-trip ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_append_and_load_single_event(pool: PgPool) {
    let storage = PgStorage::new(pool);
    let record = make_record(7, 0);
    let mut uow = storage.begin().await.unwrap();
    uow.append(std::slice::from_ref(&record)).await.unwrap();
    uow.commit().await.unwrap();

    let mut reader = storage.begin().await.unwrap();
    let loaded = reader.load_from(7, -1).await.unwrap();

    assert_eq!(loaded, vec![record]);
}

// --- ordering and filtering ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_load_from_returns_later_versions_in_order(pool: PgPool) {
    let storage = PgStorage::new(pool);
    let records: Vec<EventRecord> = (0..5).map(|v| make_record(7, v)).collect();
    let mut uow = storage.begin().await.unwrap();
    uow.append(&records).await.unwrap();
    uow.commit().await.unwrap();

    let mut reader = storage.begin().await.unwrap();
    let loaded = reader.load_from(7, 2).await.unwrap();

    let versions: Vec<i64> = loaded.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![3, 4]);
}

// --- aggregate isolation ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_aggregate_isolation(pool: PgPool) {
    let storage = PgStorage::new(pool);
    let mut uow = storage.begin().await.unwrap();
    uow.append(&[make_record(1, 0), make_record(2, 0), make_record(2, 1)])
        .await
        .unwrap();
    uow.commit().await.unwrap();

    let mut reader = storage.begin().await.unwrap();

    assert_eq!(reader.load_from(1, -1).await.unwrap().len(), 1);
    assert_eq!(reader.load_from(2, -1).await.unwrap().len(), 2);
}

// --- ids above i64::MAX ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_high_bit_aggregate_id_round_trips(pool: PgPool) {
    let storage = PgStorage::new(pool);
    let aggregate_id = u64::MAX - 1;
    let mut uow = storage.begin().await.unwrap();
    uow.append(&[make_record(aggregate_id, 0)]).await.unwrap();
    uow.commit().await.unwrap();

    let mut reader = storage.begin().await.unwrap();
    let loaded = reader.load_from(aggregate_id, -1).await.unwrap();

    assert_eq!(loaded[0].aggregate_id, aggregate_id);
}

// --- optimistic concurrency ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_append_of_existing_version_returns_conflict(pool: PgPool) {
    let storage = PgStorage::new(pool);
    let mut uow = storage.begin().await.unwrap();
    uow.append(&[make_record(9, 0)]).await.unwrap();
    uow.commit().await.unwrap();

    let mut second = storage.begin().await.unwrap();
    let result = second.append(&[make_record(9, 0)]).await;

    assert!(matches!(
        result,
        Err(StoreError::Conflict {
            aggregate_id: 9,
            version: 0
        })
    ));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_conflicting_batch_appends_nothing(pool: PgPool) {
    let storage = PgStorage::new(pool);
    let mut uow = storage.begin().await.unwrap();
    uow.append(&[make_record(9, 1)]).await.unwrap();
    uow.commit().await.unwrap();

    let mut second = storage.begin().await.unwrap();
    let result = second
        .append(&[make_record(9, 0), make_record(9, 1), make_record(9, 2)])
        .await;
    assert!(result.is_err());
    second.rollback().await.unwrap();

    let mut reader = storage.begin().await.unwrap();
    let versions: Vec<i64> = reader
        .load_from(9, -1)
        .await
        .unwrap()
        .iter()
        .map(|r| r.version)
        .collect();
    assert_eq!(versions, vec![1]);
}

// --- rollback ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_rollback_discards_events_and_snapshots(pool: PgPool) {
    let storage = PgStorage::new(pool);
    let mut uow = storage.begin().await.unwrap();
    uow.append(&[make_record(3, 0)]).await.unwrap();
    uow.save(Snapshot {
        aggregate_id: 3,
        version: 0,
        state: serde_json::json!({ "balance": 1 }),
        created_at: created_at(),
    })
    .await
    .unwrap();
    uow.rollback().await.unwrap();

    let mut reader = storage.begin().await.unwrap();

    assert!(reader.load_from(3, -1).await.unwrap().is_empty());
    assert!(reader.latest(3).await.unwrap().is_none());
}

// --- snapshots ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_latest_returns_highest_version_snapshot(pool: PgPool) {
    let storage = PgStorage::new(pool);
    let mut uow = storage.begin().await.unwrap();
    for version in [5, 15, 10] {
        uow.save(Snapshot {
            aggregate_id: 4,
            version,
            state: serde_json::json!({ "version": version }),
            created_at: created_at(),
        })
        .await
        .unwrap();
    }
    uow.commit().await.unwrap();

    let mut reader = storage.begin().await.unwrap();
    let latest = reader.latest(4).await.unwrap().unwrap();

    assert_eq!(latest.version, 15);
    assert_eq!(latest.state, serde_json::json!({ "version": 15 }));
}
