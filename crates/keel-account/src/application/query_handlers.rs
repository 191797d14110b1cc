//! Query handlers for the bank account context.
//!
//! Queries read the projected view; they never replay events. Account numbers
//! are not unique in the read model: lookups by number return the earliest
//! opened account.

use chrono::{DateTime, Utc};
use keel_event_store::pg_event_repository::{from_db_id, to_db_id};
use sqlx::{FromRow, PgPool};
use thiserror::Error;

use crate::application::projection::{
    AccountTransaction, AccountView, InMemoryAccountProjection, TransactionKind,
};

/// Errors returned by account queries.
#[derive(Debug, Error)]
pub enum AccountQueryError {
    /// No view exists for the account.
    #[error("account {0} not found")]
    NotFound(u64),

    /// No view exists with the account number.
    #[error("account number `{0}` not found")]
    NumberNotFound(String),

    /// The read model could not be queried.
    #[error("read model error: {0}")]
    ReadModel(String),
}

/// Retrieves an account view from the in-memory read model.
///
/// # Errors
///
/// Returns `AccountQueryError::NotFound` if the account has no view.
pub fn get_account_by_id(
    aggregate_id: u64,
    read_model: &InMemoryAccountProjection,
) -> Result<AccountView, AccountQueryError> {
    read_model
        .get(aggregate_id)
        .ok_or(AccountQueryError::NotFound(aggregate_id))
}

/// Retrieves an account view from the in-memory read model by account
/// number.
///
/// # Errors
///
/// Returns `AccountQueryError::NumberNotFound` if no account has the number.
pub fn get_account_by_number(
    account_number: &str,
    read_model: &InMemoryAccountProjection,
) -> Result<AccountView, AccountQueryError> {
    read_model
        .find_by_number(account_number)
        .ok_or_else(|| AccountQueryError::NumberNotFound(account_number.to_owned()))
}

#[derive(Debug, FromRow)]
struct AccountRow {
    account_number: String,
    name: String,
    balance: i64,
    version: i64,
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    version: i64,
    kind: String,
    amount: i64,
    recorded_at: DateTime<Utc>,
}

fn read_model_error(e: sqlx::Error) -> AccountQueryError {
    AccountQueryError::ReadModel(e.to_string())
}

fn unsigned(column: &str, value: i64) -> Result<u64, AccountQueryError> {
    u64::try_from(value)
        .map_err(|_| AccountQueryError::ReadModel(format!("negative {column}: {value}")))
}

impl TryFrom<TransactionRow> for AccountTransaction {
    type Error = AccountQueryError;

    fn try_from(row: TransactionRow) -> Result<Self, AccountQueryError> {
        let kind = TransactionKind::parse(&row.kind).ok_or_else(|| {
            AccountQueryError::ReadModel(format!("unknown transaction kind `{}`", row.kind))
        })?;
        Ok(Self {
            version: row.version,
            kind,
            amount: unsigned("amount", row.amount)?,
            recorded_at: row.recorded_at,
        })
    }
}

/// Retrieves an account view from the `PostgreSQL` read model.
///
/// # Errors
///
/// Returns `AccountQueryError::NotFound` if the account has no row, and
/// `AccountQueryError::ReadModel` if a query fails or a stored row is
/// invalid.
pub async fn fetch_account_by_id(
    aggregate_id: u64,
    pool: &PgPool,
) -> Result<AccountView, AccountQueryError> {
    let row = sqlx::query_as::<_, AccountRow>(
        "SELECT account_number, name, balance, version FROM accounts WHERE aggregate_id = $1",
    )
    .bind(to_db_id(aggregate_id))
    .fetch_optional(pool)
    .await
    .map_err(read_model_error)?
    .ok_or(AccountQueryError::NotFound(aggregate_id))?;

    let users: Vec<String> = sqlx::query_scalar(
        "SELECT username FROM account_users WHERE aggregate_id = $1 ORDER BY version ASC",
    )
    .bind(to_db_id(aggregate_id))
    .fetch_all(pool)
    .await
    .map_err(read_model_error)?;

    let transactions = sqlx::query_as::<_, TransactionRow>(
        "SELECT version, kind, amount, recorded_at FROM account_transactions \
         WHERE aggregate_id = $1 ORDER BY version ASC",
    )
    .bind(to_db_id(aggregate_id))
    .fetch_all(pool)
    .await
    .map_err(read_model_error)?
    .into_iter()
    .map(AccountTransaction::try_from)
    .collect::<Result<Vec<_>, _>>()?;

    Ok(AccountView {
        aggregate_id,
        account_number: row.account_number,
        name: row.name,
        balance: unsigned("balance", row.balance)?,
        version: row.version,
        users,
        transactions,
    })
}

/// Resolves an account number to the aggregate id of the earliest opened
/// account carrying it, so commands can be addressed by number.
///
/// # Errors
///
/// Returns `AccountQueryError::NumberNotFound` if no account has the number,
/// and `AccountQueryError::ReadModel` if the query fails.
pub async fn fetch_aggregate_id_by_number(
    account_number: &str,
    pool: &PgPool,
) -> Result<u64, AccountQueryError> {
    let id: Option<i64> = sqlx::query_scalar(
        "SELECT aggregate_id FROM accounts WHERE account_number = $1 \
         ORDER BY aggregate_id ASC LIMIT 1",
    )
    .bind(account_number)
    .fetch_optional(pool)
    .await
    .map_err(read_model_error)?;

    id.map(from_db_id)
        .ok_or_else(|| AccountQueryError::NumberNotFound(account_number.to_owned()))
}

/// Retrieves an account view from the `PostgreSQL` read model by account
/// number.
///
/// # Errors
///
/// Same as `fetch_aggregate_id_by_number` and `fetch_account_by_id`.
pub async fn fetch_account_by_number(
    account_number: &str,
    pool: &PgPool,
) -> Result<AccountView, AccountQueryError> {
    let aggregate_id = fetch_aggregate_id_by_number(account_number, pool).await?;
    fetch_account_by_id(aggregate_id, pool).await
}
