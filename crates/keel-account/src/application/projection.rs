//! Account read model and the projections that keep it in sync.
//!
//! Both projections write inside the unit of work of the command that
//! produced the event: the in-memory one through commit hooks, the
//! `PostgreSQL` one through the open transaction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::aggregate::Aggregate;
use keel_core::error::ProjectionError;
use keel_core::projection::{ProjectedEvent, Projection};
use keel_event_store::pg_event_repository::to_db_id;
use keel_event_store::{MemoryUnitOfWork, PgUnitOfWork};
use serde::Serialize;
use sqlx::PgConnection;
use tracing::debug;

use crate::domain::aggregates::BankAccount;
use crate::domain::events::AccountEvent;

/// Direction of a money movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Money paid in.
    Deposit,
    /// Money taken out.
    Withdrawal,
}

impl TransactionKind {
    /// Column value in `account_transactions.kind`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
        }
    }

    /// Parses a stored `kind` column.
    #[must_use]
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "deposit" => Some(Self::Deposit),
            "withdrawal" => Some(Self::Withdrawal),
            _ => None,
        }
    }
}

/// One deposit or withdrawal in the read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountTransaction {
    /// Version of the event that moved the money.
    pub version: i64,
    /// Deposit or withdrawal.
    pub kind: TransactionKind,
    /// Amount moved.
    pub amount: u64,
    /// When the event was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Read-only view of a bank account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountView {
    /// The account's aggregate id.
    pub aggregate_id: u64,
    /// Externally assigned account number.
    pub account_number: String,
    /// Display name.
    pub name: String,
    /// Current balance in whole currency units.
    pub balance: u64,
    /// Version of the last event projected into this view.
    pub version: i64,
    /// Users with access, in grant order.
    pub users: Vec<String>,
    /// Deposits and withdrawals, oldest first.
    pub transactions: Vec<AccountTransaction>,
}

impl AccountView {
    /// Number of deposits and withdrawals.
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    fn opened(aggregate_id: u64, version: i64, account_number: &str, name: &str) -> Self {
        Self {
            aggregate_id,
            account_number: account_number.to_owned(),
            name: name.to_owned(),
            balance: 0,
            version,
            users: Vec::new(),
            transactions: Vec::new(),
        }
    }

    fn record(&mut self, version: i64, recorded_at: DateTime<Utc>, event: &AccountEvent) {
        match event {
            AccountEvent::AccountCreated { .. } => {}
            AccountEvent::AccessGranted { username, .. } => self.users.push(username.clone()),
            AccountEvent::MoneyDeposited { amount } => {
                self.balance = self.balance.saturating_add(*amount);
                self.push_transaction(version, TransactionKind::Deposit, *amount, recorded_at);
            }
            AccountEvent::MoneyWithdrawn { amount } => {
                self.balance = self.balance.saturating_sub(*amount);
                self.push_transaction(version, TransactionKind::Withdrawal, *amount, recorded_at);
            }
        }
        self.version = version;
    }

    fn push_transaction(
        &mut self,
        version: i64,
        kind: TransactionKind,
        amount: u64,
        recorded_at: DateTime<Utc>,
    ) {
        self.transactions.push(AccountTransaction {
            version,
            kind,
            amount,
            recorded_at,
        });
    }
}

/// Account read model held in process memory, for use with
/// `InMemoryStorage`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAccountProjection {
    views: Arc<Mutex<HashMap<u64, AccountView>>>,
}

impl InMemoryAccountProjection {
    /// Creates an empty read model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The committed view of one account.
    #[must_use]
    pub fn get(&self, aggregate_id: u64) -> Option<AccountView> {
        self.views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&aggregate_id)
            .cloned()
    }

    /// The committed view of the earliest opened account with
    /// `account_number`.
    #[must_use]
    pub fn find_by_number(&self, account_number: &str) -> Option<AccountView> {
        self.views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|view| view.account_number == account_number)
            .min_by_key(|view| view.aggregate_id)
            .cloned()
    }
}

#[async_trait]
impl Projection<MemoryUnitOfWork> for InMemoryAccountProjection {
    async fn sync(
        &self,
        tx: &mut MemoryUnitOfWork,
        event: &ProjectedEvent<'_>,
    ) -> Result<(), ProjectionError> {
        if event.aggregate_type() != BankAccount::TYPE {
            return Ok(());
        }
        let decoded: AccountEvent = event.decode()?;
        let (aggregate_id, version) = (event.aggregate_id(), event.version());
        let recorded_at = event.record().created_at;
        let views = Arc::clone(&self.views);

        tx.on_commit(move || {
            let mut views = views.lock().unwrap_or_else(PoisonError::into_inner);
            match &decoded {
                AccountEvent::AccountCreated {
                    account_number,
                    name,
                } => {
                    views.insert(
                        aggregate_id,
                        AccountView::opened(aggregate_id, version, account_number, name),
                    );
                }
                other => {
                    if let Some(view) = views.get_mut(&aggregate_id) {
                        view.record(version, recorded_at, other);
                    }
                }
            }
        });
        Ok(())
    }
}

/// Account read model in `PostgreSQL`, for use with `PgStorage`. The
/// tables come from the workspace `migrations/`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgAccountProjection;

fn amount_to_db(amount: u64) -> Result<i64, ProjectionError> {
    i64::try_from(amount)
        .map_err(|_| ProjectionError::ReadModel(format!("amount {amount} exceeds BIGINT")))
}

fn read_model_error(error: &sqlx::Error) -> ProjectionError {
    ProjectionError::ReadModel(error.to_string())
}

async fn record_transaction(
    conn: &mut PgConnection,
    aggregate_id: i64,
    version: i64,
    kind: TransactionKind,
    amount: i64,
    recorded_at: DateTime<Utc>,
) -> Result<(), ProjectionError> {
    let delta = match kind {
        TransactionKind::Deposit => amount,
        TransactionKind::Withdrawal => -amount,
    };
    sqlx::query("UPDATE accounts SET balance = balance + $2, version = $3 WHERE aggregate_id = $1")
        .bind(aggregate_id)
        .bind(delta)
        .bind(version)
        .execute(&mut *conn)
        .await
        .map_err(|e| read_model_error(&e))?;
    sqlx::query(
        "INSERT INTO account_transactions (aggregate_id, version, kind, amount, recorded_at) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(aggregate_id)
    .bind(version)
    .bind(kind.as_str())
    .bind(amount)
    .bind(recorded_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| read_model_error(&e))?;
    Ok(())
}

#[async_trait]
impl Projection<PgUnitOfWork> for PgAccountProjection {
    async fn sync(
        &self,
        tx: &mut PgUnitOfWork,
        event: &ProjectedEvent<'_>,
    ) -> Result<(), ProjectionError> {
        if event.aggregate_type() != BankAccount::TYPE {
            return Ok(());
        }
        let decoded: AccountEvent = event.decode()?;
        let aggregate_id = to_db_id(event.aggregate_id());
        let version = event.version();
        let recorded_at = event.record().created_at;
        let conn = tx.connection();

        match decoded {
            AccountEvent::AccountCreated {
                account_number,
                name,
            } => {
                sqlx::query(
                    "INSERT INTO accounts (aggregate_id, account_number, name, balance, version) \
                     VALUES ($1, $2, $3, 0, $4)",
                )
                .bind(aggregate_id)
                .bind(account_number)
                .bind(name)
                .bind(version)
                .execute(&mut *conn)
                .await
                .map_err(|e| read_model_error(&e))?;
            }
            AccountEvent::AccessGranted { username, owner } => {
                sqlx::query(
                    "INSERT INTO account_users (aggregate_id, username, owner, version) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(aggregate_id)
                .bind(username)
                .bind(owner)
                .bind(version)
                .execute(&mut *conn)
                .await
                .map_err(|e| read_model_error(&e))?;
                sqlx::query("UPDATE accounts SET version = $2 WHERE aggregate_id = $1")
                    .bind(aggregate_id)
                    .bind(version)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| read_model_error(&e))?;
            }
            AccountEvent::MoneyDeposited { amount } => {
                record_transaction(
                    conn,
                    aggregate_id,
                    version,
                    TransactionKind::Deposit,
                    amount_to_db(amount)?,
                    recorded_at,
                )
                .await?;
            }
            AccountEvent::MoneyWithdrawn { amount } => {
                record_transaction(
                    conn,
                    aggregate_id,
                    version,
                    TransactionKind::Withdrawal,
                    amount_to_db(amount)?,
                    recorded_at,
                )
                .await?;
            }
        }

        debug!(
            aggregate_id = event.aggregate_id(),
            version,
            event_name = event.event_name(),
            "projected account event"
        );
        Ok(())
    }
}
