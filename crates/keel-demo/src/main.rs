//! Runs the bank account scenario through the command engine on `PostgreSQL`.
//!
//! Opens an account, deposits 10, attempts to withdraw 100 (rejected), then
//! withdraws 5 and 2, and logs the resulting read model.

use std::error::Error;
use std::sync::Arc;

use keel_account::application::projection::PgAccountProjection;
use keel_account::application::query_handlers::fetch_account_by_number;
use keel_account::domain::aggregates::{AccountError, BankAccount};
use keel_account::domain::commands::{Deposit, OpenAccount, Withdraw};
use keel_core::clock::{Clock, SystemClock};
use keel_core::id::TsidGenerator;
use keel_engine::{AggregateRegistry, CommandEngine};
use keel_event_store::{PgStorage, PgUnitOfWork};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

/// Event store and account read model tables.
static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        max_connections = config.max_connections,
        tsid_node_count = config.tsid.node_count,
        "Starting keel demo"
    );

    // Create database connection pool and schema.
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    MIGRATOR.run(&pool).await?;
    let storage = PgStorage::new(pool.clone());

    // Build the engine.
    let registry = AggregateRegistry::<PgUnitOfWork>::builder()
        .aggregate::<BankAccount>()
        .projection(Arc::new(PgAccountProjection))
        .build()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids = TsidGenerator::new(config.tsid, Arc::clone(&clock));
    tracing::info!(node = ids.node(), "Identity generator ready");
    let engine = CommandEngine::new(storage, Arc::new(registry), Arc::new(ids), clock);

    // Run the scenario.
    let account_number = format!(
        "NL{:02}KEEL{:010}",
        rand::random_range(10..100),
        rand::random_range(0..10_000_000_000_u64)
    );
    let opened = engine
        .execute_new::<BankAccount>(
            OpenAccount {
                account_number: account_number.clone(),
                name: "A".to_owned(),
                owner: None,
            }
            .into(),
        )
        .await?;
    tracing::info!(aggregate_id = opened.id, version = opened.version, "Account opened");

    let deposited = engine
        .execute::<BankAccount>(Deposit { amount: 10 }.into(), Some(opened.id))
        .await?;
    tracing::info!(version = deposited.version, "Deposited 10");

    match engine
        .execute::<BankAccount>(Withdraw { amount: 100 }.into(), Some(opened.id))
        .await
    {
        Ok(result) => tracing::warn!(version = result.version, "Overdraft was accepted"),
        Err(e) => match e.domain_error::<AccountError>() {
            Some(rule) => tracing::info!(reason = %rule, "Withdrawal of 100 rejected"),
            None => return Err(e.into()),
        },
    }

    for amount in [5, 2] {
        let withdrawn = engine
            .execute::<BankAccount>(Withdraw { amount }.into(), Some(opened.id))
            .await?;
        tracing::info!(version = withdrawn.version, amount, "Withdrew");
    }

    let view = fetch_account_by_number(&account_number, &pool).await?;
    tracing::info!(account = %serde_json::to_string(&view)?, "Account view");

    Ok(())
}
