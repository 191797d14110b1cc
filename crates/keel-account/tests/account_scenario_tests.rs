//! End-to-end account scenarios against `InMemoryStorage`.

use std::sync::Arc;

use keel_account::application::projection::{InMemoryAccountProjection, TransactionKind};
use keel_account::application::query_handlers::{get_account_by_id, get_account_by_number};
use keel_account::domain::aggregates::{AccountError, BankAccount};
use keel_account::domain::commands::{Deposit, OpenAccount, Withdraw};
use keel_core::aggregate::AggregateId;
use keel_core::error::EventStoreError;
use keel_engine::{AggregateRegistry, CommandEngine};
use keel_event_store::{InMemoryStorage, MemoryUnitOfWork};
use keel_test_support::{FixedClock, SequenceIdGenerator};

fn setup() -> (CommandEngine<InMemoryStorage>, InMemoryAccountProjection) {
    let read_model = InMemoryAccountProjection::new();
    let registry = AggregateRegistry::<MemoryUnitOfWork>::builder()
        .aggregate::<BankAccount>()
        .projection(Arc::new(read_model.clone()))
        .build()
        .unwrap();
    let engine = CommandEngine::new(
        InMemoryStorage::new(),
        Arc::new(registry),
        Arc::new(SequenceIdGenerator::starting_at(1_000)),
        Arc::new(FixedClock::default()),
    );
    (engine, read_model)
}

fn open(name: &str) -> OpenAccount {
    OpenAccount {
        account_number: "NL01KEEL0001".to_owned(),
        name: name.to_owned(),
        owner: None,
    }
}

fn open_owned_by(name: &str, owner: &str) -> OpenAccount {
    OpenAccount {
        owner: Some(owner.to_owned()),
        ..open(name)
    }
}

#[tokio::test]
async fn test_open_deposit_withdraw_scenario() {
    // Arrange
    let (engine, read_model) = setup();

    // Act
    let opened = engine
        .execute_new::<BankAccount>(open("A").into())
        .await
        .unwrap();
    let id = opened.id;
    let deposited = engine
        .execute::<BankAccount>(Deposit { amount: 10 }.into(), Some(id))
        .await
        .unwrap();
    let rejected = engine
        .execute::<BankAccount>(Withdraw { amount: 100 }.into(), Some(id))
        .await;
    let first_withdrawal = engine
        .execute::<BankAccount>(Withdraw { amount: 5 }.into(), Some(id))
        .await
        .unwrap();
    let second_withdrawal = engine
        .execute::<BankAccount>(Withdraw { amount: 2 }.into(), Some(id))
        .await
        .unwrap();

    // Assert
    assert_eq!(opened, AggregateId::new(1_000, 0));
    assert_eq!(deposited.version, 1);
    let err = rejected.unwrap_err();
    assert!(!err.is_conflict());
    assert_eq!(
        err.domain_error::<AccountError>(),
        Some(&AccountError::InsufficientFunds {
            balance: 10,
            requested: 100
        })
    );
    assert_eq!(first_withdrawal.version, 2);
    assert_eq!(second_withdrawal.version, 3);

    let names: Vec<String> = engine
        .storage()
        .events(id)
        .unwrap()
        .into_iter()
        .map(|r| r.event_name)
        .collect();
    assert_eq!(
        names,
        vec![
            "AccountCreated",
            "MoneyDeposited",
            "TakeMoneyFromAccount",
            "TakeMoneyFromAccount",
        ]
    );

    let view = get_account_by_id(id, &read_model).unwrap();
    assert_eq!(view.name, "A");
    assert_eq!(view.balance, 3);
    assert_eq!(view.version, 3);
    assert_eq!(view.transaction_count(), 3);
    let movements: Vec<(TransactionKind, u64)> = view
        .transactions
        .iter()
        .map(|t| (t.kind, t.amount))
        .collect();
    assert_eq!(
        movements,
        vec![
            (TransactionKind::Deposit, 10),
            (TransactionKind::Withdrawal, 5),
            (TransactionKind::Withdrawal, 2),
        ]
    );
    assert!(view.users.is_empty());

    let (account, current) = engine.load::<BankAccount>(id).await.unwrap();
    assert_eq!(account.balance, 3);
    assert_eq!(current.version, 3);
}

#[tokio::test]
async fn test_opening_with_owner_appends_two_events() {
    // Arrange
    let (engine, read_model) = setup();

    // Act
    let opened = engine
        .execute_new::<BankAccount>(open_owned_by("A", "alice").into())
        .await
        .unwrap();

    // Assert
    assert_eq!(opened.version, 1);
    let names: Vec<String> = engine
        .storage()
        .events(opened.id)
        .unwrap()
        .into_iter()
        .map(|r| r.event_name)
        .collect();
    assert_eq!(names, vec!["AccountCreated", "AccessGranted"]);
    let view = get_account_by_id(opened.id, &read_model).unwrap();
    assert_eq!(view.users, vec!["alice".to_owned()]);
    assert_eq!(view.version, 1);
    assert_eq!(view.transaction_count(), 0);
}

#[tokio::test]
async fn test_rejected_command_leaves_aggregate_and_view_unchanged() {
    let (engine, read_model) = setup();
    let opened = engine
        .execute_new::<BankAccount>(open("A").into())
        .await
        .unwrap();
    engine
        .execute::<BankAccount>(Deposit { amount: 10 }.into(), Some(opened.id))
        .await
        .unwrap();
    let before = get_account_by_id(opened.id, &read_model).unwrap();

    let result = engine
        .execute::<BankAccount>(Withdraw { amount: 100 }.into(), Some(opened.id))
        .await;

    assert!(matches!(result, Err(EventStoreError::Domain { .. })));
    assert_eq!(engine.storage().events(opened.id).unwrap().len(), 2);
    assert_eq!(get_account_by_id(opened.id, &read_model).unwrap(), before);
}

#[tokio::test]
async fn test_blank_name_creates_nothing() {
    let (engine, read_model) = setup();

    let result = engine.execute_new::<BankAccount>(open(" ").into()).await;

    assert_eq!(
        result.unwrap_err().domain_error::<AccountError>(),
        Some(&AccountError::EmptyName)
    );
    assert_eq!(engine.storage().event_count().unwrap(), 0);
    assert!(get_account_by_id(1_000, &read_model).is_err());
}

#[tokio::test]
async fn test_account_snapshots_every_five_versions() {
    // Arrange
    let (engine, _) = setup();
    let opened = engine
        .execute_new::<BankAccount>(open_owned_by("A", "alice").into())
        .await
        .unwrap();

    // Act
    for _ in 0..10 {
        engine
            .execute::<BankAccount>(Deposit { amount: 1 }.into(), Some(opened.id))
            .await
            .unwrap();
    }

    // Assert
    let snapshots = engine.storage().snapshots(opened.id).unwrap();
    let versions: Vec<i64> = snapshots.iter().map(|s| s.version).collect();
    assert_eq!(versions, vec![5, 10]);
    let at_ten: BankAccount = snapshots[1].restore().unwrap();
    assert_eq!(at_ten.balance, 9);
    assert_eq!(at_ten.users, vec!["alice".to_owned()]);
    let from_snapshot = engine.load::<BankAccount>(opened.id).await.unwrap();
    let from_history = engine.replay::<BankAccount>(opened.id).await.unwrap();
    assert_eq!(from_snapshot, from_history);
}

#[tokio::test]
async fn test_independent_accounts_do_not_interfere() {
    let (engine, read_model) = setup();
    let first = engine
        .execute_new::<BankAccount>(open("A").into())
        .await
        .unwrap();
    let second = engine
        .execute_new::<BankAccount>(open("B").into())
        .await
        .unwrap();

    engine
        .execute::<BankAccount>(Deposit { amount: 7 }.into(), Some(second.id))
        .await
        .unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(get_account_by_id(first.id, &read_model).unwrap().balance, 0);
    assert_eq!(get_account_by_id(second.id, &read_model).unwrap().balance, 7);
}

#[tokio::test]
async fn test_account_can_be_found_by_number() {
    // Arrange
    let (engine, read_model) = setup();
    let opened = engine
        .execute_new::<BankAccount>(
            OpenAccount {
                account_number: "NL02KEEL0002".to_owned(),
                ..open("B")
            }
            .into(),
        )
        .await
        .unwrap();

    // Act
    let found = get_account_by_number("NL02KEEL0002", &read_model);
    let missing = get_account_by_number("NL03KEEL0003", &read_model);

    // Assert
    assert_eq!(found.unwrap().aggregate_id, opened.id);
    assert!(missing.is_err());
}
