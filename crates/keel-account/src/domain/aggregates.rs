//! Aggregate roots for the bank account context.

use keel_core::aggregate::Aggregate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::commands::{AccountCommand, Deposit, OpenAccount, Withdraw};
use crate::domain::events::AccountEvent;

/// Business-rule violations of the bank account context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountError {
    /// The account name is blank.
    #[error("account name must not be empty")]
    EmptyName,

    /// The account was already opened.
    #[error("account is already open")]
    AlreadyOpen,

    /// The account has not been opened yet.
    #[error("account is not open")]
    NotOpen,

    /// Deposits and withdrawals must move money.
    #[error("amount must be greater than zero")]
    ZeroAmount,

    /// The withdrawal exceeds the balance.
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Balance before the withdrawal.
        balance: u64,
        /// Amount requested.
        requested: u64,
    },
}

/// The aggregate root for a bank account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    /// Externally assigned account number; empty until opened.
    pub account_number: String,
    /// Display name.
    pub name: String,
    /// Current balance in whole currency units.
    pub balance: u64,
    /// Users with access to the account.
    pub users: Vec<String>,
}

impl BankAccount {
    /// Returns `true` once `AccountCreated` has been applied.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.account_number.is_empty()
    }

    fn open(&self, command: OpenAccount) -> Result<Vec<AccountEvent>, AccountError> {
        if self.is_open() {
            return Err(AccountError::AlreadyOpen);
        }
        if command.name.trim().is_empty() {
            return Err(AccountError::EmptyName);
        }
        let mut events = vec![AccountEvent::AccountCreated {
            account_number: command.account_number,
            name: command.name,
        }];
        if let Some(username) = command.owner {
            events.push(AccountEvent::AccessGranted {
                username,
                owner: true,
            });
        }
        Ok(events)
    }

    fn deposit(&self, command: Deposit) -> Result<Vec<AccountEvent>, AccountError> {
        if !self.is_open() {
            return Err(AccountError::NotOpen);
        }
        if command.amount == 0 {
            return Err(AccountError::ZeroAmount);
        }
        Ok(vec![AccountEvent::MoneyDeposited {
            amount: command.amount,
        }])
    }

    fn withdraw(&self, command: Withdraw) -> Result<Vec<AccountEvent>, AccountError> {
        if !self.is_open() {
            return Err(AccountError::NotOpen);
        }
        if command.amount == 0 {
            return Err(AccountError::ZeroAmount);
        }
        if command.amount > self.balance {
            return Err(AccountError::InsufficientFunds {
                balance: self.balance,
                requested: command.amount,
            });
        }
        Ok(vec![AccountEvent::MoneyWithdrawn {
            amount: command.amount,
        }])
    }
}

impl Aggregate for BankAccount {
    const TYPE: &'static str = "BankAccount";
    const SNAPSHOT_AFTER: u32 = 5;

    type Command = AccountCommand;
    type Event = AccountEvent;
    type Error = AccountError;

    fn handle(&self, command: AccountCommand) -> Result<Vec<AccountEvent>, AccountError> {
        match command {
            AccountCommand::Open(command) => self.open(command),
            AccountCommand::Deposit(command) => self.deposit(command),
            AccountCommand::Withdraw(command) => self.withdraw(command),
        }
    }

    fn apply(&mut self, event: &AccountEvent) {
        match event {
            AccountEvent::AccountCreated {
                account_number,
                name,
            } => {
                self.account_number.clone_from(account_number);
                self.name.clone_from(name);
                self.balance = 0;
            }
            AccountEvent::AccessGranted { username, .. } => {
                self.users.push(username.clone());
            }
            AccountEvent::MoneyDeposited { amount } => {
                self.balance = self.balance.saturating_add(*amount);
            }
            AccountEvent::MoneyWithdrawn { amount } => {
                self.balance = self.balance.saturating_sub(*amount);
            }
        }
    }
}
