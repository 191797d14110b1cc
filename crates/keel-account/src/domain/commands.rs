//! Commands for the bank account context.

/// Command to open a new account.
#[derive(Debug, Clone)]
pub struct OpenAccount {
    /// Externally assigned account number.
    pub account_number: String,
    /// The account's display name.
    pub name: String,
    /// The user who owns the account, granted access on opening.
    pub owner: Option<String>,
}

/// Command to deposit money.
#[derive(Debug, Clone, Copy)]
pub struct Deposit {
    /// Amount in whole currency units.
    pub amount: u64,
}

/// Command to withdraw money.
#[derive(Debug, Clone, Copy)]
pub struct Withdraw {
    /// Amount in whole currency units.
    pub amount: u64,
}

/// Every command a `BankAccount` accepts.
#[derive(Debug, Clone)]
pub enum AccountCommand {
    /// Open the account.
    Open(OpenAccount),
    /// Deposit money.
    Deposit(Deposit),
    /// Withdraw money.
    Withdraw(Withdraw),
}

impl From<OpenAccount> for AccountCommand {
    fn from(command: OpenAccount) -> Self {
        Self::Open(command)
    }
}

impl From<Deposit> for AccountCommand {
    fn from(command: Deposit) -> Self {
        Self::Deposit(command)
    }
}

impl From<Withdraw> for AccountCommand {
    fn from(command: Withdraw) -> Self {
        Self::Withdraw(command)
    }
}
