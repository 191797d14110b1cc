//! Domain events for the bank account context.

use keel_core::event::DomainEvent;
use serde::{Deserialize, Serialize};

/// Event name for `AccountEvent::AccountCreated`.
pub const ACCOUNT_CREATED_EVENT_NAME: &str = "AccountCreated";

/// Event name for `AccountEvent::AccessGranted`.
pub const ACCESS_GRANTED_EVENT_NAME: &str = "AccessGranted";

/// Event name for `AccountEvent::MoneyDeposited`.
pub const MONEY_DEPOSITED_EVENT_NAME: &str = "MoneyDeposited";

/// Event name for `AccountEvent::MoneyWithdrawn`. Persisted under a name that
/// differs from the variant.
pub const MONEY_WITHDRAWN_EVENT_NAME: &str = "TakeMoneyFromAccount";

/// Event payload variants for the bank account context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_name", content = "payload")]
pub enum AccountEvent {
    /// An account has been opened.
    AccountCreated {
        /// Externally assigned account number.
        account_number: String,
        /// The account's display name.
        name: String,
    },
    /// A user has been given access to the account.
    AccessGranted {
        /// The user.
        username: String,
        /// Whether the user owns the account.
        owner: bool,
    },
    /// Money has been deposited.
    MoneyDeposited {
        /// Amount in whole currency units.
        amount: u64,
    },
    /// Money has been withdrawn.
    #[serde(rename = "TakeMoneyFromAccount")]
    MoneyWithdrawn {
        /// Amount in whole currency units.
        amount: u64,
    },
}

impl DomainEvent for AccountEvent {
    const NAMES: &'static [&'static str] = &[
        ACCOUNT_CREATED_EVENT_NAME,
        ACCESS_GRANTED_EVENT_NAME,
        MONEY_DEPOSITED_EVENT_NAME,
        MONEY_WITHDRAWN_EVENT_NAME,
    ];
}
