//! Keel — bank account example domain.
//!
//! An account is opened with a name and optionally an owner, then takes
//! deposits and withdrawals. Withdrawals larger than the balance are
//! rejected. The read model tracks name, balance, version, users and every
//! money movement, and can be queried by aggregate id or account number.

pub mod application;
pub mod domain;
