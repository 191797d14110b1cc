//! Application layer for the bank account context.

pub mod projection;
pub mod query_handlers;
