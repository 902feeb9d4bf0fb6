//! Transfer Core Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::account::Account;

/// Immutable record of a funds movement between two accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Transfer {
    pub id: i64,
    pub from_account_id: i64,
    pub to_account_id: i64,
    /// Always positive
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Immutable signed ledger line: one account's side of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Entry {
    pub id: i64,
    pub account_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Post-state of every entity touched by one committed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
    pub from_account: Account,
    pub to_account: Account,
}

/// Caller-facing transfer request. The currency must match both accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
    pub currency: String,
}

impl TransferRequest {
    pub fn new(from: i64, to: i64, amount: i64, currency: impl Into<String>) -> Self {
        Self {
            from_account_id: from,
            to_account_id: to,
            amount,
            currency: currency.into(),
        }
    }
}
