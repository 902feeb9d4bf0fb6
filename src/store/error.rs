//! Store Error Types
//!
//! Store-agnostic error kinds. Each adapter classifies its driver errors into
//! these exactly once, so callers never inspect driver internals.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Account not found: {0}")]
    AccountNotFound(i64),

    /// The adjustment would take the balance below [`BALANCE_FLOOR`](crate::account::BALANCE_FLOOR)
    #[error("Balance of account {0} would go negative")]
    NegativeBalance(i64),

    #[error("Balance of account {0} out of range")]
    OutOfRange(i64),

    #[error("Account {0} is still referenced by ledger records")]
    Referenced(i64),

    /// Serialization failure, detected deadlock or lock-wait timeout.
    /// Nothing from the aborted transaction survives.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}
