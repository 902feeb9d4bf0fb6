//! Transfer Error Types
//!
//! The complete set of ways `transfer_funds` can fail. Only
//! [`TransferError::TransientConflict`] is worth retrying.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Account not found: {0}")]
    AccountNotFound(i64),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds in account {account_id} for amount {amount}")]
    InsufficientFunds { account_id: i64, amount: i64 },

    /// Serialization failure or lock-wait timeout; the attempt left no trace
    #[error("Transient conflict: {0}")]
    TransientConflict(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl TransferError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            TransferError::InvalidAmount(_) => "INVALID_AMOUNT",
            TransferError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            TransferError::TransientConflict(_) => "TRANSIENT_CONFLICT",
            TransferError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::TransientConflict(_))
    }
}

impl From<StoreError> for TransferError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AccountNotFound(id) => TransferError::AccountNotFound(id),
            // The amount is filled in by the engine, which knows it
            StoreError::NegativeBalance(id) => TransferError::InsufficientFunds {
                account_id: id,
                amount: 0,
            },
            StoreError::OutOfRange(id) => {
                TransferError::InvalidAmount(format!("balance of account {} would overflow", id))
            }
            StoreError::Referenced(id) => TransferError::StorageUnavailable(format!(
                "account {} is referenced by ledger records",
                id
            )),
            StoreError::Conflict(msg) => TransferError::TransientConflict(msg),
            StoreError::Unavailable(msg) => TransferError::StorageUnavailable(msg),
        }
    }
}
