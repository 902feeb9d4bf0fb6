//! Account management module
//!
//! Account models, the locking balance update used inside ledger
//! transactions, and the lock-ordering rule for multi-account mutations.

pub mod lock_order;
pub mod models;
pub mod repository;

// Re-export commonly used types
pub use lock_order::lock_order;
pub use models::{Account, BALANCE_FLOOR, ListParams, NewAccount};
pub use repository::{adjust_balances, lock_and_adjust_balance};
