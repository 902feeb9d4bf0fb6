//! Atomic Funds Transfer
//!
//! # Architecture
//!
//! ```text
//! transfer_funds(from, to, amount)
//!   BEGIN (configured isolation, lock_timeout)
//!     INSERT transfers               (from, to, amount)
//!     INSERT entries                 (from, -amount)
//!     INSERT entries                 (to,   +amount)
//!     lock + adjust min(from, to)    \ ascending id order,
//!     lock + adjust max(from, to)    / whatever the direction
//!   COMMIT            (any failure: ROLLBACK, nothing persists)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **All or nothing**: a transfer, its two entries and both balance changes
//!    commit together.
//! 2. **Conservation**: the source loses exactly what the destination gains.
//! 3. **Floor**: no balance ever drops below zero; checked under the row lock.
//! 4. **Lock order**: account rows are locked by ascending id, so opposite
//!    transfers between one pair cannot deadlock.
//! 5. **Retry is safe**: a conflicted attempt leaves nothing behind.

pub mod engine;
pub mod error;
pub mod retry;
pub mod types;

// Re-exports for convenience
pub use engine::TransferEngine;
pub use error::TransferError;
pub use retry::{RetryPolicy, Retryable};
pub use types::{Entry, Transfer, TransferRequest, TransferResult};
