//! simple_bank - Banking Ledger Backend
//!
//! Accounts, ledger entries and an atomic, deadlock-free funds transfer.
//!
//! # Modules
//!
//! - [`account`] - Account models, locking balance updates, lock ordering
//! - [`transfer`] - Transfer engine, error kinds, retry policy
//! - [`store`] - Ledger store trait with PostgreSQL and in-memory adapters
//! - [`bank`] - Caller layer: account lifecycle and checked transfers
//! - [`db`] - Connection pool and schema
//! - [`config`] - YAML configuration
//! - [`logging`] - Tracing subscriber setup

pub mod account;
pub mod bank;
pub mod config;
pub mod db;
pub mod logging;
pub mod store;
pub mod transfer;

// Convenient re-exports at crate root
pub use account::{Account, ListParams, NewAccount};
pub use bank::{BankError, BankService};
pub use config::AppConfig;
pub use store::{LedgerStore, LedgerTx, MemoryStore, PgStore, StoreError};
pub use transfer::{
    Entry, RetryPolicy, Transfer, TransferEngine, TransferError, TransferRequest, TransferResult,
};
