//! Ledger Store
//!
//! Durable transactional storage for accounts, entries and transfers.
//!
//! # Contract
//!
//! - [`LedgerStore::begin`] opens one transaction scoped to the caller. It is
//!   rolled back unless [`LedgerTx::commit`] succeeds, including when the
//!   handle is dropped.
//! - [`LedgerTx::get_account_for_update`] takes an exclusive row lock that is
//!   held until the transaction ends. A lock wait longer than the store's
//!   timeout aborts with [`StoreError::Conflict`].
//! - Entries and transfers are append-only; only account rows are locked.
//!
//! Two adapters are provided: [`PgStore`] (PostgreSQL) and [`MemoryStore`]
//! (in-process, same locking and rollback semantics, used by tests).

pub mod error;
pub mod memory;
pub mod postgres;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;

use crate::account::{Account, ListParams, NewAccount};
use crate::transfer::types::{Entry, Transfer};

/// Operations executed inside one open transaction
#[async_trait]
pub trait LedgerTx: Send {
    /// Lock the account row and return its current state
    async fn get_account_for_update(&mut self, id: i64) -> Result<Option<Account>, StoreError>;

    /// Add `delta` to the stored balance and return the new row
    async fn add_account_balance(&mut self, id: i64, delta: i64) -> Result<Account, StoreError>;

    async fn create_transfer(
        &mut self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> Result<Transfer, StoreError>;

    async fn create_entry(&mut self, account_id: i64, amount: i64) -> Result<Entry, StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Store handle: transaction factory plus plain reads and admin writes
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: LedgerTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn create_account(&self, params: &NewAccount) -> Result<Account, StoreError>;

    async fn get_account(&self, id: i64) -> Result<Option<Account>, StoreError>;

    async fn list_accounts(&self, params: ListParams) -> Result<Vec<Account>, StoreError>;

    /// Overwrite the balance outside any transfer (admin operation)
    async fn set_balance(&self, id: i64, balance: i64) -> Result<Account, StoreError>;

    /// Returns false if the account did not exist
    async fn delete_account(&self, id: i64) -> Result<bool, StoreError>;

    async fn get_transfer(&self, id: i64) -> Result<Option<Transfer>, StoreError>;

    /// Transfers where the account is the source or the destination, by id
    async fn list_transfers(
        &self,
        account_id: i64,
        params: ListParams,
    ) -> Result<Vec<Transfer>, StoreError>;

    async fn list_entries(
        &self,
        account_id: i64,
        params: ListParams,
    ) -> Result<Vec<Entry>, StoreError>;
}
