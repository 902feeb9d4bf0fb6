//! In-Memory Ledger Store
//!
//! Mirrors the transactional contract of the PostgreSQL store without a
//! database:
//!
//! - Each account row has its own async mutex. `get_account_for_update`
//!   acquires it (bounded by the lock timeout) and the guard lives in the
//!   transaction until commit, rollback or drop.
//! - Writes are buffered in the transaction and applied to the committed
//!   tables in one step on commit. An aborted transaction leaves nothing.
//! - Ids come from per-table sequences that are not rolled back, like
//!   PostgreSQL sequences.
//!
//! Faults can be injected with [`MemoryStore::fail_next_commits`] to exercise
//! abort and retry paths.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::{debug, warn};

use super::{LedgerStore, LedgerTx, StoreError};
use crate::account::{Account, BALANCE_FLOOR, ListParams, NewAccount};
use crate::transfer::types::{Entry, Transfer};

/// Default lock-wait limit, matching the PostgreSQL store's default config
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<i64, Account>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
}

impl Tables {
    fn is_referenced(&self, account_id: i64) -> bool {
        self.entries.values().any(|e| e.account_id == account_id)
            || self
                .transfers
                .values()
                .any(|t| t.from_account_id == account_id || t.to_account_id == account_id)
    }
}

struct Inner {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<i64, Arc<RowLock<()>>>>,
    account_seq: AtomicI64,
    entry_seq: AtomicI64,
    transfer_seq: AtomicI64,
    lock_timeout: Duration,
    failing_commits: AtomicUsize,
}

impl Inner {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        // Tables are only mutated in short non-panicking sections
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn row_lock(&self, id: i64) -> Arc<RowLock<()>> {
        let mut locks = self
            .row_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(id).or_default().clone()
    }

    async fn lock_row(&self, id: i64) -> Result<OwnedMutexGuard<()>, StoreError> {
        let lock = self.row_lock(id);
        tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                StoreError::Conflict(format!(
                    "lock wait on account {} exceeded {:?}",
                    id, self.lock_timeout
                ))
            })
    }
}

/// In-process [`LedgerStore`]. Clones share the same tables.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                account_seq: AtomicI64::new(1),
                entry_seq: AtomicI64::new(1),
                transfer_seq: AtomicI64::new(1),
                lock_timeout,
                failing_commits: AtomicUsize::new(0),
            }),
        }
    }

    /// Make the next `n` commits abort with a conflict, as a serialization
    /// failure reported at commit time would.
    pub fn fail_next_commits(&self, n: usize) {
        self.inner.failing_commits.store(n, Ordering::SeqCst);
    }

    pub fn transfer_count(&self) -> usize {
        self.inner.tables().transfers.len()
    }

    pub fn entry_count(&self) -> usize {
        self.inner.tables().entries.len()
    }

    /// Sum of every account balance
    pub fn total_balance(&self) -> i64 {
        self.inner.tables().accounts.values().map(|a| a.balance).sum()
    }

    /// Sum of all entries recorded against an account
    pub fn entry_sum(&self, account_id: i64) -> i64 {
        self.inner
            .tables()
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .map(|e| e.amount)
            .sum()
    }

    fn take_commit_fault(&self) -> bool {
        self.inner
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// One open in-memory transaction
pub struct MemoryTx {
    store: MemoryStore,
    guards: HashMap<i64, OwnedMutexGuard<()>>,
    /// Locked rows with this transaction's pending balance changes applied
    accounts: HashMap<i64, Account>,
    transfers: Vec<Transfer>,
    entries: Vec<Entry>,
    finished: bool,
}

impl MemoryTx {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::Unavailable(
                "transaction already finished".to_string(),
            ));
        }
        Ok(())
    }

    fn account_exists(&self, id: i64) -> bool {
        self.accounts.contains_key(&id) || self.store.inner.tables().accounts.contains_key(&id)
    }

    fn discard(&mut self) {
        self.accounts.clear();
        self.transfers.clear();
        self.entries.clear();
        self.guards.clear();
        self.finished = true;
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn get_account_for_update(&mut self, id: i64) -> Result<Option<Account>, StoreError> {
        self.ensure_open()?;
        if let Some(account) = self.accounts.get(&id) {
            return Ok(Some(account.clone()));
        }
        if !self.store.inner.tables().accounts.contains_key(&id) {
            return Ok(None);
        }

        let guard = self.store.inner.lock_row(id).await?;

        // Re-read under the lock: the row may have changed or been deleted
        let Some(account) = self.store.inner.tables().accounts.get(&id).cloned() else {
            return Ok(None);
        };
        self.guards.insert(id, guard);
        self.accounts.insert(id, account.clone());
        Ok(Some(account))
    }

    async fn add_account_balance(&mut self, id: i64, delta: i64) -> Result<Account, StoreError> {
        self.ensure_open()?;
        // Like an UPDATE, this takes the row lock implicitly
        if self.get_account_for_update(id).await?.is_none() {
            return Err(StoreError::AccountNotFound(id));
        }
        let account = self
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::AccountNotFound(id))?;

        let balance = account
            .balance
            .checked_add(delta)
            .ok_or(StoreError::OutOfRange(id))?;
        if balance < BALANCE_FLOOR {
            return Err(StoreError::NegativeBalance(id));
        }
        account.balance = balance;
        Ok(account.clone())
    }

    async fn create_transfer(
        &mut self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> Result<Transfer, StoreError> {
        self.ensure_open()?;
        for id in [from_account_id, to_account_id] {
            if !self.account_exists(id) {
                return Err(StoreError::AccountNotFound(id));
            }
        }

        let transfer = Transfer {
            id: self.store.inner.transfer_seq.fetch_add(1, Ordering::SeqCst),
            from_account_id,
            to_account_id,
            amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(&mut self, account_id: i64, amount: i64) -> Result<Entry, StoreError> {
        self.ensure_open()?;
        if !self.account_exists(account_id) {
            return Err(StoreError::AccountNotFound(account_id));
        }

        let entry = Entry {
            id: self.store.inner.entry_seq.fetch_add(1, Ordering::SeqCst),
            account_id,
            amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.store.take_commit_fault() {
            warn!("Injected commit failure, discarding transaction");
            self.discard();
            return Err(StoreError::Conflict(
                "could not serialize access due to concurrent update".to_string(),
            ));
        }

        {
            let mut tables = self.store.inner.tables();
            // Row locks are still held, so no other transaction touched these rows
            for (id, account) in self.accounts.drain() {
                if let Some(row) = tables.accounts.get_mut(&id) {
                    row.balance = account.balance;
                }
            }
            for transfer in self.transfers.drain(..) {
                tables.transfers.insert(transfer.id, transfer);
            }
            for entry in self.entries.drain(..) {
                tables.entries.insert(entry.id, entry);
            }
        }

        debug!(locked_rows = self.guards.len(), "Memory transaction committed");
        self.discard();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if !self.finished {
            self.discard();
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        Ok(MemoryTx {
            store: self.clone(),
            guards: HashMap::new(),
            accounts: HashMap::new(),
            transfers: Vec::new(),
            entries: Vec::new(),
            finished: false,
        })
    }

    async fn create_account(&self, params: &NewAccount) -> Result<Account, StoreError> {
        let account = Account {
            id: self.inner.account_seq.fetch_add(1, Ordering::SeqCst),
            owner: params.owner.clone(),
            balance: 0,
            currency: params.currency.clone(),
            created_at: Utc::now(),
        };
        self.inner
            .tables()
            .accounts
            .insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: i64) -> Result<Option<Account>, StoreError> {
        Ok(self.inner.tables().accounts.get(&id).cloned())
    }

    async fn list_accounts(&self, params: ListParams) -> Result<Vec<Account>, StoreError> {
        Ok(self
            .inner
            .tables()
            .accounts
            .values()
            .skip(params.offset.max(0) as usize)
            .take(params.limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn set_balance(&self, id: i64, balance: i64) -> Result<Account, StoreError> {
        if balance < BALANCE_FLOOR {
            return Err(StoreError::NegativeBalance(id));
        }
        if !self.inner.tables().accounts.contains_key(&id) {
            return Err(StoreError::AccountNotFound(id));
        }
        let _guard = self.inner.lock_row(id).await?;

        let mut tables = self.inner.tables();
        let account = tables
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::AccountNotFound(id))?;
        account.balance = balance;
        Ok(account.clone())
    }

    async fn delete_account(&self, id: i64) -> Result<bool, StoreError> {
        if !self.inner.tables().accounts.contains_key(&id) {
            return Ok(false);
        }
        let _guard = self.inner.lock_row(id).await?;

        let mut tables = self.inner.tables();
        if tables.is_referenced(id) {
            return Err(StoreError::Referenced(id));
        }
        Ok(tables.accounts.remove(&id).is_some())
    }

    async fn get_transfer(&self, id: i64) -> Result<Option<Transfer>, StoreError> {
        Ok(self.inner.tables().transfers.get(&id).cloned())
    }

    async fn list_transfers(
        &self,
        account_id: i64,
        params: ListParams,
    ) -> Result<Vec<Transfer>, StoreError> {
        Ok(self
            .inner
            .tables()
            .transfers
            .values()
            .filter(|t| t.from_account_id == account_id || t.to_account_id == account_id)
            .skip(params.offset.max(0) as usize)
            .take(params.limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list_entries(
        &self,
        account_id: i64,
        params: ListParams,
    ) -> Result<Vec<Entry>, StoreError> {
        Ok(self
            .inner
            .tables()
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .skip(params.offset.max(0) as usize)
            .take(params.limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
