//! Bank Service
//!
//! The calling layer around the transfer engine: account lifecycle, the
//! currency pre-check that keeps transfers within one currency, and the
//! retry policy for transient conflicts.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::account::{Account, ListParams, NewAccount};
use crate::store::{LedgerStore, StoreError};
use crate::transfer::{
    Entry, RetryPolicy, Retryable, Transfer, TransferEngine, TransferError, TransferRequest,
    TransferResult,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BankError {
    #[error("Account not found: {0}")]
    AccountNotFound(i64),

    #[error("Account {account_id} currency mismatch: {actual} vs {expected}")]
    CurrencyMismatch {
        account_id: i64,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Retryable for BankError {
    fn is_retryable(&self) -> bool {
        match self {
            BankError::Transfer(e) => e.is_retryable(),
            BankError::Store(e) => e.is_conflict(),
            _ => false,
        }
    }
}

pub struct BankService<S> {
    store: Arc<S>,
    engine: TransferEngine<S>,
    retry: RetryPolicy,
}

impl<S: LedgerStore> BankService<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self {
            engine: TransferEngine::new(Arc::clone(&store)),
            store,
            retry,
        }
    }

    pub fn engine(&self) -> &TransferEngine<S> {
        &self.engine
    }

    pub async fn open_account(
        &self,
        owner: &str,
        currency: &str,
    ) -> Result<Account, BankError> {
        let account = self
            .store
            .create_account(&NewAccount::new(owner, currency))
            .await?;
        info!(account_id = account.id, owner, currency, "Account opened");
        Ok(account)
    }

    pub async fn account(&self, id: i64) -> Result<Account, BankError> {
        self.store
            .get_account(id)
            .await?
            .ok_or(BankError::AccountNotFound(id))
    }

    pub async fn accounts(&self, params: ListParams) -> Result<Vec<Account>, BankError> {
        Ok(self.store.list_accounts(params).await?)
    }

    /// Admin balance overwrite; bypasses the ledger
    pub async fn set_balance(&self, id: i64, balance: i64) -> Result<Account, BankError> {
        let account = self.store.set_balance(id, balance).await?;
        info!(account_id = id, balance, "Balance overwritten");
        Ok(account)
    }

    /// Delete an account that no ledger record references
    pub async fn close_account(&self, id: i64) -> Result<(), BankError> {
        if !self.store.delete_account(id).await? {
            return Err(BankError::AccountNotFound(id));
        }
        info!(account_id = id, "Account closed");
        Ok(())
    }

    pub async fn transfer_by_id(&self, id: i64) -> Result<Option<Transfer>, BankError> {
        Ok(self.store.get_transfer(id).await?)
    }

    pub async fn transfers(
        &self,
        account_id: i64,
        params: ListParams,
    ) -> Result<Vec<Transfer>, BankError> {
        Ok(self.store.list_transfers(account_id, params).await?)
    }

    pub async fn entries(
        &self,
        account_id: i64,
        params: ListParams,
    ) -> Result<Vec<Entry>, BankError> {
        Ok(self.store.list_entries(account_id, params).await?)
    }

    /// Check both accounts exist and hold the request currency, then run
    /// the transfer under the retry policy.
    pub async fn transfer(&self, req: &TransferRequest) -> Result<TransferResult, BankError> {
        self.valid_account(req.from_account_id, &req.currency)
            .await?;
        self.valid_account(req.to_account_id, &req.currency).await?;

        let result = self
            .retry
            .run(|attempt| {
                debug!(
                    attempt,
                    from = req.from_account_id,
                    to = req.to_account_id,
                    "Transfer attempt"
                );
                self.engine
                    .transfer_funds(req.from_account_id, req.to_account_id, req.amount)
            })
            .await?;
        Ok(result)
    }

    async fn valid_account(&self, id: i64, currency: &str) -> Result<Account, BankError> {
        let account = self.account(id).await?;
        if account.currency != currency {
            return Err(BankError::CurrencyMismatch {
                account_id: id,
                expected: currency.to_string(),
                actual: account.currency,
            });
        }
        Ok(account)
    }
}
