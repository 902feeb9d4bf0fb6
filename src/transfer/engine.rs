//! Transfer Engine
//!
//! Records a transfer, its two entries and both balance changes as one
//! transaction. The engine never retries; it reports the error kind and
//! leaves the policy to the caller (see [`RetryPolicy`](super::RetryPolicy)).

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::TransferError;
use super::types::TransferResult;
use crate::account::adjust_balances;
use crate::store::{LedgerStore, LedgerTx};

pub struct TransferEngine<S> {
    store: Arc<S>,
}

impl<S> Clone for TransferEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> TransferEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Move `amount` from one account to another atomically.
    ///
    /// Either the transfer row, both entries and both balance updates are
    /// committed together, or nothing is.
    pub async fn transfer_funds(
        &self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> Result<TransferResult, TransferError> {
        if amount <= 0 {
            return Err(TransferError::InvalidAmount(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        if from_account_id == to_account_id {
            return Err(TransferError::InvalidAmount(format!(
                "source and destination are the same account ({})",
                from_account_id
            )));
        }

        let mut tx = self.store.begin().await?;

        let result = match Self::apply(&mut tx, from_account_id, to_account_id, amount).await {
            Ok(result) => result,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed; transaction is discarded on drop");
                }
                warn!(
                    from = from_account_id,
                    to = to_account_id,
                    amount,
                    code = e.code(),
                    error = %e,
                    "Transfer aborted"
                );
                return Err(e);
            }
        };

        if let Err(e) = tx.commit().await {
            let e = TransferError::from(e);
            warn!(
                from = from_account_id,
                to = to_account_id,
                amount,
                code = e.code(),
                error = %e,
                "Transfer commit failed"
            );
            return Err(e);
        }

        info!(
            transfer_id = result.transfer.id,
            from = from_account_id,
            to = to_account_id,
            amount,
            "Transfer committed"
        );
        Ok(result)
    }

    async fn apply(
        tx: &mut S::Tx,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> Result<TransferResult, TransferError> {
        let transfer = tx
            .create_transfer(from_account_id, to_account_id, amount)
            .await?;
        let from_entry = tx.create_entry(from_account_id, -amount).await?;
        let to_entry = tx.create_entry(to_account_id, amount).await?;
        debug!(transfer_id = transfer.id, "Transfer and entries recorded");

        let mut accounts = adjust_balances(
            tx,
            &[(from_account_id, -amount), (to_account_id, amount)],
        )
        .await
        .map_err(|e| match TransferError::from(e) {
            TransferError::InsufficientFunds { account_id, .. } => {
                TransferError::InsufficientFunds { account_id, amount }
            }
            other => other,
        })?;

        let to_account = accounts.pop();
        let from_account = accounts.pop();
        let (Some(from_account), Some(to_account)) = (from_account, to_account) else {
            return Err(TransferError::StorageUnavailable(
                "balance update returned no account".to_string(),
            ));
        };

        Ok(TransferResult {
            transfer,
            from_entry,
            to_entry,
            from_account,
            to_account,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::NewAccount;
    use crate::store::MemoryStore;

    async fn setup(a_balance: i64, b_balance: i64) -> (TransferEngine<MemoryStore>, i64, i64) {
        let store = Arc::new(MemoryStore::new());
        let a = store
            .create_account(&NewAccount::new("alice", "USD"))
            .await
            .unwrap();
        let b = store
            .create_account(&NewAccount::new("bob", "USD"))
            .await
            .unwrap();
        store.set_balance(a.id, a_balance).await.unwrap();
        store.set_balance(b.id, b_balance).await.unwrap();
        (TransferEngine::new(store), a.id, b.id)
    }

    #[tokio::test]
    async fn test_transfer_result_is_complete() {
        let (engine, a, b) = setup(100, 50).await;

        let result = engine.transfer_funds(a, b, 30).await.unwrap();

        assert_eq!(result.transfer.from_account_id, a);
        assert_eq!(result.transfer.to_account_id, b);
        assert_eq!(result.transfer.amount, 30);
        assert_eq!(result.from_entry.account_id, a);
        assert_eq!(result.from_entry.amount, -30);
        assert_eq!(result.to_entry.account_id, b);
        assert_eq!(result.to_entry.amount, 30);
        assert_eq!(result.from_account.balance, 70);
        assert_eq!(result.to_account.balance, 80);
    }

    #[tokio::test]
    async fn test_result_accounts_follow_direction_not_lock_order() {
        let (engine, a, b) = setup(100, 50).await;

        // b has the higher id, so it is locked second but is the source here
        let result = engine.transfer_funds(b, a, 20).await.unwrap();
        assert_eq!(result.from_account.id, b);
        assert_eq!(result.from_account.balance, 30);
        assert_eq!(result.to_account.id, a);
        assert_eq!(result.to_account.balance, 120);
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amount() {
        let (engine, a, b) = setup(100, 50).await;

        for amount in [0, -5] {
            let err = engine.transfer_funds(a, b, amount).await.unwrap_err();
            assert!(matches!(err, TransferError::InvalidAmount(_)), "{err:?}");
        }
        assert_eq!(engine.store().transfer_count(), 0);
    }

    #[tokio::test]
    async fn test_insufficient_funds_reports_amount() {
        let (engine, a, b) = setup(100, 50).await;

        let err = engine.transfer_funds(a, b, 1000).await.unwrap_err();
        assert_eq!(
            err,
            TransferError::InsufficientFunds {
                account_id: a,
                amount: 1000
            }
        );
    }

    #[tokio::test]
    async fn test_missing_destination() {
        let (engine, a, _) = setup(100, 50).await;

        let err = engine.transfer_funds(a, 999, 10).await.unwrap_err();
        assert_eq!(err, TransferError::AccountNotFound(999));
        assert_eq!(engine.store().transfer_count(), 0);
        assert_eq!(engine.store().entry_count(), 0);
    }
}
