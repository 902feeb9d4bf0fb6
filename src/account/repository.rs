//! Locking balance updates, executed inside a caller's transaction

use tracing::{debug, warn};

use super::lock_order::lock_order;
use super::models::{Account, BALANCE_FLOOR};
use crate::store::{LedgerTx, StoreError};

/// Lock the account row, apply `delta` and return the updated account.
///
/// The lock is taken before the balance is read, so two concurrent
/// adjustments can never both start from the same stale balance. The floor
/// check sees any earlier changes made by the same transaction.
pub async fn lock_and_adjust_balance<T: LedgerTx + ?Sized>(
    tx: &mut T,
    account_id: i64,
    delta: i64,
) -> Result<Account, StoreError> {
    let account = tx
        .get_account_for_update(account_id)
        .await?
        .ok_or(StoreError::AccountNotFound(account_id))?;

    let balance = account
        .balance
        .checked_add(delta)
        .ok_or(StoreError::OutOfRange(account_id))?;
    if balance < BALANCE_FLOOR {
        warn!(
            account_id,
            balance = account.balance,
            delta,
            "Adjustment rejected: balance would go negative"
        );
        return Err(StoreError::NegativeBalance(account_id));
    }

    let updated = tx.add_account_balance(account_id, delta).await?;
    debug!(account_id, delta, balance = updated.balance, "Balance adjusted");
    Ok(updated)
}

/// Apply several `(account_id, delta)` adjustments in one transaction.
///
/// Rows are locked in ascending id order whatever order the caller lists
/// them in; results come back in the caller's order. Every multi-account
/// mutation goes through here.
pub async fn adjust_balances<T: LedgerTx + ?Sized>(
    tx: &mut T,
    adjustments: &[(i64, i64)],
) -> Result<Vec<Account>, StoreError> {
    let ids: Vec<i64> = adjustments.iter().map(|&(id, _)| id).collect();

    let mut updated: Vec<Option<Account>> = vec![None; adjustments.len()];
    for i in lock_order(&ids) {
        let (account_id, delta) = adjustments[i];
        updated[i] = Some(lock_and_adjust_balance(tx, account_id, delta).await?);
    }

    Ok(updated.into_iter().flatten().collect())
}
