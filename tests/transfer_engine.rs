//! Transfer engine behaviour against the in-memory ledger store

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use simple_bank::{
    LedgerStore, LedgerTx, ListParams, MemoryStore, TransferEngine, TransferError,
};

use common::{funded_account, random_int};

fn engine(store: &Arc<MemoryStore>) -> TransferEngine<MemoryStore> {
    TransferEngine::new(Arc::clone(store))
}

async fn balance(store: &MemoryStore, id: i64) -> i64 {
    store.get_account(id).await.unwrap().unwrap().balance
}

// ========================================================================
// Scenarios
// ========================================================================

#[tokio::test]
async fn transfer_moves_funds_and_records_ledger() {
    let store = Arc::new(MemoryStore::new());
    let a = funded_account(store.as_ref(), "USD", 100).await;
    let b = funded_account(store.as_ref(), "USD", 50).await;

    let result = engine(&store).transfer_funds(a.id, b.id, 30).await.unwrap();

    assert_eq!(result.from_account.balance, 70);
    assert_eq!(result.to_account.balance, 80);
    assert_eq!(result.transfer.from_account_id, a.id);
    assert_eq!(result.transfer.to_account_id, b.id);
    assert_eq!(result.transfer.amount, 30);

    let a_entries = store.list_entries(a.id, ListParams::default()).await.unwrap();
    let b_entries = store.list_entries(b.id, ListParams::default()).await.unwrap();
    assert_eq!(a_entries.len(), 1);
    assert_eq!(a_entries[0].amount, -30);
    assert_eq!(b_entries.len(), 1);
    assert_eq!(b_entries[0].amount, 30);

    let stored = store.get_transfer(result.transfer.id).await.unwrap();
    assert_eq!(stored, Some(result.transfer));
    assert_eq!(balance(&store, a.id).await, 70);
    assert_eq!(balance(&store, b.id).await, 80);
}

#[tokio::test]
async fn overdraw_fails_and_leaves_balances_unchanged() {
    let store = Arc::new(MemoryStore::new());
    let a = funded_account(store.as_ref(), "USD", 100).await;
    let b = funded_account(store.as_ref(), "USD", 50).await;

    let err = engine(&store)
        .transfer_funds(a.id, b.id, 1000)
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::InsufficientFunds { account_id, .. } if account_id == a.id));
    assert!(!err.is_retryable());
    assert_eq!(balance(&store, a.id).await, 100);
    assert_eq!(balance(&store, b.id).await, 50);
    assert_eq!(store.transfer_count(), 0);
    assert_eq!(store.entry_count(), 0);
}

#[tokio::test]
async fn self_transfer_is_invalid() {
    let store = Arc::new(MemoryStore::new());
    let a = funded_account(store.as_ref(), "USD", 100).await;

    let err = engine(&store).transfer_funds(a.id, a.id, 10).await.unwrap_err();

    assert!(matches!(err, TransferError::InvalidAmount(_)));
    assert_eq!(balance(&store, a.id).await, 100);
    assert_eq!(store.transfer_count(), 0);
}

#[tokio::test]
async fn missing_source_is_terminal() {
    let store = Arc::new(MemoryStore::new());
    let b = funded_account(store.as_ref(), "USD", 50).await;

    let err = engine(&store).transfer_funds(777, b.id, 10).await.unwrap_err();

    assert_eq!(err, TransferError::AccountNotFound(777));
    assert!(!err.is_retryable());
    assert_eq!(balance(&store, b.id).await, 50);
}

// ========================================================================
// Atomicity & retry safety
// ========================================================================

#[tokio::test]
async fn aborted_commit_leaves_no_partial_rows() {
    let store = Arc::new(MemoryStore::new());
    let a = funded_account(store.as_ref(), "USD", 100).await;
    let b = funded_account(store.as_ref(), "USD", 50).await;

    store.fail_next_commits(1);
    let err = engine(&store).transfer_funds(a.id, b.id, 30).await.unwrap_err();

    assert!(err.is_retryable(), "got {err:?}");
    assert_eq!(store.transfer_count(), 0);
    assert_eq!(store.entry_count(), 0);
    assert_eq!(balance(&store, a.id).await, 100);
    assert_eq!(balance(&store, b.id).await, 50);
}

#[tokio::test]
async fn retry_after_conflict_produces_exactly_one_transfer() {
    let store = Arc::new(MemoryStore::new());
    let a = funded_account(store.as_ref(), "USD", 100).await;
    let b = funded_account(store.as_ref(), "USD", 50).await;
    let engine = engine(&store);

    store.fail_next_commits(1);
    assert!(engine.transfer_funds(a.id, b.id, 30).await.is_err());
    engine.transfer_funds(a.id, b.id, 30).await.unwrap();

    assert_eq!(store.transfer_count(), 1);
    assert_eq!(store.entry_count(), 2);
    assert_eq!(balance(&store, a.id).await, 70);
    assert_eq!(balance(&store, b.id).await, 80);
}

#[tokio::test]
async fn lock_wait_timeout_is_a_clean_conflict() {
    let store = Arc::new(MemoryStore::with_lock_timeout(Duration::from_millis(30)));
    let a = funded_account(store.as_ref(), "USD", 100).await;
    let b = funded_account(store.as_ref(), "USD", 50).await;
    let engine = engine(&store);

    let mut holder = store.begin().await.unwrap();
    holder.get_account_for_update(b.id).await.unwrap();

    let err = engine.transfer_funds(a.id, b.id, 30).await.unwrap_err();
    assert!(matches!(err, TransferError::TransientConflict(_)), "got {err:?}");
    assert_eq!(store.transfer_count(), 0);
    assert_eq!(balance(&store, a.id).await, 100);

    holder.rollback().await.unwrap();
    engine.transfer_funds(a.id, b.id, 30).await.unwrap();
    assert_eq!(balance(&store, a.id).await, 70);
    assert_eq!(balance(&store, b.id).await, 80);
}

// ========================================================================
// Concurrency
// ========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transfers_same_direction() {
    let store = Arc::new(MemoryStore::new());
    let a = funded_account(store.as_ref(), "USD", 1000).await;
    let b = funded_account(store.as_ref(), "USD", 0).await;
    let n = 10;
    let amount = 10;

    let handles: Vec<_> = (0..n)
        .map(|_| {
            let engine = engine(&store);
            tokio::spawn(async move { engine.transfer_funds(a.id, b.id, amount).await })
        })
        .collect();

    let mut from_balances = Vec::new();
    for result in join_all(handles).await {
        let result = result.unwrap().unwrap();
        from_balances.push(result.from_account.balance);
    }

    // Every commit observed a distinct post-state: no lost updates
    from_balances.sort_unstable();
    from_balances.dedup();
    assert_eq!(from_balances.len(), n as usize);

    assert_eq!(balance(&store, a.id).await, 1000 - n * amount);
    assert_eq!(balance(&store, b.id).await, n * amount);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_direction_transfers_do_not_deadlock() {
    let store = Arc::new(MemoryStore::with_lock_timeout(Duration::from_secs(5)));
    let a = funded_account(store.as_ref(), "USD", 1000).await;
    let b = funded_account(store.as_ref(), "USD", 1000).await;
    let amount = 10;

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let engine = engine(&store);
            let (from, to) = if i % 2 == 0 { (a.id, b.id) } else { (b.id, a.id) };
            tokio::spawn(async move { engine.transfer_funds(from, to, amount).await })
        })
        .collect();

    let results = tokio::time::timeout(Duration::from_secs(10), join_all(handles))
        .await
        .expect("transfers should not deadlock");
    for result in results {
        result.unwrap().unwrap();
    }

    assert_eq!(balance(&store, a.id).await, 1000);
    assert_eq!(balance(&store, b.id).await, 1000);
    assert_eq!(store.transfer_count(), 20);
    assert_eq!(store.entry_count(), 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn random_transfers_conserve_money_and_never_go_negative() {
    let store = Arc::new(MemoryStore::new());
    let mut accounts = Vec::new();
    let mut opening = Vec::new();
    for _ in 0..5 {
        let account = funded_account(store.as_ref(), "USD", random_int(0, 200)).await;
        opening.push((account.id, account.balance));
        accounts.push(account.id);
    }
    let total_before = store.total_balance();

    // Plan first: the thread-local rng must not cross an await
    let plan: Vec<(i64, i64, i64)> = (0..60)
        .map(|_| {
            let from = accounts[random_int(0, 4) as usize];
            let mut to = accounts[random_int(0, 4) as usize];
            if to == from {
                to = accounts[(accounts.iter().position(|&id| id == from).unwrap_or(0) + 1) % 5];
            }
            (from, to, random_int(1, 120))
        })
        .collect();

    let handles: Vec<_> = plan
        .into_iter()
        .map(|(from, to, amount)| {
            let engine = engine(&store);
            tokio::spawn(async move { engine.transfer_funds(from, to, amount).await })
        })
        .collect();

    let mut committed = 0;
    for result in join_all(handles).await {
        match result.unwrap() {
            Ok(result) => {
                committed += 1;
                assert!(result.from_account.balance >= 0);
                assert!(result.to_account.balance >= 0);
            }
            Err(TransferError::InsufficientFunds { .. }) => {}
            Err(other) => panic!("unexpected transfer error: {other:?}"),
        }
    }

    assert_eq!(store.total_balance(), total_before);
    assert_eq!(store.transfer_count(), committed);
    assert_eq!(store.entry_count(), committed * 2);
    for (id, opening_balance) in opening {
        let current = balance(&store, id).await;
        assert!(current >= 0);
        assert_eq!(current, opening_balance + store.entry_sum(id));
    }
}
