//! Shared fixtures for integration tests
#![allow(dead_code)]

use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;

use simple_bank::{Account, LedgerStore, NewAccount};

pub const CURRENCIES: [&str; 3] = ["USD", "EUR", "CAD"];

/// Random integer in `min..=max`
pub fn random_int(min: i64, max: i64) -> i64 {
    rand::thread_rng().gen_range(min..=max)
}

pub fn random_owner() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}

pub fn random_money() -> i64 {
    random_int(0, 1000)
}

pub fn random_currency() -> &'static str {
    CURRENCIES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("USD")
}

/// Create an account and give it an opening balance
pub async fn funded_account<S: LedgerStore>(store: &S, currency: &str, balance: i64) -> Account {
    let account = store
        .create_account(&NewAccount::new(random_owner(), currency))
        .await
        .expect("create account");
    store
        .set_balance(account.id, balance)
        .await
        .expect("set opening balance")
}
