//! simple_bank bootstrap
//!
//! Loads `config/{env}.yaml`, connects to PostgreSQL, applies the ledger
//! schema and checks the store is usable.
//!
//! ```text
//! simple_bank [--env dev]
//! ```

use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use simple_bank::db::{Database, ensure_schema};
use simple_bank::{AppConfig, BankService, ListParams, PgStore, RetryPolicy};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _guard = simple_bank::logging::init_logging(&config);

    info!(
        env = %env,
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        "simple_bank starting"
    );

    let db = Database::connect(&config.database)
        .await
        .context("cannot connect to db")?;
    db.health_check().await.context("database health check failed")?;
    ensure_schema(db.pool()).await?;

    let store = Arc::new(PgStore::new(
        db.into_pool(),
        config.database.isolation_level,
        config.database.lock_timeout(),
    ));
    let bank = BankService::new(Arc::clone(&store), RetryPolicy::from(&config.retry));

    let first_page = bank.accounts(ListParams::default()).await?;
    info!(
        isolation = %store.isolation(),
        first_page = first_page.len(),
        "Ledger store ready"
    );
    Ok(())
}
