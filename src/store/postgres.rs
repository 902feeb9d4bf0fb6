//! PostgreSQL Ledger Store
//!
//! Every ledger transaction runs at the configured isolation level with a
//! `lock_timeout`, so a blocked row lock surfaces as a conflict instead of
//! hanging. Driver errors are classified by SQLSTATE in [`classify`].

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, warn};

use super::{LedgerStore, LedgerTx, StoreError};
use crate::account::{Account, BALANCE_FLOOR, ListParams, NewAccount};
use crate::db::IsolationLevel;
use crate::transfer::types::{Entry, Transfer};

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";

/// What a failed statement was operating on, used to name the missing or
/// offending row when a constraint fires.
#[derive(Debug, Clone, Copy)]
enum ErrContext {
    None,
    Account(i64),
    Transfer { from: i64, to: i64 },
    Delete(i64),
}

/// Store-agnostic class of a PostgreSQL SQLSTATE code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SqlStateClass {
    /// serialization_failure, deadlock_detected, lock_not_available, query_canceled
    Conflict,
    ForeignKeyViolation,
    CheckViolation,
    NumericOutOfRange,
}

pub(crate) fn sqlstate_class(code: &str) -> Option<SqlStateClass> {
    match code {
        "40001" | "40P01" | "55P03" | "57014" => Some(SqlStateClass::Conflict),
        "23503" => Some(SqlStateClass::ForeignKeyViolation),
        "23514" => Some(SqlStateClass::CheckViolation),
        "22003" => Some(SqlStateClass::NumericOutOfRange),
        _ => None,
    }
}

fn classify(err: sqlx::Error, ctx: ErrContext) -> StoreError {
    let db_err = match err {
        sqlx::Error::Database(db_err) => db_err,
        sqlx::Error::RowNotFound => {
            return match ctx {
                ErrContext::Account(id) | ErrContext::Delete(id) => StoreError::AccountNotFound(id),
                _ => StoreError::Unavailable("row not found".to_string()),
            };
        }
        other => return StoreError::Unavailable(other.to_string()),
    };

    let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
    match (sqlstate_class(&code), ctx) {
        (Some(SqlStateClass::Conflict), _) => {
            StoreError::Conflict(format!("{} (SQLSTATE {})", db_err.message(), code))
        }
        (Some(SqlStateClass::ForeignKeyViolation), ErrContext::Account(id)) => {
            StoreError::AccountNotFound(id)
        }
        (Some(SqlStateClass::ForeignKeyViolation), ErrContext::Transfer { from, to }) => {
            if db_err
                .constraint()
                .is_some_and(|c| c.contains("to_account"))
            {
                StoreError::AccountNotFound(to)
            } else {
                StoreError::AccountNotFound(from)
            }
        }
        (Some(SqlStateClass::ForeignKeyViolation), ErrContext::Delete(id)) => {
            StoreError::Referenced(id)
        }
        (Some(SqlStateClass::CheckViolation), ErrContext::Account(id)) => {
            StoreError::NegativeBalance(id)
        }
        (Some(SqlStateClass::NumericOutOfRange), ErrContext::Account(id)) => {
            StoreError::OutOfRange(id)
        }
        _ => StoreError::Unavailable(format!("{} (SQLSTATE {})", db_err.message(), code)),
    }
}

/// PostgreSQL-backed [`LedgerStore`]
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    isolation: IsolationLevel,
    set_isolation: String,
    set_lock_timeout: String,
}

impl PgStore {
    pub fn new(pool: PgPool, isolation: IsolationLevel, lock_timeout: Duration) -> Self {
        Self {
            pool,
            isolation,
            set_isolation: format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.as_sql()),
            set_lock_timeout: format!("SET LOCAL lock_timeout = '{}ms'", lock_timeout.as_millis()),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }
}

/// One open PostgreSQL transaction. Dropping it unfinished rolls back.
pub struct PgTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTx {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(StoreError::Unavailable(
                "transaction already finished".to_string(),
            )),
        }
    }
}

#[async_trait]
impl LedgerTx for PgTx {
    async fn get_account_for_update(&mut self, id: i64) -> Result<Option<Account>, StoreError> {
        // NO KEY UPDATE: inserts referencing the account hold KEY SHARE
        // locks, which must not conflict with the balance lock.
        let sql = format!(
            "SELECT {} FROM accounts WHERE id = $1 FOR NO KEY UPDATE",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| classify(e, ErrContext::Account(id)))
    }

    async fn add_account_balance(&mut self, id: i64, delta: i64) -> Result<Account, StoreError> {
        let sql = format!(
            "UPDATE accounts SET balance = balance + $1 WHERE id = $2 RETURNING {}",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(delta)
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| classify(e, ErrContext::Account(id)))?
            .ok_or(StoreError::AccountNotFound(id))
    }

    async fn create_transfer(
        &mut self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> Result<Transfer, StoreError> {
        sqlx::query_as::<_, Transfer>(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, amount)
            VALUES ($1, $2, $3)
            RETURNING id, from_account_id, to_account_id, amount, created_at
            "#,
        )
        .bind(from_account_id)
        .bind(to_account_id)
        .bind(amount)
        .fetch_one(self.conn()?)
        .await
        .map_err(|e| {
            classify(
                e,
                ErrContext::Transfer {
                    from: from_account_id,
                    to: to_account_id,
                },
            )
        })
    }

    async fn create_entry(&mut self, account_id: i64, amount: i64) -> Result<Entry, StoreError> {
        sqlx::query_as::<_, Entry>(
            r#"
            INSERT INTO entries (account_id, amount)
            VALUES ($1, $2)
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .fetch_one(self.conn()?)
        .await
        .map_err(|e| classify(e, ErrContext::Account(account_id)))
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        match self.tx.take() {
            Some(tx) => tx.commit().await.map_err(|e| classify(e, ErrContext::None)),
            None => Err(StoreError::Unavailable(
                "transaction already finished".to_string(),
            )),
        }
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        match self.tx.take() {
            Some(tx) => tx.rollback().await.map_err(|e| classify(e, ErrContext::None)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| classify(e, ErrContext::None))?;

        sqlx::query(&self.set_isolation)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify(e, ErrContext::None))?;
        sqlx::query(&self.set_lock_timeout)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify(e, ErrContext::None))?;

        debug!(isolation = %self.isolation, "Ledger transaction started");
        Ok(PgTx { tx: Some(tx) })
    }

    async fn create_account(&self, params: &NewAccount) -> Result<Account, StoreError> {
        let sql = format!(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, 0, $2) RETURNING {}",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(&params.owner)
            .bind(&params.currency)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, ErrContext::None))
    }

    async fn get_account(&self, id: i64) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, ErrContext::Account(id)))
    }

    async fn list_accounts(&self, params: ListParams) -> Result<Vec<Account>, StoreError> {
        let sql = format!(
            "SELECT {} FROM accounts ORDER BY id LIMIT $1 OFFSET $2",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(params.limit)
            .bind(params.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(e, ErrContext::None))
    }

    async fn set_balance(&self, id: i64, balance: i64) -> Result<Account, StoreError> {
        if balance < BALANCE_FLOOR {
            return Err(StoreError::NegativeBalance(id));
        }
        let sql = format!(
            "UPDATE accounts SET balance = $2 WHERE id = $1 RETURNING {}",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .bind(balance)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, ErrContext::Account(id)))?
            .ok_or(StoreError::AccountNotFound(id))
    }

    async fn delete_account(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, ErrContext::Delete(id)))?;

        if result.rows_affected() == 0 {
            warn!(account_id = id, "Delete requested for unknown account");
        }
        Ok(result.rows_affected() > 0)
    }

    async fn get_transfer(&self, id: i64) -> Result<Option<Transfer>, StoreError> {
        sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(e, ErrContext::None))
    }

    async fn list_transfers(
        &self,
        account_id: i64,
        params: ListParams,
    ) -> Result<Vec<Transfer>, StoreError> {
        sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE from_account_id = $1 OR to_account_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify(e, ErrContext::None))
    }

    async fn list_entries(
        &self,
        account_id: i64,
        params: ListParams,
    ) -> Result<Vec<Entry>, StoreError> {
        sqlx::query_as::<_, Entry>(
            r#"
            SELECT id, account_id, amount, created_at
            FROM entries
            WHERE account_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify(e, ErrContext::None))
    }
}
