use anyhow::Result;
use sqlx::PgPool;

const CREATE_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id          BIGSERIAL PRIMARY KEY,
    owner       VARCHAR NOT NULL,
    balance     BIGINT NOT NULL CHECK (balance >= 0),
    currency    VARCHAR NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_ENTRIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    id          BIGSERIAL PRIMARY KEY,
    account_id  BIGINT NOT NULL REFERENCES accounts (id),
    amount      BIGINT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_TRANSFERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transfers (
    id               BIGSERIAL PRIMARY KEY,
    from_account_id  BIGINT NOT NULL REFERENCES accounts (id),
    to_account_id    BIGINT NOT NULL REFERENCES accounts (id),
    amount           BIGINT NOT NULL CHECK (amount > 0),
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_INDEXES: [&str; 5] = [
    "CREATE INDEX IF NOT EXISTS accounts_owner_idx ON accounts (owner)",
    "CREATE INDEX IF NOT EXISTS entries_account_id_idx ON entries (account_id)",
    "CREATE INDEX IF NOT EXISTS transfers_from_account_id_idx ON transfers (from_account_id)",
    "CREATE INDEX IF NOT EXISTS transfers_to_account_id_idx ON transfers (to_account_id)",
    "CREATE INDEX IF NOT EXISTS transfers_pair_idx ON transfers (from_account_id, to_account_id)",
];

/// Create the ledger tables and indexes if they do not exist yet
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    tracing::info!("Initializing ledger schema...");

    for (name, ddl) in [
        ("accounts", CREATE_ACCOUNTS_TABLE),
        ("entries", CREATE_ENTRIES_TABLE),
        ("transfers", CREATE_TRANSFERS_TABLE),
    ] {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create {} table: {}", name, e))?;
    }

    for ddl in CREATE_INDEXES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create index: {}", e))?;
    }

    tracing::info!("Ledger schema ready");
    Ok(())
}
