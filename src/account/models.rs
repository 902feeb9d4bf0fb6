//! Data models for bank accounts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lowest balance an account may hold after any adjustment
pub const BALANCE_FLOOR: i64 = 0;

/// Bank account
///
/// `balance` is in minor currency units and always equals the opening
/// balance plus the sum of the account's entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: i64,
    pub owner: String,
    pub balance: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// Parameters for opening an account. New accounts start at zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub owner: String,
    pub currency: String,
}

impl NewAccount {
    pub fn new(owner: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            currency: currency.into(),
        }
    }
}

/// Limit/offset pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    pub limit: i64,
    pub offset: i64,
}

impl ListParams {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }
    }

    /// 1-based page number and page size
    pub fn page(page_id: i64, page_size: i64) -> Self {
        Self {
            limit: page_size,
            offset: (page_id.max(1) - 1) * page_size,
        }
    }
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
        }
    }
}
