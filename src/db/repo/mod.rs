//! Repository layer for database operations.
//!
//! Operations that take part in an event transaction are free functions over
//! `&mut SqliteConnection`, grouped by table family:
//! - `tree.rs` - placement log, ancestor links, subtree counts
//! - `ledger.rs` - append-only earnings
//! - `packages.rs` - packages and installment schedules
//! - `autopool.rs` - matrix positions and fund movements
//! - `aggregates.rs` - member summaries, binary cycles, processed events, plan versions
//!
//! `Repository` wraps the pool, opens transactions, and exposes read paths for the API.

pub mod aggregates;
pub mod autopool;
pub mod ledger;
pub mod packages;
pub mod tree;

use crate::domain::Decimal;
use sqlx::sqlite::{Sqlite, SqlitePool};
use sqlx::Transaction;
use std::str::FromStr;
use tracing::warn;

pub use aggregates::{CycleRecord, PlanRegistration};
pub use ledger::EarningFilter;

/// Repository for database operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open a transaction; dropping it without commit rolls back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Parse a stored decimal column, falling back to zero on corrupt data.
pub(crate) fn parse_decimal(column: &str, owner: &str, raw: &str) -> Decimal {
    Decimal::from_str(raw).unwrap_or_else(|e| {
        warn!(
            owner = %owner,
            column = %column,
            value = %raw,
            error = %e,
            "Failed to parse stored decimal, using default"
        );
        Decimal::default()
    })
}

/// Parse a stored enum-like column, falling back to `fallback` on corrupt data.
pub(crate) fn parse_or<T: FromStr>(column: &str, owner: &str, raw: &str, fallback: T) -> T {
    T::from_str(raw).unwrap_or_else(|_| {
        warn!(
            owner = %owner,
            column = %column,
            value = %raw,
            "Failed to parse stored value, using default"
        );
        fallback
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::init_db;
    use tempfile::TempDir;

    /// Fresh repository on a temp file; keep the `TempDir` alive for the test's duration.
    pub async fn temp_repo() -> (TempDir, Repository) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (temp_dir, Repository::new(pool))
    }
}
