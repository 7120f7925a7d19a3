//! # SQLite database methods
//!
//! "Low-level" SQLite interactions, as plain functions that take a `&mut SqliteConnection`. Callers pass a pooled
//! connection for reads, or `&mut tx` when the call is part of a unit of transition.
//!
//! SQLite has no `SELECT ... FOR UPDATE`. Every unit of transition therefore starts with [`orders::lock_order`], a
//! no-op `UPDATE` on the order row. That first write takes the database write lock for the rest of the transaction,
//! so concurrent writers queue behind it (up to the busy timeout) instead of racing on stale reads.
use std::{env, str::FromStr, time::Duration};

use log::*;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Error as SqlxError,
    SqlitePool,
};

pub mod audit;
pub mod carts;
pub mod history;
pub mod monitor;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod reconciliation;
pub mod refund_ledger;
pub mod refunds;
pub mod shipments;
pub mod stock;
pub mod transitions;

const SQLITE_DB_URL: &str = "sqlite://data/zvr_orders.db";
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub fn db_url() -> String {
    let result = env::var("DB_URL").unwrap_or_else(|_| {
        info!("🗃️ DB_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("🗃️ Using database URL: {result}");
    result
}

/// Opens a WAL-mode pool. `busy_timeout` is how long a writer waits for the write lock before giving up, which is
/// also the effective per-query budget under contention.
pub async fn new_pool(url: &str, max_connections: u32, busy_timeout: Duration) -> Result<SqlitePool, SqlxError> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(busy_timeout);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}

pub(crate) fn is_unique_violation(e: &SqlxError) -> bool {
    matches!(e, SqlxError::Database(err) if err.is_unique_violation())
}
