//! Deadlines for store round-trips.
//!
//! A stalled database must surface as a typed error to the caller rather than
//! hold a table row lock indefinitely.

use super::store::{StoreError, StoreResult};
use std::time::Duration;
use tokio::time::timeout;

/// Deadline for a single statement
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for opening or committing a transaction
pub const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for sweeper scans over many tables
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(30);

/// Run a sqlx future under a deadline
///
/// # Example
///
/// ```no_run
/// use table_pool::db::timeouts::{with_timeout, QUERY_TIMEOUT};
/// # use sqlx::PgPool;
/// # async fn example(pool: &PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let row = with_timeout(
///     QUERY_TIMEOUT,
///     sqlx::query("SELECT id FROM tables WHERE id = $1")
///         .bind(1_i64)
///         .fetch_optional(pool),
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> StoreResult<T>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    match timeout(duration, future).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout(duration)),
    }
}

/// Run a statement under [`QUERY_TIMEOUT`]
pub async fn query<F, T>(future: F) -> StoreResult<T>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    with_timeout(QUERY_TIMEOUT, future).await
}
