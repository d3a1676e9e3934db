//! Table store abstraction.
//!
//! The engine never holds authoritative state in memory. Every decision is
//! made inside a [`StoreTx`] that re-reads the rows it acts on, and nothing a
//! transaction wrote becomes visible unless [`StoreTx::commit`] succeeds.
//! Dropping a transaction without committing rolls every step back.

use crate::models::{
    Amount, NewTable, Player, PlayerId, Prize, Seat, Table, TableFilter, TableId, TableKind,
    TableSnapshot, TableStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Operation did not finish in time
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// Stored data could not be mapped to the model
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Write would break a uniqueness rule
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Referenced row does not exist
    #[error("Missing row: {0}")]
    Missing(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a compare-and-decrement balance debit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Debit {
    /// Balance was reduced; carries the new balance
    Applied(Amount),
    /// Balance was below the requested amount; nothing changed
    Insufficient(Amount),
}

/// Persistent storage for tables, seats, prizes and player balances
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Start a unit of work
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    /// Read a table with seats and prizes
    async fn snapshot(&self, table_id: TableId) -> StoreResult<Option<TableSnapshot>>;

    /// Look up a table by invite token
    async fn find_by_invite(&self, token: &str) -> StoreResult<Option<TableSnapshot>>;

    /// List tables matching a filter, newest first
    async fn list_tables(&self, filter: TableFilter) -> StoreResult<Vec<Table>>;

    /// Open tables of `kind` not updated since `older_than`, with their seats
    async fn stale_open_tables(
        &self,
        kind: TableKind,
        older_than: DateTime<Utc>,
    ) -> StoreResult<Vec<TableSnapshot>>;

    /// Read a player
    async fn player(&self, player_id: PlayerId) -> StoreResult<Option<Player>>;

    /// Top up a player's balance
    async fn credit(&self, player_id: PlayerId, amount: Amount) -> StoreResult<Amount>;

    /// Bump the games-played counter for every listed player
    async fn increment_games_played(&self, player_ids: &[PlayerId]) -> StoreResult<()>;

    /// Bump a player's win counter
    async fn increment_wins(&self, player_id: PlayerId) -> StoreResult<()>;
}

/// One atomic unit of work against the store
#[async_trait]
pub trait StoreTx: Send {
    /// Read a table and hold its row lock until the transaction ends
    async fn lock_table(&mut self, table_id: TableId) -> StoreResult<Option<Table>>;

    /// Read a player inside the transaction
    async fn find_player(&mut self, player_id: PlayerId) -> StoreResult<Option<Player>>;

    /// Seats of a table ordered by `joined_at`, then id
    async fn seats(&mut self, table_id: TableId) -> StoreResult<Vec<Seat>>;

    /// Prizes of a table ordered by position
    async fn prizes(&mut self, table_id: TableId) -> StoreResult<Vec<Prize>>;

    /// Number of seats the player has ever held, across all tables
    async fn count_player_seats(&mut self, player_id: PlayerId) -> StoreResult<i64>;

    /// Atomically debit a player if the balance covers the amount
    async fn debit(&mut self, player_id: PlayerId, amount: Amount) -> StoreResult<Debit>;

    /// Insert a seat
    async fn insert_seat(
        &mut self,
        table_id: TableId,
        player_id: PlayerId,
        joined_at: DateTime<Utc>,
        is_first_entry: bool,
    ) -> StoreResult<Seat>;

    /// Add to a table's prize fund and touch `updated_at`
    async fn add_to_prize_fund(&mut self, table_id: TableId, amount: Amount) -> StoreResult<Amount>;

    /// Insert an open table
    async fn insert_table(&mut self, table: NewTable) -> StoreResult<Table>;

    /// Change a table's status and touch `updated_at`
    async fn set_status(&mut self, table_id: TableId, status: TableStatus) -> StoreResult<()>;

    /// Touch `updated_at`
    async fn touch(&mut self, table_id: TableId) -> StoreResult<()>;

    /// Insert a prize record
    async fn insert_prize(
        &mut self,
        table_id: TableId,
        player_id: Option<PlayerId>,
        position: u32,
        amount: Amount,
    ) -> StoreResult<Prize>;

    /// Re-home every seat of `from` onto `to`, keeping `joined_at`
    async fn move_seats(&mut self, from: TableId, to: TableId) -> StoreResult<u64>;

    /// Serialize table creation for one kind and fee until the transaction ends
    async fn lock_pool(&mut self, kind: TableKind, entry_fee: Amount) -> StoreResult<()>;

    /// Whether an open table of this kind and fee exists
    async fn open_table_exists(&mut self, kind: TableKind, entry_fee: Amount)
    -> StoreResult<bool>;

    /// Make every step visible
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
