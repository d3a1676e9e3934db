//! # Table Pool
//!
//! Lifecycle and settlement engine for pay-to-enter tables.
//!
//! Players pay an entry fee to take a seat. When a table fills it resolves
//! according to its kind:
//!
//! - **Linear** (15 seats): the earliest joiner wins the whole prize fund and
//!   everyone else continues on two fresh tables.
//! - **Random** (12 seats): three random seats share the fund 50/30/20 and a
//!   replacement table opens.
//!
//! A background [`sweeper`] folds stale, under-filled linear tables together.
//!
//! ## Core Modules
//!
//! - [`models`]: tables, seats, prizes and money
//! - [`db`]: the transactional table store (PostgreSQL or in-memory)
//! - [`engine`]: joins, splits and settlements
//! - [`sweeper`]: periodic consolidation
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use table_pool::{Amount, MemoryStore, TableEngine, TableKind};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = Arc::new(MemoryStore::new());
//! let player = store.add_player(Amount::from_major(20)).await;
//!
//! let engine = TableEngine::new(store);
//! let table = engine.create_table(TableKind::Linear, Amount::from_major(5)).await.unwrap();
//! let joined = engine.join_table(table.table.id, player).await.unwrap();
//!
//! assert_eq!(joined.balance, Amount::from_major(15));
//! assert_eq!(joined.snapshot.table.prize_fund, Amount::from_major(50));
//! # }
//! ```

/// Persistent storage for tables, seats, prizes and balances.
pub mod db;
pub use db::{
    Database, DatabaseConfig, Debit, MemoryStore, PgTableStore, StoreError, StoreResult, StoreTx,
    TableStore,
};

/// Seat assignment, capacity resolution and settlement.
pub mod engine;
pub use engine::{
    JoinOutcome, LogNotifier, Notifier, RandomSource, SeededRandom, SettleOutcome, SplitOutcome,
    TableEngine, ThreadRandom, Transition,
};

pub mod errors;
pub use errors::{EngineError, EngineResult};

pub mod models;
pub use models::{
    Amount, Player, PlayerId, Prize, Seat, Table, TableFilter, TableId, TableKind, TableSnapshot,
    TableStatus, invite_link,
};

/// Background consolidation of stale linear tables.
pub mod sweeper;
pub use sweeper::{SweepReport, Sweeper, SweeperConfig};
