//! Engine error types.

use crate::db::StoreError;
use crate::models::{Amount, PlayerId, TableId, TableKind, TableStatus};
use thiserror::Error;

/// Engine errors
///
/// Every precondition failure leaves balances, seats and prize funds exactly
/// as they were.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Player lookup failed
    #[error("Player not found: {0}")]
    PlayerNotFound(PlayerId),

    /// Table missing or no longer accepting seats
    #[error("Table {table_id} is unavailable")]
    TableUnavailable {
        table_id: TableId,
        status: Option<TableStatus>,
    },

    /// Every seat is taken
    #[error("Table {table_id} is full ({max_seats} seats)")]
    TableFull { table_id: TableId, max_seats: usize },

    /// Player already holds a seat at the table
    #[error("Player {player_id} is already seated at table {table_id}")]
    DuplicateSeat {
        table_id: TableId,
        player_id: PlayerId,
    },

    /// Balance below the entry fee
    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: Amount, required: Amount },

    /// Fee outside the kind's allowed set
    #[error("Entry fee {entry_fee} is not offered for {kind} tables")]
    InvalidEntryFee { kind: TableKind, entry_fee: Amount },

    /// Top-up of zero or less
    #[error("Credit amount must be positive, got {0}")]
    InvalidCredit(Amount),

    /// An open table with the same kind and fee already exists
    #[error("An open {kind} table with entry fee {entry_fee} already exists")]
    DuplicateOpenTable { kind: TableKind, entry_fee: Amount },

    /// Unknown table
    #[error("Table not found: {0}")]
    NotFound(TableId),

    /// No table carries this invite token
    #[error("No table for invite token {0}")]
    InviteNotFound(String),

    /// Split or settlement invoked with the wrong number of seats
    #[error("Insufficient players on table {table_id}: need {needed}, have {current}")]
    InsufficientPlayers {
        table_id: TableId,
        needed: usize,
        current: usize,
    },

    /// Storage failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Message safe to show to a player
    ///
    /// Storage failures and wiring bugs are reported generically.
    pub fn client_message(&self) -> String {
        match self {
            EngineError::Store(_) | EngineError::InsufficientPlayers { .. } => {
                "Internal server error".to_string()
            }
            EngineError::PlayerNotFound(_) => "Player not found".to_string(),
            EngineError::InviteNotFound(_) => "Invite link is not valid".to_string(),
            EngineError::TableUnavailable { .. } => "Table is not open".to_string(),
            EngineError::TableFull { .. } => "Table is full".to_string(),
            EngineError::DuplicateSeat { .. } => "You already have a seat at this table".to_string(),
            EngineError::InsufficientFunds { required, .. } => {
                format!("Insufficient funds: entry fee is {required}")
            }
            _ => self.to_string(),
        }
    }

    /// Whether the error was caused by the request rather than the system
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            EngineError::Store(_) | EngineError::InsufficientPlayers { .. }
        )
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
