//! Table lifecycle engine.
//!
//! [`TableEngine`] owns no table state. Every operation opens a store
//! transaction, re-reads the rows it needs, applies its changes and commits.
//! Counters and notifications run only after a successful commit.

pub mod notify;
pub mod random;
pub mod resolver;
pub mod settlement;

pub use notify::{LogNotifier, Notifier, NotifyError};
pub use random::{RandomSource, SeededRandom, ThreadRandom};
pub use resolver::{Transition, resolve_capacity};
pub use settlement::{SettleOutcome, SplitOutcome, bisect, prize_split};

use crate::db::{Debit, StoreTx, TableStore};
use crate::errors::{EngineError, EngineResult};
use crate::models::{
    Amount, NewTable, Player, PlayerId, Seat, Table, TableFilter, TableId, TableKind,
    TableSnapshot, TableStatus,
};
use chrono::Utc;
use std::sync::Arc;

/// Result of a successful join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub seat: Seat,
    /// Player balance after the entry fee
    pub balance: Amount,
    /// The joined table after capacity resolution
    pub snapshot: TableSnapshot,
    pub transition: Transition,
}

/// Table lifecycle engine
#[derive(Clone)]
pub struct TableEngine {
    store: Arc<dyn TableStore>,
    random: Arc<dyn RandomSource>,
    notifier: Arc<dyn Notifier>,
}

impl TableEngine {
    /// Engine with thread randomness and log-only notifications
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self {
            store,
            random: Arc::new(ThreadRandom),
            notifier: Arc::new(LogNotifier),
        }
    }

    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    pub(crate) fn random(&self) -> &dyn RandomSource {
        self.random.as_ref()
    }

    /// Create an open table with the kind's initial prize fund
    ///
    /// # Errors
    ///
    /// `InvalidEntryFee` if the fee is not offered for `kind`,
    /// `DuplicateOpenTable` if an open table with the same kind and fee exists.
    pub async fn create_table(
        &self,
        kind: TableKind,
        entry_fee: Amount,
    ) -> EngineResult<TableSnapshot> {
        if !kind.accepts_fee(entry_fee) {
            return Err(EngineError::InvalidEntryFee { kind, entry_fee });
        }

        let mut tx = self.store.begin().await?;
        tx.lock_pool(kind, entry_fee).await?;
        if tx.open_table_exists(kind, entry_fee).await? {
            return Err(EngineError::DuplicateOpenTable { kind, entry_fee });
        }

        let table = tx
            .insert_table(NewTable {
                kind,
                entry_fee,
                prize_fund: kind.initial_prize_fund(entry_fee),
                invite_token: self.random.token(),
            })
            .await?;
        tx.commit().await?;

        log::info!(
            "Created {kind} table {} (fee {entry_fee}, fund {})",
            table.id,
            table.prize_fund
        );

        Ok(TableSnapshot {
            table,
            seats: Vec::new(),
            prizes: Vec::new(),
        })
    }

    /// Create an open table for every kind and fee that has none
    pub async fn ensure_pool(&self) -> EngineResult<Vec<Table>> {
        let mut created = Vec::new();
        for kind in TableKind::ALL {
            for fee in kind.allowed_entry_fees() {
                match self.create_table(kind, *fee).await {
                    Ok(snapshot) => created.push(snapshot.table),
                    Err(EngineError::DuplicateOpenTable { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(created)
    }

    /// Claim a seat for `player_id` and pay the entry fee
    ///
    /// Preconditions are checked in this order: player exists, table is
    /// open, a seat is free, the player is not already seated, the balance
    /// covers the fee. Any failure leaves every balance, seat and fund as it
    /// was. Filling the last seat finishes the table in the same transaction.
    pub async fn join_table(
        &self,
        table_id: TableId,
        player_id: PlayerId,
    ) -> EngineResult<JoinOutcome> {
        let mut tx = self.store.begin().await?;

        if tx.find_player(player_id).await?.is_none() {
            return Err(EngineError::PlayerNotFound(player_id));
        }

        let table = match tx.lock_table(table_id).await? {
            Some(table) if table.status == TableStatus::Open => table,
            other => {
                return Err(EngineError::TableUnavailable {
                    table_id,
                    status: other.map(|t| t.status),
                });
            }
        };

        let seats = tx.seats(table_id).await?;
        let max_seats = table.kind.max_seats();
        if seats.len() >= max_seats {
            return Err(EngineError::TableFull {
                table_id,
                max_seats,
            });
        }
        if seats.iter().any(|s| s.player_id == player_id) {
            return Err(EngineError::DuplicateSeat {
                table_id,
                player_id,
            });
        }

        let first_entry = tx.count_player_seats(player_id).await? == 0;
        let balance = match tx.debit(player_id, table.entry_fee).await? {
            Debit::Applied(balance) => balance,
            Debit::Insufficient(available) => {
                return Err(EngineError::InsufficientFunds {
                    available,
                    required: table.entry_fee,
                });
            }
        };

        let seat = tx
            .insert_seat(table_id, player_id, Utc::now(), first_entry)
            .await?;
        tx.add_to_prize_fund(table_id, table.entry_fee).await?;

        let transition =
            resolve_capacity(&mut *tx, &table, seats.len() + 1, self.random()).await?;
        let snapshot = read_snapshot(&mut *tx, table_id).await?;
        tx.commit().await?;

        log::info!(
            "Player {player_id} joined table {table_id} ({}/{max_seats})",
            snapshot.seat_count()
        );
        self.after_commit(&transition).await;

        Ok(JoinOutcome {
            seat,
            balance,
            snapshot,
            transition,
        })
    }

    /// Split a linear table now, regardless of how many seats are taken
    pub async fn split_table(&self, table_id: TableId) -> EngineResult<SplitOutcome> {
        let mut tx = self.store.begin().await?;
        let outcome = settlement::split_linear(&mut *tx, table_id, self.random()).await?;
        tx.commit().await?;

        self.after_split(&outcome).await;
        Ok(outcome)
    }

    /// Settle a full random table
    pub async fn settle_table(&self, table_id: TableId) -> EngineResult<SettleOutcome> {
        let mut tx = self.store.begin().await?;
        let outcome = settlement::settle_random(&mut *tx, table_id, self.random()).await?;
        tx.commit().await?;

        self.after_settle(&outcome).await;
        Ok(outcome)
    }

    pub async fn get_table_snapshot(&self, table_id: TableId) -> EngineResult<TableSnapshot> {
        self.store
            .snapshot(table_id)
            .await?
            .ok_or(EngineError::NotFound(table_id))
    }

    pub async fn list_tables(&self, filter: TableFilter) -> EngineResult<Vec<Table>> {
        Ok(self.store.list_tables(filter).await?)
    }

    /// Resolve an invite token to a table that still accepts seats
    pub async fn table_by_invite(&self, token: &str) -> EngineResult<TableSnapshot> {
        let snapshot = self
            .store
            .find_by_invite(token)
            .await?
            .ok_or_else(|| EngineError::InviteNotFound(token.to_string()))?;

        if snapshot.table.status != TableStatus::Open {
            return Err(EngineError::TableUnavailable {
                table_id: snapshot.table.id,
                status: Some(snapshot.table.status),
            });
        }
        Ok(snapshot)
    }

    pub async fn player(&self, player_id: PlayerId) -> EngineResult<Player> {
        self.store
            .player(player_id)
            .await?
            .ok_or(EngineError::PlayerNotFound(player_id))
    }

    /// Top up a player's balance
    ///
    /// # Errors
    ///
    /// `InvalidCredit` unless `amount` is positive.
    pub async fn credit(&self, player_id: PlayerId, amount: Amount) -> EngineResult<Amount> {
        if amount <= Amount::ZERO {
            return Err(EngineError::InvalidCredit(amount));
        }
        if self.store.player(player_id).await?.is_none() {
            return Err(EngineError::PlayerNotFound(player_id));
        }
        Ok(self.store.credit(player_id, amount).await?)
    }

    /// Bump counters and notify players once a transition is committed
    ///
    /// Counter failures are logged; the committed transition stands.
    pub(crate) async fn after_commit(&self, transition: &Transition) {
        match transition {
            Transition::Open => {}
            Transition::Split(outcome) => self.after_split(outcome).await,
            Transition::Settled(outcome) => self.after_settle(outcome).await,
        }
    }

    async fn after_split(&self, outcome: &SplitOutcome) {
        self.bump_counters(&outcome.participants, Some(outcome.winner))
            .await;
        notify::dispatch(self.notifier.clone(), split_messages(outcome));
    }

    async fn after_settle(&self, outcome: &SettleOutcome) {
        let winner = outcome
            .prizes
            .iter()
            .find(|p| p.position == 1)
            .and_then(|p| p.player_id);
        self.bump_counters(&outcome.participants, winner).await;
        notify::dispatch(self.notifier.clone(), settle_messages(outcome));
    }

    async fn bump_counters(&self, participants: &[PlayerId], winner: Option<PlayerId>) {
        if let Err(e) = self.store.increment_games_played(participants).await {
            log::warn!("Failed to update games played for {participants:?}: {e}");
        }
        if let Some(winner) = winner {
            if let Err(e) = self.store.increment_wins(winner).await {
                log::warn!("Failed to update wins for player {winner}: {e}");
            }
        }
    }
}

/// Read a table with its seats and prizes inside a transaction
pub(crate) async fn read_snapshot(
    tx: &mut dyn StoreTx,
    table_id: TableId,
) -> EngineResult<TableSnapshot> {
    let table = tx
        .lock_table(table_id)
        .await?
        .ok_or(EngineError::NotFound(table_id))?;
    let seats = tx.seats(table_id).await?;
    let prizes = tx.prizes(table_id).await?;
    Ok(TableSnapshot {
        table,
        seats,
        prizes,
    })
}

fn split_messages(outcome: &SplitOutcome) -> Vec<(PlayerId, String)> {
    let mut messages = vec![(
        outcome.winner,
        format!(
            "You won {} on table #{}",
            outcome.prize.amount, outcome.table_id
        ),
    )];
    messages.extend(outcome.placements.iter().map(|(player_id, child)| {
        (
            *player_id,
            format!(
                "Table #{} is finished. You continue on table #{child}",
                outcome.table_id
            ),
        )
    }));
    messages
}

fn settle_messages(outcome: &SettleOutcome) -> Vec<(PlayerId, String)> {
    outcome
        .prizes
        .iter()
        .filter_map(|prize| {
            prize.player_id.map(|player_id| {
                (
                    player_id,
                    format!(
                        "You took place {} on table #{} and won {}",
                        prize.position, outcome.table_id, prize.amount
                    ),
                )
            })
        })
        .collect()
}
