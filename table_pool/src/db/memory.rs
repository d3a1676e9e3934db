//! In-process [`TableStore`] for tests and database-less runs.

use super::store::{Debit, StoreError, StoreResult, StoreTx, TableStore};
use crate::models::{
    Amount, NewTable, Player, PlayerId, Prize, Seat, Table, TableFilter, TableId, TableKind,
    TableSnapshot, TableStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct State {
    tables: BTreeMap<TableId, Table>,
    seats: Vec<Seat>,
    prizes: Vec<Prize>,
    players: BTreeMap<PlayerId, Player>,
    next_table_id: TableId,
    next_seat_id: i64,
    next_prize_id: i64,
    next_player_id: PlayerId,
}

impl State {
    fn seats_of(&self, table_id: TableId) -> Vec<Seat> {
        let mut seats: Vec<Seat> = self
            .seats
            .iter()
            .filter(|s| s.table_id == table_id)
            .cloned()
            .collect();
        seats.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.id.cmp(&b.id)));
        seats
    }

    fn prizes_of(&self, table_id: TableId) -> Vec<Prize> {
        let mut prizes: Vec<Prize> = self
            .prizes
            .iter()
            .filter(|p| p.table_id == table_id)
            .cloned()
            .collect();
        prizes.sort_by_key(|p| p.position);
        prizes
    }

    fn snapshot(&self, table: &Table) -> TableSnapshot {
        TableSnapshot {
            table: table.clone(),
            seats: self.seats_of(table.id),
            prizes: self.prizes_of(table.id),
        }
    }

    fn table_mut(&mut self, table_id: TableId) -> StoreResult<&mut Table> {
        self.tables
            .get_mut(&table_id)
            .ok_or_else(|| StoreError::Missing(format!("table {table_id}")))
    }

    fn player_mut(&mut self, player_id: PlayerId) -> StoreResult<&mut Player> {
        self.players
            .get_mut(&player_id)
            .ok_or_else(|| StoreError::Missing(format!("player {player_id}")))
    }
}

/// Table store kept in memory
///
/// A transaction takes the store mutex for its whole lifetime and works on a
/// private copy of the state, which replaces the shared state on commit. All
/// transactions are therefore serialized, a stronger guarantee than the
/// per-row locking of [`super::PgTableStore`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a player with a starting balance and return its id
    pub async fn add_player(&self, balance: Amount) -> PlayerId {
        let mut state = self.state.lock().await;
        state.next_player_id += 1;
        let id = state.next_player_id;
        state.players.insert(
            id,
            Player {
                id,
                balance,
                games_played: 0,
                wins: 0,
            },
        );
        id
    }

    /// Overwrite a table's `updated_at`, e.g. to age it past the sweeper threshold
    pub async fn set_updated_at(&self, table_id: TableId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.table_mut(table_id)?.updated_at = at;
        Ok(())
    }

    /// Every seat currently held by a player
    pub async fn seats_of_player(&self, player_id: PlayerId) -> Vec<Seat> {
        let state = self.state.lock().await;
        state
            .seats
            .iter()
            .filter(|s| s.player_id == player_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }

    async fn snapshot(&self, table_id: TableId) -> StoreResult<Option<TableSnapshot>> {
        let state = self.state.lock().await;
        Ok(state.tables.get(&table_id).map(|t| state.snapshot(t)))
    }

    async fn find_by_invite(&self, token: &str) -> StoreResult<Option<TableSnapshot>> {
        let state = self.state.lock().await;
        Ok(state
            .tables
            .values()
            .find(|t| t.invite_token == token)
            .map(|t| state.snapshot(t)))
    }

    async fn list_tables(&self, filter: TableFilter) -> StoreResult<Vec<Table>> {
        let state = self.state.lock().await;
        let mut tables: Vec<Table> = state
            .tables
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tables.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tables)
    }

    async fn stale_open_tables(
        &self,
        kind: TableKind,
        older_than: DateTime<Utc>,
    ) -> StoreResult<Vec<TableSnapshot>> {
        let state = self.state.lock().await;
        Ok(state
            .tables
            .values()
            .filter(|t| t.kind == kind && t.status == TableStatus::Open && t.updated_at < older_than)
            .map(|t| state.snapshot(t))
            .collect())
    }

    async fn player(&self, player_id: PlayerId) -> StoreResult<Option<Player>> {
        let state = self.state.lock().await;
        Ok(state.players.get(&player_id).cloned())
    }

    async fn credit(&self, player_id: PlayerId, amount: Amount) -> StoreResult<Amount> {
        let mut state = self.state.lock().await;
        let player = state.player_mut(player_id)?;
        player.balance = player
            .balance
            .checked_add(amount)
            .ok_or_else(|| StoreError::Conflict(format!("balance overflow for player {player_id}")))?;
        Ok(player.balance)
    }

    async fn increment_games_played(&self, player_ids: &[PlayerId]) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        for id in player_ids {
            if let Some(player) = state.players.get_mut(id) {
                player.games_played += 1;
            }
        }
        Ok(())
    }

    async fn increment_wins(&self, player_id: PlayerId) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(player) = state.players.get_mut(&player_id) {
            player.wins += 1;
        }
        Ok(())
    }
}

/// Serialized unit of work over a copy of the state
struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    work: State,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_table(&mut self, table_id: TableId) -> StoreResult<Option<Table>> {
        Ok(self.work.tables.get(&table_id).cloned())
    }

    async fn find_player(&mut self, player_id: PlayerId) -> StoreResult<Option<Player>> {
        Ok(self.work.players.get(&player_id).cloned())
    }

    async fn seats(&mut self, table_id: TableId) -> StoreResult<Vec<Seat>> {
        Ok(self.work.seats_of(table_id))
    }

    async fn prizes(&mut self, table_id: TableId) -> StoreResult<Vec<Prize>> {
        Ok(self.work.prizes_of(table_id))
    }

    async fn count_player_seats(&mut self, player_id: PlayerId) -> StoreResult<i64> {
        Ok(self
            .work
            .seats
            .iter()
            .filter(|s| s.player_id == player_id)
            .count() as i64)
    }

    async fn debit(&mut self, player_id: PlayerId, amount: Amount) -> StoreResult<Debit> {
        let player = self.work.player_mut(player_id)?;
        if player.balance < amount {
            return Ok(Debit::Insufficient(player.balance));
        }
        player.balance = player
            .balance
            .checked_sub(amount)
            .ok_or_else(|| StoreError::Conflict(format!("balance underflow for player {player_id}")))?;
        Ok(Debit::Applied(player.balance))
    }

    async fn insert_seat(
        &mut self,
        table_id: TableId,
        player_id: PlayerId,
        joined_at: DateTime<Utc>,
        is_first_entry: bool,
    ) -> StoreResult<Seat> {
        if !self.work.tables.contains_key(&table_id) {
            return Err(StoreError::Missing(format!("table {table_id}")));
        }
        if !self.work.players.contains_key(&player_id) {
            return Err(StoreError::Missing(format!("player {player_id}")));
        }
        if self
            .work
            .seats
            .iter()
            .any(|s| s.table_id == table_id && s.player_id == player_id)
        {
            return Err(StoreError::Conflict(format!(
                "player {player_id} already seated at table {table_id}"
            )));
        }

        self.work.next_seat_id += 1;
        let seat = Seat {
            id: self.work.next_seat_id,
            table_id,
            player_id,
            joined_at,
            is_first_entry,
        };
        self.work.seats.push(seat.clone());
        Ok(seat)
    }

    async fn add_to_prize_fund(&mut self, table_id: TableId, amount: Amount) -> StoreResult<Amount> {
        let table = self.work.table_mut(table_id)?;
        table.prize_fund = table
            .prize_fund
            .checked_add(amount)
            .ok_or_else(|| StoreError::Conflict(format!("prize fund overflow on table {table_id}")))?;
        table.updated_at = Utc::now();
        Ok(table.prize_fund)
    }

    async fn insert_table(&mut self, table: NewTable) -> StoreResult<Table> {
        if self
            .work
            .tables
            .values()
            .any(|t| t.invite_token == table.invite_token)
        {
            return Err(StoreError::Conflict(format!(
                "invite token {} already in use",
                table.invite_token
            )));
        }

        self.work.next_table_id += 1;
        let now = Utc::now();
        let table = Table {
            id: self.work.next_table_id,
            kind: table.kind,
            entry_fee: table.entry_fee,
            prize_fund: table.prize_fund,
            status: TableStatus::Open,
            invite_token: table.invite_token,
            created_at: now,
            updated_at: now,
        };
        self.work.tables.insert(table.id, table.clone());
        Ok(table)
    }

    async fn set_status(&mut self, table_id: TableId, status: TableStatus) -> StoreResult<()> {
        let table = self.work.table_mut(table_id)?;
        table.status = status;
        table.updated_at = Utc::now();
        Ok(())
    }

    async fn touch(&mut self, table_id: TableId) -> StoreResult<()> {
        self.work.table_mut(table_id)?.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_prize(
        &mut self,
        table_id: TableId,
        player_id: Option<PlayerId>,
        position: u32,
        amount: Amount,
    ) -> StoreResult<Prize> {
        if self
            .work
            .prizes
            .iter()
            .any(|p| p.table_id == table_id && p.position == position)
        {
            return Err(StoreError::Conflict(format!(
                "position {position} already paid on table {table_id}"
            )));
        }

        self.work.next_prize_id += 1;
        let prize = Prize {
            id: self.work.next_prize_id,
            table_id,
            player_id,
            position,
            amount,
            created_at: Utc::now(),
        };
        self.work.prizes.push(prize.clone());
        Ok(prize)
    }

    async fn move_seats(&mut self, from: TableId, to: TableId) -> StoreResult<u64> {
        let target_players: Vec<PlayerId> = self
            .work
            .seats
            .iter()
            .filter(|s| s.table_id == to)
            .map(|s| s.player_id)
            .collect();
        if self
            .work
            .seats
            .iter()
            .any(|s| s.table_id == from && target_players.contains(&s.player_id))
        {
            return Err(StoreError::Conflict(format!(
                "tables {from} and {to} share a player"
            )));
        }

        let mut moved = 0;
        for seat in self.work.seats.iter_mut().filter(|s| s.table_id == from) {
            seat.table_id = to;
            moved += 1;
        }
        Ok(moved)
    }

    async fn lock_pool(&mut self, _kind: TableKind, _entry_fee: Amount) -> StoreResult<()> {
        // The store-wide guard already serializes every transaction
        Ok(())
    }

    async fn open_table_exists(
        &mut self,
        kind: TableKind,
        entry_fee: Amount,
    ) -> StoreResult<bool> {
        Ok(self
            .work
            .tables
            .values()
            .any(|t| t.kind == kind && t.entry_fee == entry_fee && t.status == TableStatus::Open))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}
