//! PostgreSQL implementation of [`TableStore`].
#![allow(clippy::needless_raw_string_hashes)]

use super::{
    store::{Debit, StoreError, StoreResult, StoreTx, TableStore},
    timeouts::{SCAN_TIMEOUT, TRANSACTION_TIMEOUT, query, with_timeout},
};
use crate::models::{
    Amount, NewTable, Player, PlayerId, Prize, Seat, Table, TableFilter, TableId, TableKind,
    TableSnapshot, TableStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use std::{collections::HashMap, sync::Arc};

/// Table store backed by PostgreSQL
///
/// Seat claims lock the table row with `SELECT ... FOR UPDATE`, so joins
/// against one table are linearized while different tables proceed in
/// parallel. Balance debits are a single conditional `UPDATE`, which
/// serializes concurrent spends of the same player.
#[derive(Clone)]
pub struct PgTableStore {
    pool: Arc<PgPool>,
}

impl PgTableStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    async fn load_children(&self, table: Table) -> StoreResult<TableSnapshot> {
        let seats = query(
            sqlx::query(
                r#"
                SELECT id, table_id, player_id, joined_at, is_first_entry
                FROM seats
                WHERE table_id = $1
                ORDER BY joined_at, id
                "#,
            )
            .bind(table.id)
            .fetch_all(self.pool.as_ref()),
        )
        .await?
        .iter()
        .map(seat_from_row)
        .collect::<StoreResult<Vec<_>>>()?;

        let prizes = query(
            sqlx::query(
                r#"
                SELECT id, table_id, player_id, position, amount, created_at
                FROM prizes
                WHERE table_id = $1
                ORDER BY position
                "#,
            )
            .bind(table.id)
            .fetch_all(self.pool.as_ref()),
        )
        .await?
        .iter()
        .map(prize_from_row)
        .collect::<StoreResult<Vec<_>>>()?;

        Ok(TableSnapshot {
            table,
            seats,
            prizes,
        })
    }
}

#[async_trait]
impl TableStore for PgTableStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = with_timeout(TRANSACTION_TIMEOUT, self.pool.begin()).await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn snapshot(&self, table_id: TableId) -> StoreResult<Option<TableSnapshot>> {
        let row = query(
            sqlx::query(
                r#"
                SELECT id, kind, entry_fee, prize_fund, status, invite_token, created_at, updated_at
                FROM tables
                WHERE id = $1
                "#,
            )
            .bind(table_id)
            .fetch_optional(self.pool.as_ref()),
        )
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_children(table_from_row(&row)?).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_invite(&self, token: &str) -> StoreResult<Option<TableSnapshot>> {
        let row = query(
            sqlx::query(
                r#"
                SELECT id, kind, entry_fee, prize_fund, status, invite_token, created_at, updated_at
                FROM tables
                WHERE invite_token = $1
                "#,
            )
            .bind(token)
            .fetch_optional(self.pool.as_ref()),
        )
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_children(table_from_row(&row)?).await?)),
            None => Ok(None),
        }
    }

    async fn list_tables(&self, filter: TableFilter) -> StoreResult<Vec<Table>> {
        let rows = with_timeout(
            SCAN_TIMEOUT,
            sqlx::query(
                r#"
                SELECT id, kind, entry_fee, prize_fund, status, invite_token, created_at, updated_at
                FROM tables
                WHERE ($1::TEXT IS NULL OR kind = $1)
                  AND ($2::TEXT IS NULL OR status = $2)
                ORDER BY created_at DESC, id DESC
                "#,
            )
            .bind(filter.kind.map(TableKind::as_str))
            .bind(filter.status.map(TableStatus::as_str))
            .fetch_all(self.pool.as_ref()),
        )
        .await?;

        rows.iter().map(table_from_row).collect()
    }

    async fn stale_open_tables(
        &self,
        kind: TableKind,
        older_than: DateTime<Utc>,
    ) -> StoreResult<Vec<TableSnapshot>> {
        let tables = with_timeout(
            SCAN_TIMEOUT,
            sqlx::query(
                r#"
                SELECT id, kind, entry_fee, prize_fund, status, invite_token, created_at, updated_at
                FROM tables
                WHERE kind = $1 AND status = 'open' AND updated_at < $2
                ORDER BY id
                "#,
            )
            .bind(kind.as_str())
            .bind(older_than.naive_utc())
            .fetch_all(self.pool.as_ref()),
        )
        .await?
        .iter()
        .map(table_from_row)
        .collect::<StoreResult<Vec<_>>>()?;

        if tables.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<TableId> = tables.iter().map(|t| t.id).collect();
        let seat_rows = with_timeout(
            SCAN_TIMEOUT,
            sqlx::query(
                r#"
                SELECT id, table_id, player_id, joined_at, is_first_entry
                FROM seats
                WHERE table_id = ANY($1)
                ORDER BY joined_at, id
                "#,
            )
            .bind(&ids)
            .fetch_all(self.pool.as_ref()),
        )
        .await?;

        let mut seats_by_table: HashMap<TableId, Vec<Seat>> = HashMap::new();
        for row in &seat_rows {
            let seat = seat_from_row(row)?;
            seats_by_table.entry(seat.table_id).or_default().push(seat);
        }

        Ok(tables
            .into_iter()
            .map(|table| TableSnapshot {
                seats: seats_by_table.remove(&table.id).unwrap_or_default(),
                prizes: Vec::new(),
                table,
            })
            .collect())
    }

    async fn player(&self, player_id: PlayerId) -> StoreResult<Option<Player>> {
        let row = query(
            sqlx::query("SELECT id, balance, games_played, wins FROM players WHERE id = $1")
                .bind(player_id)
                .fetch_optional(self.pool.as_ref()),
        )
        .await?;

        row.as_ref().map(player_from_row).transpose()
    }

    async fn credit(&self, player_id: PlayerId, amount: Amount) -> StoreResult<Amount> {
        let row = query(
            sqlx::query(
                "UPDATE players SET balance = balance + $1 WHERE id = $2 RETURNING balance",
            )
            .bind(amount.minor())
            .bind(player_id)
            .fetch_optional(self.pool.as_ref()),
        )
        .await?
        .ok_or_else(|| StoreError::Missing(format!("player {player_id}")))?;

        Ok(Amount::from_minor(row.try_get("balance")?))
    }

    async fn increment_games_played(&self, player_ids: &[PlayerId]) -> StoreResult<()> {
        query(
            sqlx::query("UPDATE players SET games_played = games_played + 1 WHERE id = ANY($1)")
                .bind(player_ids)
                .execute(self.pool.as_ref()),
        )
        .await?;
        Ok(())
    }

    async fn increment_wins(&self, player_id: PlayerId) -> StoreResult<()> {
        query(
            sqlx::query("UPDATE players SET wins = wins + 1 WHERE id = $1")
                .bind(player_id)
                .execute(self.pool.as_ref()),
        )
        .await?;
        Ok(())
    }
}

/// Open PostgreSQL transaction; rolls back on drop
struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn lock_table(&mut self, table_id: TableId) -> StoreResult<Option<Table>> {
        let row = query(
            sqlx::query(
                r#"
                SELECT id, kind, entry_fee, prize_fund, status, invite_token, created_at, updated_at
                FROM tables
                WHERE id = $1
                FOR UPDATE
                "#,
            )
            .bind(table_id)
            .fetch_optional(&mut *self.tx),
        )
        .await?;

        row.as_ref().map(table_from_row).transpose()
    }

    async fn find_player(&mut self, player_id: PlayerId) -> StoreResult<Option<Player>> {
        let row = query(
            sqlx::query("SELECT id, balance, games_played, wins FROM players WHERE id = $1")
                .bind(player_id)
                .fetch_optional(&mut *self.tx),
        )
        .await?;

        row.as_ref().map(player_from_row).transpose()
    }

    async fn seats(&mut self, table_id: TableId) -> StoreResult<Vec<Seat>> {
        let rows = query(
            sqlx::query(
                r#"
                SELECT id, table_id, player_id, joined_at, is_first_entry
                FROM seats
                WHERE table_id = $1
                ORDER BY joined_at, id
                "#,
            )
            .bind(table_id)
            .fetch_all(&mut *self.tx),
        )
        .await?;

        rows.iter().map(seat_from_row).collect()
    }

    async fn prizes(&mut self, table_id: TableId) -> StoreResult<Vec<Prize>> {
        let rows = query(
            sqlx::query(
                r#"
                SELECT id, table_id, player_id, position, amount, created_at
                FROM prizes
                WHERE table_id = $1
                ORDER BY position
                "#,
            )
            .bind(table_id)
            .fetch_all(&mut *self.tx),
        )
        .await?;

        rows.iter().map(prize_from_row).collect()
    }

    async fn count_player_seats(&mut self, player_id: PlayerId) -> StoreResult<i64> {
        let row = query(
            sqlx::query("SELECT COUNT(*) AS seat_count FROM seats WHERE player_id = $1")
                .bind(player_id)
                .fetch_one(&mut *self.tx),
        )
        .await?;

        Ok(row.try_get("seat_count")?)
    }

    async fn debit(&mut self, player_id: PlayerId, amount: Amount) -> StoreResult<Debit> {
        // Check and decrement in one statement so concurrent spends of the
        // same balance serialize on the player row.
        let updated = query(
            sqlx::query(
                "UPDATE players
                 SET balance = balance - $1
                 WHERE id = $2 AND balance >= $1
                 RETURNING balance",
            )
            .bind(amount.minor())
            .bind(player_id)
            .fetch_optional(&mut *self.tx),
        )
        .await?;

        if let Some(row) = updated {
            return Ok(Debit::Applied(Amount::from_minor(row.try_get("balance")?)));
        }

        let current = query(
            sqlx::query("SELECT balance FROM players WHERE id = $1")
                .bind(player_id)
                .fetch_optional(&mut *self.tx),
        )
        .await?
        .ok_or_else(|| StoreError::Missing(format!("player {player_id}")))?;

        Ok(Debit::Insufficient(Amount::from_minor(
            current.try_get("balance")?,
        )))
    }

    async fn insert_seat(
        &mut self,
        table_id: TableId,
        player_id: PlayerId,
        joined_at: DateTime<Utc>,
        is_first_entry: bool,
    ) -> StoreResult<Seat> {
        let row = query(
            sqlx::query(
                r#"
                INSERT INTO seats (table_id, player_id, joined_at, is_first_entry)
                VALUES ($1, $2, $3, $4)
                RETURNING id, table_id, player_id, joined_at, is_first_entry
                "#,
            )
            .bind(table_id)
            .bind(player_id)
            .bind(joined_at.naive_utc())
            .bind(is_first_entry)
            .fetch_one(&mut *self.tx),
        )
        .await?;

        seat_from_row(&row)
    }

    async fn add_to_prize_fund(&mut self, table_id: TableId, amount: Amount) -> StoreResult<Amount> {
        let row = query(
            sqlx::query(
                r#"
                UPDATE tables
                SET prize_fund = prize_fund + $1, updated_at = (NOW() AT TIME ZONE 'utc')
                WHERE id = $2
                RETURNING prize_fund
                "#,
            )
            .bind(amount.minor())
            .bind(table_id)
            .fetch_optional(&mut *self.tx),
        )
        .await?
        .ok_or_else(|| StoreError::Missing(format!("table {table_id}")))?;

        Ok(Amount::from_minor(row.try_get("prize_fund")?))
    }

    async fn insert_table(&mut self, table: NewTable) -> StoreResult<Table> {
        let row = query(
            sqlx::query(
                r#"
                INSERT INTO tables (kind, entry_fee, prize_fund, status, invite_token)
                VALUES ($1, $2, $3, 'open', $4)
                RETURNING id, kind, entry_fee, prize_fund, status, invite_token, created_at, updated_at
                "#,
            )
            .bind(table.kind.as_str())
            .bind(table.entry_fee.minor())
            .bind(table.prize_fund.minor())
            .bind(&table.invite_token)
            .fetch_one(&mut *self.tx),
        )
        .await?;

        table_from_row(&row)
    }

    async fn set_status(&mut self, table_id: TableId, status: TableStatus) -> StoreResult<()> {
        let result = query(
            sqlx::query(
                "UPDATE tables SET status = $1, updated_at = (NOW() AT TIME ZONE 'utc') WHERE id = $2",
            )
            .bind(status.as_str())
            .bind(table_id)
            .execute(&mut *self.tx),
        )
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("table {table_id}")));
        }
        Ok(())
    }

    async fn touch(&mut self, table_id: TableId) -> StoreResult<()> {
        query(
            sqlx::query("UPDATE tables SET updated_at = (NOW() AT TIME ZONE 'utc') WHERE id = $1")
                .bind(table_id)
                .execute(&mut *self.tx),
        )
        .await?;
        Ok(())
    }

    async fn insert_prize(
        &mut self,
        table_id: TableId,
        player_id: Option<PlayerId>,
        position: u32,
        amount: Amount,
    ) -> StoreResult<Prize> {
        let row = query(
            sqlx::query(
                r#"
                INSERT INTO prizes (table_id, player_id, position, amount)
                VALUES ($1, $2, $3, $4)
                RETURNING id, table_id, player_id, position, amount, created_at
                "#,
            )
            .bind(table_id)
            .bind(player_id)
            .bind(position as i32)
            .bind(amount.minor())
            .fetch_one(&mut *self.tx),
        )
        .await?;

        prize_from_row(&row)
    }

    async fn move_seats(&mut self, from: TableId, to: TableId) -> StoreResult<u64> {
        let result = query(
            sqlx::query("UPDATE seats SET table_id = $1 WHERE table_id = $2")
                .bind(to)
                .bind(from)
                .execute(&mut *self.tx),
        )
        .await?;

        Ok(result.rows_affected())
    }

    async fn lock_pool(&mut self, kind: TableKind, entry_fee: Amount) -> StoreResult<()> {
        query(
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(pool_lock_key(kind, entry_fee))
                .execute(&mut *self.tx),
        )
        .await?;
        Ok(())
    }

    async fn open_table_exists(
        &mut self,
        kind: TableKind,
        entry_fee: Amount,
    ) -> StoreResult<bool> {
        let row = query(
            sqlx::query(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM tables
                    WHERE kind = $1 AND entry_fee = $2 AND status = 'open'
                ) AS present
                "#,
            )
            .bind(kind.as_str())
            .bind(entry_fee.minor())
            .fetch_one(&mut *self.tx),
        )
        .await?;

        Ok(row.try_get("present")?)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let PgTx { tx } = *self;
        with_timeout(TRANSACTION_TIMEOUT, tx.commit()).await
    }
}

/// Advisory lock key for one (kind, fee) pool
fn pool_lock_key(kind: TableKind, entry_fee: Amount) -> i64 {
    let kind_bits: i64 = match kind {
        TableKind::Linear => 1,
        TableKind::Random => 2,
    };
    (kind_bits << 48) | (entry_fee.minor() & 0xFFFF_FFFF_FFFF)
}

fn table_from_row(row: &PgRow) -> StoreResult<Table> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;

    Ok(Table {
        id: row.try_get("id")?,
        kind: kind.parse().map_err(StoreError::Corrupt)?,
        entry_fee: Amount::from_minor(row.try_get("entry_fee")?),
        prize_fund: Amount::from_minor(row.try_get("prize_fund")?),
        status: status.parse().map_err(StoreError::Corrupt)?,
        invite_token: row.try_get("invite_token")?,
        created_at: row.try_get::<NaiveDateTime, _>("created_at")?.and_utc(),
        updated_at: row.try_get::<NaiveDateTime, _>("updated_at")?.and_utc(),
    })
}

fn seat_from_row(row: &PgRow) -> StoreResult<Seat> {
    Ok(Seat {
        id: row.try_get("id")?,
        table_id: row.try_get("table_id")?,
        player_id: row.try_get("player_id")?,
        joined_at: row.try_get::<NaiveDateTime, _>("joined_at")?.and_utc(),
        is_first_entry: row.try_get("is_first_entry")?,
    })
}

fn prize_from_row(row: &PgRow) -> StoreResult<Prize> {
    let position: i32 = row.try_get("position")?;

    Ok(Prize {
        id: row.try_get("id")?,
        table_id: row.try_get("table_id")?,
        player_id: row.try_get("player_id")?,
        position: u32::try_from(position)
            .map_err(|_| StoreError::Corrupt(format!("prize position {position}")))?,
        amount: Amount::from_minor(row.try_get("amount")?),
        created_at: row.try_get::<NaiveDateTime, _>("created_at")?.and_utc(),
    })
}

fn player_from_row(row: &PgRow) -> StoreResult<Player> {
    Ok(Player {
        id: row.try_get("id")?,
        balance: Amount::from_minor(row.try_get("balance")?),
        games_played: row.try_get("games_played")?,
        wins: row.try_get("wins")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_lock_keys_are_distinct() {
        let mut keys = Vec::new();
        for kind in TableKind::ALL {
            for fee in kind.allowed_entry_fees() {
                keys.push(pool_lock_key(kind, *fee));
            }
        }
        let count = keys.len();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), count);
    }
}
