//! Split and random settlement.
//!
//! Both run inside the caller's transaction and re-check the table they act
//! on, so a table that is already terminal is rejected instead of paid twice.

use super::random::{RandomSource, shuffled};
use crate::db::StoreTx;
use crate::errors::{EngineError, EngineResult};
use crate::models::{
    Amount, NewTable, PlayerId, Prize, RANDOM_PAYOUT_PERCENTS, Table, TableId, TableKind,
    TableStatus,
};
use chrono::Utc;

/// Result of splitting a linear table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutcome {
    pub table_id: TableId,
    /// Earliest joiner
    pub winner: PlayerId,
    pub prize: Prize,
    /// The two continuation tables
    pub children: Vec<Table>,
    /// Every player seated at the parent, winner first
    pub participants: Vec<PlayerId>,
    /// Where each non-winner continues
    pub placements: Vec<(PlayerId, TableId)>,
}

/// Result of settling a random table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleOutcome {
    pub table_id: TableId,
    /// Position 1..=3
    pub prizes: Vec<Prize>,
    pub replacement: Table,
    pub participants: Vec<PlayerId>,
}

/// 50/30/20 split of a prize fund, each share floored.
///
/// Rounding leftovers stay with the house, so the shares never sum past
/// `fund`.
pub fn prize_split(fund: Amount) -> [Amount; 3] {
    RANDOM_PAYOUT_PERCENTS.map(|pct| fund.percent(pct))
}

/// Cut `items` in two; the first half gets the extra element.
pub fn bisect<T>(mut items: Vec<T>) -> (Vec<T>, Vec<T>) {
    let second = items.split_off(items.len().div_ceil(2));
    (items, second)
}

async fn lock_open(tx: &mut dyn StoreTx, table_id: TableId) -> EngineResult<Table> {
    let table = tx
        .lock_table(table_id)
        .await?
        .ok_or(EngineError::NotFound(table_id))?;

    if table.status != TableStatus::Open {
        return Err(EngineError::TableUnavailable {
            table_id,
            status: Some(table.status),
        });
    }
    Ok(table)
}

/// Pay the earliest joiner the whole fund and move everyone else onto two
/// fresh tables.
pub async fn split_linear(
    tx: &mut dyn StoreTx,
    table_id: TableId,
    random: &dyn RandomSource,
) -> EngineResult<SplitOutcome> {
    let table = lock_open(tx, table_id).await?;
    if table.kind != TableKind::Linear {
        return Err(EngineError::TableUnavailable {
            table_id,
            status: Some(table.status),
        });
    }

    let seats = tx.seats(table_id).await?;
    if seats.len() < 2 {
        return Err(EngineError::InsufficientPlayers {
            table_id,
            needed: 2,
            current: seats.len(),
        });
    }

    let participants: Vec<PlayerId> = seats.iter().map(|s| s.player_id).collect();
    let winner = participants[0];
    let (first, second) = bisect(shuffled(random, &participants[1..]));

    let now = Utc::now();
    let mut children = Vec::with_capacity(2);
    let mut placements = Vec::with_capacity(participants.len() - 1);
    for group in [first, second] {
        let child = tx
            .insert_table(NewTable {
                kind: table.kind,
                entry_fee: table.entry_fee,
                prize_fund: table.prize_fund,
                invite_token: random.token(),
            })
            .await?;
        for player_id in group {
            tx.insert_seat(child.id, player_id, now, false).await?;
            placements.push((player_id, child.id));
        }
        children.push(child);
    }

    let prize = tx
        .insert_prize(table_id, Some(winner), 1, table.prize_fund)
        .await?;
    tx.set_status(table_id, TableStatus::Finished).await?;

    log::info!(
        "Split table {table_id}: player {winner} won {}, continuing on {} and {}",
        table.prize_fund,
        children[0].id,
        children[1].id
    );

    Ok(SplitOutcome {
        table_id,
        winner,
        prize,
        children,
        participants,
        placements,
    })
}

/// Draw three winners from a full random table and open a replacement.
pub async fn settle_random(
    tx: &mut dyn StoreTx,
    table_id: TableId,
    random: &dyn RandomSource,
) -> EngineResult<SettleOutcome> {
    let table = lock_open(tx, table_id).await?;
    if table.kind != TableKind::Random {
        return Err(EngineError::TableUnavailable {
            table_id,
            status: Some(table.status),
        });
    }

    let seats = tx.seats(table_id).await?;
    let needed = table.kind.max_seats();
    if seats.len() != needed {
        return Err(EngineError::InsufficientPlayers {
            table_id,
            needed,
            current: seats.len(),
        });
    }

    let participants: Vec<PlayerId> = seats.iter().map(|s| s.player_id).collect();
    let drawn = shuffled(random, &participants);

    let mut prizes = Vec::with_capacity(RANDOM_PAYOUT_PERCENTS.len());
    for (position, (player_id, amount)) in
        (1u32..).zip(drawn.iter().zip(prize_split(table.prize_fund)))
    {
        prizes.push(
            tx.insert_prize(table_id, Some(*player_id), position, amount)
                .await?,
        );
    }
    tx.set_status(table_id, TableStatus::Finished).await?;

    let replacement = tx
        .insert_table(NewTable {
            kind: table.kind,
            entry_fee: table.entry_fee,
            prize_fund: table.kind.initial_prize_fund(table.entry_fee),
            invite_token: random.token(),
        })
        .await?;

    log::info!(
        "Settled table {table_id}: fund {} paid to {:?}, replacement table {}",
        table.prize_fund,
        &drawn[..prizes.len()],
        replacement.id
    );

    Ok(SettleOutcome {
        table_id,
        prizes,
        replacement,
        participants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, TableStore};
    use crate::engine::random::SeededRandom;
    use proptest::prelude::*;

    async fn seeded_table(
        store: &MemoryStore,
        kind: TableKind,
        players: usize,
    ) -> (TableId, Vec<PlayerId>) {
        let mut ids = Vec::new();
        for _ in 0..players {
            ids.push(store.add_player(Amount::from_major(100)).await);
        }

        let mut tx = store.begin().await.unwrap();
        let fee = Amount::from_major(5);
        let table = tx
            .insert_table(NewTable {
                kind,
                entry_fee: fee,
                prize_fund: kind.initial_prize_fund(fee),
                invite_token: format!("seed-{kind}"),
            })
            .await
            .unwrap();
        for (i, player_id) in ids.iter().enumerate() {
            let at = Utc::now() + chrono::TimeDelta::milliseconds(i as i64);
            tx.insert_seat(table.id, *player_id, at, true).await.unwrap();
        }
        tx.commit().await.unwrap();
        (table.id, ids)
    }

    #[test]
    fn test_prize_split_floors_each_share() {
        let shares = prize_split(Amount::from_minor(2161));
        assert_eq!(
            shares,
            [
                Amount::from_minor(1080),
                Amount::from_minor(648),
                Amount::from_minor(432)
            ]
        );
    }

    #[test]
    fn test_bisect_puts_extra_in_first_half() {
        assert_eq!(bisect(vec![1, 2, 3]), (vec![1, 2], vec![3]));
        assert_eq!(bisect(vec![1, 2]), (vec![1], vec![2]));
        assert_eq!(bisect(vec![1]), (vec![1], vec![]));
    }

    #[tokio::test]
    async fn test_split_linear_moves_everyone_but_the_winner() {
        let store = MemoryStore::new();
        let (table_id, players) = seeded_table(&store, TableKind::Linear, 15).await;

        let mut tx = store.begin().await.unwrap();
        let outcome = split_linear(&mut *tx, table_id, &SeededRandom::new(3))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(outcome.winner, players[0]);
        assert_eq!(outcome.prize.amount, Amount::from_major(45));
        assert_eq!(outcome.children.len(), 2);
        assert_eq!(outcome.placements.len(), 14);

        let first = store.snapshot(outcome.children[0].id).await.unwrap().unwrap();
        let second = store.snapshot(outcome.children[1].id).await.unwrap().unwrap();
        assert_eq!((first.seat_count(), second.seat_count()), (7, 7));
        assert!(first.seats.iter().all(|s| !s.is_first_entry));
        assert_eq!(first.table.prize_fund, Amount::from_major(45));
        assert!(!first.has_player(players[0]) && !second.has_player(players[0]));

        let parent = store.snapshot(table_id).await.unwrap().unwrap();
        assert_eq!(parent.table.status, TableStatus::Finished);
        assert_eq!(parent.prizes.len(), 1);
    }

    #[tokio::test]
    async fn test_split_rejects_a_single_seat() {
        let store = MemoryStore::new();
        let (table_id, _) = seeded_table(&store, TableKind::Linear, 1).await;

        let mut tx = store.begin().await.unwrap();
        let err = split_linear(&mut *tx, table_id, &SeededRandom::new(3))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientPlayers { needed: 2, current: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_settle_random_pays_three_distinct_players() {
        let store = MemoryStore::new();
        let (table_id, players) = seeded_table(&store, TableKind::Random, 12).await;

        let mut tx = store.begin().await.unwrap();
        let outcome = settle_random(&mut *tx, table_id, &SeededRandom::new(9))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let fund = TableKind::Random.initial_prize_fund(Amount::from_major(5));
        let total = outcome
            .prizes
            .iter()
            .try_fold(Amount::ZERO, |acc, p| acc.checked_add(p.amount))
            .unwrap();
        assert!(total <= fund);
        assert_eq!(
            outcome.prizes.iter().map(|p| p.position).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let mut winners: Vec<_> = outcome.prizes.iter().filter_map(|p| p.player_id).collect();
        assert!(winners.iter().all(|w| players.contains(w)));
        winners.sort_unstable();
        winners.dedup();
        assert_eq!(winners.len(), 3);

        assert_eq!(outcome.replacement.status, TableStatus::Open);
        assert_eq!(outcome.replacement.prize_fund, fund);
    }

    #[tokio::test]
    async fn test_settling_twice_is_rejected() {
        let store = MemoryStore::new();
        let (table_id, _) = seeded_table(&store, TableKind::Random, 12).await;
        let random = SeededRandom::new(1);

        let mut tx = store.begin().await.unwrap();
        settle_random(&mut *tx, table_id, &random).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = settle_random(&mut *tx, table_id, &random)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::TableUnavailable {
                status: Some(TableStatus::Finished),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_settle_random_needs_a_full_table() {
        let store = MemoryStore::new();
        let (table_id, _) = seeded_table(&store, TableKind::Random, 11).await;

        let mut tx = store.begin().await.unwrap();
        let err = settle_random(&mut *tx, table_id, &SeededRandom::new(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientPlayers { needed: 12, current: 11, .. }
        ));
    }

    proptest! {
        #[test]
        fn prop_prize_split_never_exceeds_fund(minor in 0i64..1_000_000_000) {
            let fund = Amount::from_minor(minor);
            let shares = prize_split(fund);
            let total: i64 = shares.iter().map(|a| a.minor()).sum();
            prop_assert!(total <= minor);
            prop_assert!(minor - total < 3);
            prop_assert!(shares[0] >= shares[1] && shares[1] >= shares[2]);
        }

        #[test]
        fn prop_bisect_keeps_every_item(len in 0usize..40) {
            let items: Vec<usize> = (0..len).collect();
            let (a, b) = bisect(items.clone());
            prop_assert_eq!(a.len(), len.div_ceil(2));
            prop_assert!(a.len() >= b.len() && a.len() - b.len() <= 1);
            let joined: Vec<usize> = a.into_iter().chain(b).collect();
            prop_assert_eq!(joined, items);
        }
    }
}
