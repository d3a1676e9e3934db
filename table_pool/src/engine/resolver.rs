//! Capacity resolution after a seat is claimed.

use super::random::RandomSource;
use super::settlement::{SettleOutcome, SplitOutcome, settle_random, split_linear};
use crate::db::StoreTx;
use crate::errors::EngineResult;
use crate::models::{Table, TableKind};

/// What happened to a table after a join or fold
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Seats remain
    Open,
    /// Linear table filled and split
    Split(SplitOutcome),
    /// Random table filled and settled
    Settled(SettleOutcome),
}

impl Transition {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Transition::Open)
    }
}

/// Decide whether `table` is now full and, if so, finish it in the same
/// transaction.
///
/// `seat_count` is the number of seats after the latest claim.
pub async fn resolve_capacity(
    tx: &mut dyn StoreTx,
    table: &Table,
    seat_count: usize,
    random: &dyn RandomSource,
) -> EngineResult<Transition> {
    if seat_count < table.kind.max_seats() {
        return Ok(Transition::Open);
    }

    match table.kind {
        TableKind::Linear => Ok(Transition::Split(
            split_linear(tx, table.id, random).await?,
        )),
        TableKind::Random => Ok(Transition::Settled(
            settle_random(tx, table.id, random).await?,
        )),
    }
}
