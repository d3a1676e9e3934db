//! Consolidation sweeper.
//!
//! Periodically folds stale, under-filled linear tables of the same entry
//! fee into each other so players are not spread across many half-empty
//! tables. Every fold is its own transaction using the same row locks as a
//! join, so it cannot race a player filling the donor or the primary.

use crate::db::StoreTx;
use crate::engine::{TableEngine, Transition, resolve_capacity};
use crate::errors::{EngineError, EngineResult};
use crate::models::{Amount, PlayerId, Table, TableId, TableKind, TableSnapshot, TableStatus};
use chrono::{TimeDelta, Utc};
use std::collections::{BTreeMap, HashSet};
use tokio::{
    sync::watch,
    time::{Duration, MissedTickBehavior, interval},
};

/// Sweeper timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// Open tables untouched for longer than this are candidates
    pub stale_after: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            stale_after: Duration::from_secs(600),
        }
    }
}

/// Summary of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale tables considered
    pub stale_tables: usize,
    /// Fee groups with at least two stale tables
    pub groups: usize,
    pub folds: usize,
    pub splits: usize,
    /// Groups abandoned after a failed fold
    pub failed_groups: usize,
}

/// A table as the planner sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldCandidate {
    pub table_id: TableId,
    pub players: Vec<PlayerId>,
}

impl From<&TableSnapshot> for FoldCandidate {
    fn from(snapshot: &TableSnapshot) -> Self {
        Self {
            table_id: snapshot.table.id,
            players: snapshot.seats.iter().map(|s| s.player_id).collect(),
        }
    }
}

/// One planned fold of `donor` into `primary`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedFold {
    pub donor: TableId,
    pub primary: TableId,
    /// Seats on the primary after the fold
    pub combined: usize,
    /// Primary reaches capacity and must split
    pub fills: bool,
}

/// Plan folds for one fee group.
///
/// Repeatedly takes the smallest remaining table and folds it into the
/// largest other table it fits into without seating a player twice. A donor
/// with no such partner is set aside. Planning stops after the first fold
/// that fills a table.
pub fn plan_folds(tables: &[FoldCandidate], max_seats: usize) -> Vec<PlannedFold> {
    let mut pool: Vec<(TableId, HashSet<PlayerId>)> = tables
        .iter()
        .map(|t| (t.table_id, t.players.iter().copied().collect()))
        .collect();
    let mut folds = Vec::new();

    loop {
        pool.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(a.0.cmp(&b.0)));
        let Some((donor_id, donor_players)) = pool.pop() else {
            break;
        };

        let primary = pool.iter_mut().find(|(_, players)| {
            players.len() + donor_players.len() <= max_seats
                && players.is_disjoint(&donor_players)
        });
        let Some((primary_id, primary_players)) = primary else {
            continue;
        };

        primary_players.extend(donor_players);
        let combined = primary_players.len();
        let fills = combined >= max_seats;
        folds.push(PlannedFold {
            donor: donor_id,
            primary: *primary_id,
            combined,
            fills,
        });
        if fills {
            break;
        }
    }

    folds
}

/// Background consolidation task
pub struct Sweeper {
    engine: TableEngine,
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(engine: TableEngine, config: SweeperConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> SweeperConfig {
        self.config
    }

    /// Run one sweep over every stale linear table
    ///
    /// # Errors
    ///
    /// Only the initial scan can fail; fold failures are logged and counted
    /// in [`SweepReport::failed_groups`].
    pub async fn sweep_once(&self) -> EngineResult<SweepReport> {
        let mut report = SweepReport::default();

        let Some(older_than) = TimeDelta::from_std(self.config.stale_after)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(report);
        };

        let stale = self
            .engine
            .store()
            .stale_open_tables(TableKind::Linear, older_than)
            .await?;
        report.stale_tables = stale.len();

        let mut groups: BTreeMap<Amount, Vec<FoldCandidate>> = BTreeMap::new();
        for snapshot in &stale {
            groups
                .entry(snapshot.table.entry_fee)
                .or_default()
                .push(FoldCandidate::from(snapshot));
        }

        let max_seats = TableKind::Linear.max_seats();
        for (fee, candidates) in groups {
            if candidates.len() < 2 {
                continue;
            }
            report.groups += 1;

            for planned in plan_folds(&candidates, max_seats) {
                match self.fold(planned).await {
                    Ok(transition) => {
                        report.folds += 1;
                        if transition.is_terminal() {
                            report.splits += 1;
                        }
                    }
                    Err(e) => {
                        log::warn!(
                            "Sweep of fee group {fee} stopped: fold {} -> {} failed: {e}",
                            planned.donor,
                            planned.primary
                        );
                        report.failed_groups += 1;
                        break;
                    }
                }
            }
        }

        if report.folds > 0 {
            log::info!(
                "Sweep folded {} table(s) in {} group(s), {} split(s)",
                report.folds,
                report.groups,
                report.splits
            );
        }
        Ok(report)
    }

    /// Move every seat of the donor onto the primary and close the donor
    async fn fold(&self, planned: PlannedFold) -> EngineResult<Transition> {
        let mut tx = self.engine.store().begin().await?;

        let (low, high) = if planned.donor < planned.primary {
            (planned.donor, planned.primary)
        } else {
            (planned.primary, planned.donor)
        };
        let low_table = lock_foldable(&mut *tx, low).await?;
        let high_table = lock_foldable(&mut *tx, high).await?;
        let (donor, primary) = if low == planned.donor {
            (low_table, high_table)
        } else {
            (high_table, low_table)
        };

        if donor.entry_fee != primary.entry_fee {
            return Err(EngineError::TableUnavailable {
                table_id: donor.id,
                status: Some(donor.status),
            });
        }

        let donor_seats = tx.seats(donor.id).await?.len();
        let primary_seats = tx.seats(primary.id).await?.len();
        let max_seats = primary.kind.max_seats();
        let combined = donor_seats + primary_seats;
        if combined > max_seats {
            return Err(EngineError::TableFull {
                table_id: primary.id,
                max_seats,
            });
        }

        tx.move_seats(donor.id, primary.id).await?;
        tx.set_status(donor.id, TableStatus::Closed).await?;
        tx.touch(primary.id).await?;

        let transition =
            resolve_capacity(&mut *tx, &primary, combined, self.engine.random()).await?;
        tx.commit().await?;

        log::info!(
            "Folded table {} into {} ({combined}/{max_seats})",
            donor.id,
            primary.id
        );
        self.engine.after_commit(&transition).await;
        Ok(transition)
    }

    /// Sweep every `interval` until `shutdown` turns true or its sender drops
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        self.run_with(shutdown, |_| {}).await;
    }

    /// Like [`Sweeper::run`], handing every completed report to `on_report`
    pub async fn run_with<F>(self, mut shutdown: watch::Receiver<bool>, mut on_report: F)
    where
        F: FnMut(&SweepReport) + Send,
    {
        log::info!(
            "Sweeper starting (interval {:?}, stale after {:?})",
            self.config.interval,
            self.config.stale_after
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(report) => on_report(&report),
                        Err(e) => log::error!("Sweep failed: {e}"),
                    }
                }
            }
        }

        log::info!("Sweeper stopped");
    }
}

async fn lock_foldable(
    tx: &mut dyn StoreTx,
    table_id: TableId,
) -> EngineResult<Table> {
    let table = tx
        .lock_table(table_id)
        .await?
        .ok_or(EngineError::NotFound(table_id))?;
    if table.status != TableStatus::Open || table.kind != TableKind::Linear {
        return Err(EngineError::TableUnavailable {
            table_id,
            status: Some(table.status),
        });
    }
    Ok(table)
}
