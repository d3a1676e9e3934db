//! Table, seat and prize data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Table ID type
pub type TableId = i64;

/// Player ID type
pub type PlayerId = i64;

/// Prize record ID type
pub type PrizeId = i64;

/// Share of a full table's gross entry fees placed in the prize fund at creation.
pub const INITIAL_FUND_PERCENT: i64 = 60;

/// Payout percentages for positions 1..=3 of a random table.
pub const RANDOM_PAYOUT_PERCENTS: [i64; 3] = [50, 30, 20];

/// Money in minor units (hundredths).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Build an amount from minor units (cents).
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Build an amount from whole currency units.
    pub const fn from_major(major: i64) -> Self {
        Self(major * 100)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn checked_mul(self, factor: i64) -> Option<Amount> {
        self.0.checked_mul(factor).map(Amount)
    }

    /// `percent`% of this amount, floored to the minor unit.
    pub fn percent(self, percent: i64) -> Amount {
        Amount(self.0.saturating_mul(percent).div_euclid(100))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// Amount parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountParseError {
    #[error("amount is empty")]
    Empty,

    #[error("amount must not be negative")]
    Negative,

    #[error("amount has more than two decimal places")]
    TooPrecise,

    #[error("amount is not a number: {0}")]
    Malformed(String),

    #[error("amount is too large")]
    Overflow,
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AmountParseError::Empty);
        }
        if s.starts_with('-') {
            return Err(AmountParseError::Negative);
        }

        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError::Malformed(s.to_string()));
        }
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError::Malformed(s.to_string()));
        }
        if frac.len() > 2 {
            return Err(AmountParseError::TooPrecise);
        }

        let whole: i64 = whole.parse().map_err(|_| AmountParseError::Overflow)?;
        let cents: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| AmountParseError::Malformed(s.to_string()))? * 10,
            _ => frac.parse().map_err(|_| AmountParseError::Malformed(s.to_string()))?,
        };

        whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(cents))
            .map(Amount)
            .ok_or(AmountParseError::Overflow)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Table kind, deciding capacity, valid fees and settlement rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableKind {
    /// Earliest joiner wins, the rest continue on two child tables
    Linear,
    /// Three random winners share the fund
    Random,
}

impl TableKind {
    pub const ALL: [TableKind; 2] = [TableKind::Linear, TableKind::Random];

    /// Seats available at a table of this kind
    pub fn max_seats(self) -> usize {
        match self {
            TableKind::Linear => 15,
            TableKind::Random => 12,
        }
    }

    /// Entry fees a table of this kind may be created with
    pub fn allowed_entry_fees(self) -> &'static [Amount] {
        const FEES: [Amount; 3] = [
            Amount::from_major(3),
            Amount::from_major(5),
            Amount::from_major(10),
        ];
        match self {
            TableKind::Linear | TableKind::Random => &FEES,
        }
    }

    pub fn accepts_fee(self, fee: Amount) -> bool {
        self.allowed_entry_fees().contains(&fee)
    }

    /// Prize fund a fresh table starts with: `max_seats * fee * 60%`.
    pub fn initial_prize_fund(self, fee: Amount) -> Amount {
        fee.checked_mul(self.max_seats() as i64)
            .unwrap_or(Amount(i64::MAX))
            .percent(INITIAL_FUND_PERCENT)
    }

    /// Storage representation
    pub fn as_str(self) -> &'static str {
        match self {
            TableKind::Linear => "linear",
            TableKind::Random => "random",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Linear => write!(f, "LINEAR"),
            TableKind::Random => write!(f, "RANDOM"),
        }
    }
}

impl FromStr for TableKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(TableKind::Linear),
            "random" => Ok(TableKind::Random),
            other => Err(format!("unknown table kind: {other}")),
        }
    }
}

/// Table status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableStatus {
    /// Accepting seats
    Open,
    /// Settled or split; produced prize records
    Finished,
    /// Folded into another table by the sweeper
    Closed,
}

impl TableStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TableStatus::Open)
    }

    /// Storage representation
    pub fn as_str(self) -> &'static str {
        match self {
            TableStatus::Open => "open",
            TableStatus::Finished => "finished",
            TableStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableStatus::Open => write!(f, "OPEN"),
            TableStatus::Finished => write!(f, "FINISHED"),
            TableStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

impl FromStr for TableStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(TableStatus::Open),
            "finished" => Ok(TableStatus::Finished),
            "closed" => Ok(TableStatus::Closed),
            other => Err(format!("unknown table status: {other}")),
        }
    }
}

/// Persisted table record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    pub kind: TableKind,
    pub entry_fee: Amount,
    pub prize_fund: Amount,
    pub status: TableStatus,
    pub invite_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to insert a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTable {
    pub kind: TableKind,
    pub entry_fee: Amount,
    pub prize_fund: Amount,
    pub invite_token: String,
}

/// One player's occupancy of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub id: i64,
    pub table_id: TableId,
    pub player_id: PlayerId,
    pub joined_at: DateTime<Utc>,
    pub is_first_entry: bool,
}

/// Immutable payout entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prize {
    pub id: PrizeId,
    pub table_id: TableId,
    pub player_id: Option<PlayerId>,
    pub position: u32,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
}

/// Player as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub balance: Amount,
    pub games_played: i64,
    pub wins: i64,
}

/// Table with its seats (earliest first) and prizes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub table: Table,
    pub seats: Vec<Seat>,
    pub prizes: Vec<Prize>,
}

impl TableSnapshot {
    pub fn seat_count(&self) -> usize {
        self.seats.len()
    }

    pub fn max_seats(&self) -> usize {
        self.table.kind.max_seats()
    }

    pub fn is_full(&self) -> bool {
        self.seat_count() >= self.max_seats()
    }

    pub fn has_player(&self, player_id: PlayerId) -> bool {
        self.seats.iter().any(|s| s.player_id == player_id)
    }
}

/// Filter for table listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFilter {
    pub kind: Option<TableKind>,
    pub status: Option<TableStatus>,
}

impl TableFilter {
    pub fn matches(&self, table: &Table) -> bool {
        self.kind.is_none_or(|k| k == table.kind) && self.status.is_none_or(|s| s == table.status)
    }
}

/// Shareable invite link for a table token
pub fn invite_link(bot_name: &str, token: &str) -> String {
    format!("https://t.me/{bot_name}?start=table_{token}")
}
