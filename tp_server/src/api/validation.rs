//! Request validation.
//!
//! Raw request bodies and query strings are checked here and turned into the
//! typed values the engine accepts. Nothing in this module touches storage.

use serde::Deserialize;
use table_pool::{Amount, PlayerId, TableFilter, TableId, TableKind, TableStatus};
use thiserror::Error;

/// Longest invite token accepted in a path
pub const MAX_INVITE_TOKEN_LEN: usize = 64;

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unknown table kind '{0}', expected LINEAR or RANDOM")]
    UnknownKind(String),

    #[error("Unknown table status '{0}', expected OPEN, FINISHED or CLOSED")]
    UnknownStatus(String),

    #[error("Invalid entry fee: {0}")]
    InvalidAmount(String),

    #[error("Entry fee {fee} is not offered for {kind} tables (allowed: {allowed})")]
    FeeNotOffered {
        kind: TableKind,
        fee: Amount,
        allowed: String,
    },

    #[error("{0} must be a positive integer")]
    InvalidId(&'static str),

    #[error("Invite token must be 1-64 letters or digits")]
    InvalidInviteToken,
}

/// Money as clients send it: `"5.00"` or `5`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl AmountInput {
    fn parse(&self) -> Result<Amount, ValidationError> {
        let raw = match self {
            AmountInput::Text(text) => text.clone(),
            AmountInput::Number(number) => number.to_string(),
        };
        raw.parse()
            .map_err(|e| ValidationError::InvalidAmount(format!("'{raw}': {e}")))
    }
}

/// Create-table request body
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTableRequest {
    pub kind: String,
    pub entry_fee: AmountInput,
}

/// Validated create-table parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewTableParams {
    pub kind: TableKind,
    pub entry_fee: Amount,
}

impl CreateTableRequest {
    pub fn validate(&self) -> Result<NewTableParams, ValidationError> {
        let kind = parse_kind(&self.kind)?;
        let entry_fee = self.entry_fee.parse()?;

        if !kind.accepts_fee(entry_fee) {
            let allowed = kind
                .allowed_entry_fees()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ValidationError::FeeNotOffered {
                kind,
                fee: entry_fee,
                allowed,
            });
        }

        Ok(NewTableParams { kind, entry_fee })
    }
}

/// Join request body
#[derive(Debug, Clone, Deserialize)]
pub struct JoinTableRequest {
    pub player_id: i64,
}

impl JoinTableRequest {
    pub fn validate(&self) -> Result<PlayerId, ValidationError> {
        validate_id("player_id", self.player_id)
    }
}

/// Table listing query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTablesQuery {
    pub kind: Option<String>,
    pub status: Option<String>,
}

impl ListTablesQuery {
    pub fn validate(&self) -> Result<TableFilter, ValidationError> {
        let kind = self
            .kind
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(parse_kind)
            .transpose()?;
        let status = self
            .status
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<TableStatus>()
                    .map_err(|_| ValidationError::UnknownStatus(s.to_string()))
            })
            .transpose()?;
        Ok(TableFilter { kind, status })
    }
}

/// Check a table id taken from a path
pub fn validate_table_id(table_id: i64) -> Result<TableId, ValidationError> {
    validate_id("table_id", table_id)
}

/// Check an invite token taken from a path
pub fn validate_invite_token(token: &str) -> Result<&str, ValidationError> {
    let valid = !token.is_empty()
        && token.len() <= MAX_INVITE_TOKEN_LEN
        && token.bytes().all(|b| b.is_ascii_alphanumeric());
    if valid {
        Ok(token)
    } else {
        Err(ValidationError::InvalidInviteToken)
    }
}

fn validate_id(field: &'static str, id: i64) -> Result<i64, ValidationError> {
    if id > 0 {
        Ok(id)
    } else {
        Err(ValidationError::InvalidId(field))
    }
}

fn parse_kind(raw: &str) -> Result<TableKind, ValidationError> {
    raw.parse()
        .map_err(|_| ValidationError::UnknownKind(raw.to_string()))
}
