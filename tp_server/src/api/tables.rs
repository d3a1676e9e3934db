//! Table API handlers.
//!
//! # Examples
//!
//! Create a table:
//! ```bash
//! curl -X POST http://localhost:6969/api/v1/tables \
//!   -H "Content-Type: application/json" \
//!   -d '{"kind": "LINEAR", "entry_fee": "5.00"}'
//! ```
//!
//! Join a table:
//! ```bash
//! curl -X POST http://localhost:6969/api/v1/tables/1/join \
//!   -H "Content-Type: application/json" \
//!   -d '{"player_id": 42}'
//! ```

use super::{
    AppState,
    request_id::RequestId,
    validation::{
        CreateTableRequest, JoinTableRequest, ListTablesQuery, ValidationError,
        validate_invite_token, validate_table_id,
    },
};
use crate::{logging, metrics};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use table_pool::{
    Amount, EngineError, JoinOutcome, PlayerId, Prize, Seat, Table, TableId, TableKind,
    TableSnapshot, TableStatus, Transition, invite_link,
};

/// Table summary
#[derive(Debug, Serialize)]
pub struct TableResponse {
    pub id: TableId,
    pub kind: TableKind,
    pub status: TableStatus,
    pub entry_fee: Amount,
    pub prize_fund: Amount,
    pub max_seats: usize,
    pub invite_link: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TableResponse {
    fn new(table: &Table, bot_name: &str) -> Self {
        Self {
            id: table.id,
            kind: table.kind,
            status: table.status,
            entry_fee: table.entry_fee,
            prize_fund: table.prize_fund,
            max_seats: table.kind.max_seats(),
            invite_link: invite_link(bot_name, &table.invite_token),
            created_at: table.created_at,
            updated_at: table.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SeatResponse {
    pub player_id: PlayerId,
    pub joined_at: DateTime<Utc>,
    pub is_first_entry: bool,
}

impl From<&Seat> for SeatResponse {
    fn from(seat: &Seat) -> Self {
        Self {
            player_id: seat.player_id,
            joined_at: seat.joined_at,
            is_first_entry: seat.is_first_entry,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PrizeResponse {
    pub position: u32,
    pub player_id: Option<PlayerId>,
    pub amount: Amount,
}

impl From<&Prize> for PrizeResponse {
    fn from(prize: &Prize) -> Self {
        Self {
            position: prize.position,
            player_id: prize.player_id,
            amount: prize.amount,
        }
    }
}

/// Table with seats (earliest first) and prizes
#[derive(Debug, Serialize)]
pub struct TableDetailResponse {
    #[serde(flatten)]
    pub table: TableResponse,
    pub seat_count: usize,
    pub seats: Vec<SeatResponse>,
    pub prizes: Vec<PrizeResponse>,
}

impl TableDetailResponse {
    fn new(snapshot: &TableSnapshot, bot_name: &str) -> Self {
        Self {
            table: TableResponse::new(&snapshot.table, bot_name),
            seat_count: snapshot.seat_count(),
            seats: snapshot.seats.iter().map(SeatResponse::from).collect(),
            prizes: snapshot.prizes.iter().map(PrizeResponse::from).collect(),
        }
    }
}

/// What the join did to the table
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionResponse {
    Open,
    Split {
        winner: PlayerId,
        prize: Amount,
        children: Vec<TableId>,
    },
    Settled {
        winners: Vec<PrizeResponse>,
        replacement: TableId,
    },
}

impl From<&Transition> for TransitionResponse {
    fn from(transition: &Transition) -> Self {
        match transition {
            Transition::Open => TransitionResponse::Open,
            Transition::Split(split) => TransitionResponse::Split {
                winner: split.winner,
                prize: split.prize.amount,
                children: split.children.iter().map(|t| t.id).collect(),
            },
            Transition::Settled(settled) => TransitionResponse::Settled {
                winners: settled.prizes.iter().map(PrizeResponse::from).collect(),
                replacement: settled.replacement.id,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub seat: SeatResponse,
    pub balance: Amount,
    pub table: TableDetailResponse,
    pub transition: TransitionResponse,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn validation_error(err: ValidationError) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: err.to_string(),
            code: "invalid_request",
        }),
    )
}

/// Stable machine-readable code for an engine error
pub fn error_code(err: &EngineError) -> &'static str {
    match err {
        EngineError::PlayerNotFound(_) => "player_not_found",
        EngineError::TableUnavailable { .. } => "table_unavailable",
        EngineError::TableFull { .. } => "table_full",
        EngineError::DuplicateSeat { .. } => "duplicate_seat",
        EngineError::InsufficientFunds { .. } => "insufficient_funds",
        EngineError::InvalidEntryFee { .. } => "invalid_entry_fee",
        EngineError::InvalidCredit(_) => "invalid_amount",
        EngineError::DuplicateOpenTable { .. } => "duplicate_open_table",
        EngineError::NotFound(_) | EngineError::InviteNotFound(_) => "not_found",
        EngineError::InsufficientPlayers { .. } | EngineError::Store(_) => "internal",
    }
}

fn engine_error(err: EngineError) -> ApiError {
    let status = match &err {
        EngineError::PlayerNotFound(_)
        | EngineError::NotFound(_)
        | EngineError::InviteNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::TableUnavailable { .. }
        | EngineError::TableFull { .. }
        | EngineError::DuplicateSeat { .. }
        | EngineError::DuplicateOpenTable { .. } => StatusCode::CONFLICT,
        EngineError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
        EngineError::InvalidEntryFee { .. } | EngineError::InvalidCredit(_) => {
            StatusCode::BAD_REQUEST
        }
        EngineError::InsufficientPlayers { .. } | EngineError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    if !err.is_rejection() {
        tracing::error!(error = %err, "Engine failure");
    }

    (
        status,
        Json(ErrorResponse {
            error: err.client_message(),
            code: error_code(&err),
        }),
    )
}

/// Create a table.
///
/// # Errors
///
/// - `400 Bad Request`: unknown kind or fee
/// - `409 Conflict`: an open table with this kind and fee exists
pub async fn create_table(
    State(state): State<AppState>,
    Json(request): Json<CreateTableRequest>,
) -> Result<(StatusCode, Json<TableDetailResponse>), ApiError> {
    let params = request.validate().map_err(validation_error)?;

    let snapshot = state
        .engine
        .create_table(params.kind, params.entry_fee)
        .await
        .map_err(engine_error)?;
    metrics::tables_created_total(params.kind);

    Ok((
        StatusCode::CREATED,
        Json(TableDetailResponse::new(&snapshot, &state.bot_name)),
    ))
}

/// List tables, optionally filtered by `kind` and `status`.
pub async fn list_tables(
    State(state): State<AppState>,
    Query(query): Query<ListTablesQuery>,
) -> Result<Json<Vec<TableResponse>>, ApiError> {
    let filter = query.validate().map_err(validation_error)?;

    let tables = state
        .engine
        .list_tables(filter)
        .await
        .map_err(engine_error)?;

    Ok(Json(
        tables
            .iter()
            .map(|t| TableResponse::new(t, &state.bot_name))
            .collect(),
    ))
}

/// Get a table with its seats and prizes.
pub async fn get_table(
    State(state): State<AppState>,
    Path(table_id): Path<i64>,
) -> Result<Json<TableDetailResponse>, ApiError> {
    let table_id = validate_table_id(table_id).map_err(validation_error)?;

    let snapshot = state
        .engine
        .get_table_snapshot(table_id)
        .await
        .map_err(engine_error)?;

    Ok(Json(TableDetailResponse::new(&snapshot, &state.bot_name)))
}

/// Resolve an invite token to an open table.
pub async fn get_table_by_invite(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<TableDetailResponse>, ApiError> {
    let token = validate_invite_token(&token).map_err(validation_error)?;

    let snapshot = state
        .engine
        .table_by_invite(token)
        .await
        .map_err(engine_error)?;

    Ok(Json(TableDetailResponse::new(&snapshot, &state.bot_name)))
}

/// Take a seat and pay the entry fee.
///
/// # Errors
///
/// - `404 Not Found`: unknown player
/// - `409 Conflict`: table not open, full, or player already seated
/// - `402 Payment Required`: balance below the entry fee
pub async fn join_table(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(table_id): Path<i64>,
    Json(request): Json<JoinTableRequest>,
) -> Result<Json<JoinResponse>, ApiError> {
    let table_id = validate_table_id(table_id).map_err(validation_error)?;
    let player_id = request.validate().map_err(validation_error)?;

    match state.engine.join_table(table_id, player_id).await {
        Ok(outcome) => {
            metrics::joins_total("ok");
            metrics::transitions_total(outcome.snapshot.table.kind, &outcome.transition);
            tracing::info!(
                request_id = %request_id.as_str(),
                table_id = table_id,
                player_id = player_id,
                "Seat taken"
            );
            Ok(Json(join_response(&outcome, &state.bot_name)))
        }
        Err(err) => {
            metrics::joins_total(error_code(&err));
            if err.is_rejection() {
                logging::log_join_rejected(table_id, player_id, &err.client_message());
            }
            Err(engine_error(err))
        }
    }
}

fn join_response(outcome: &JoinOutcome, bot_name: &str) -> JoinResponse {
    JoinResponse {
        seat: SeatResponse::from(&outcome.seat),
        balance: outcome.balance,
        table: TableDetailResponse::new(&outcome.snapshot, bot_name),
        transition: TransitionResponse::from(&outcome.transition),
    }
}
