use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use petri_engine::arena::Arena;
use petri_engine::commitment::decode_seed;
use petri_types::constants::HISTORY_DEFAULT_LIMIT;
use petri_types::{
    AccountId, KycState, LedgerEntry, Lobby, LobbyConfig, MatchId, MatchOutcome, Membership,
    PayoutModel, Placement, PlayerAccount, Wallet,
};

use crate::auth::{mint_token, verify_token};
use crate::ledger::{LedgerError, Precondition};
use crate::AppState;

pub(super) enum ApiError {
    Ledger(LedgerError),
    BadRequest(&'static str),
    Unauthorized,
    MatchNotComplete,
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        Self::Ledger(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, "validation", message.to_string()),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or invalid bearer token".to_string(),
            ),
            Self::MatchNotComplete => (
                StatusCode::CONFLICT,
                "match_not_complete",
                "seed is revealed only after settlement".to_string(),
            ),
            Self::Ledger(err) => match err {
                LedgerError::Validation(message) => {
                    (StatusCode::BAD_REQUEST, "validation", message.to_string())
                }
                LedgerError::Precondition(p) => {
                    let status = match p {
                        Precondition::UnknownAccount
                        | Precondition::UnknownLobby
                        | Precondition::UnknownMatch => StatusCode::NOT_FOUND,
                        _ => StatusCode::CONFLICT,
                    };
                    (status, p.code(), p.to_string())
                }
                LedgerError::Contention => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "contention",
                    "concurrent wallet update; retry".to_string(),
                ),
                LedgerError::Integrity(message) => {
                    tracing::error!(%message, "integrity violation surfaced to API");
                    (StatusCode::INTERNAL_SERVER_ERROR, "integrity", message)
                }
                LedgerError::Storage(err) => {
                    tracing::error!(?err, "storage failure surfaced to API");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "storage",
                        "storage failure".to_string(),
                    )
                }
            },
        };
        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

fn parse_account(id: &str) -> Result<AccountId, ApiError> {
    AccountId::from_hex(id).ok_or(ApiError::BadRequest("invalid account id"))
}

fn parse_match(id: &str) -> Result<MatchId, ApiError> {
    MatchId::from_hex(id).ok_or(ApiError::BadRequest("invalid match id"))
}

/// Resolve the caller from the `Authorization: Bearer` header.
fn bearer_account(state: &AppState, headers: &HeaderMap) -> Result<AccountId, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .and_then(|token| verify_token(&state.config.jwt_secret, token))
        .ok_or(ApiError::Unauthorized)
}

pub(super) async fn healthz() -> &'static str {
    "ok"
}

pub(super) async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    Json(state.metrics.snapshot()).into_response()
}

// ---- accounts ------------------------------------------------------------

#[derive(Deserialize)]
pub(super) struct CreateAccountBody {
    nickname: String,
    #[serde(default)]
    region: String,
}

#[derive(Serialize)]
pub(super) struct CreateAccountResponse {
    account: PlayerAccount,
    /// Dev-surface token; real deployments issue tokens elsewhere.
    token: String,
}

pub(super) async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateAccountBody>,
) -> Result<Json<CreateAccountResponse>, ApiError> {
    let account = state.ledger.create_account(&body.nickname, &body.region)?;
    let token = mint_token(&state.config.jwt_secret, account.id);
    Ok(Json(CreateAccountResponse { account, token }))
}

#[derive(Serialize)]
pub(super) struct AccountResponse {
    account: PlayerAccount,
    wallet: Wallet,
}

pub(super) async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AccountResponse>, ApiError> {
    let id = parse_account(&id)?;
    Ok(Json(AccountResponse {
        account: state.ledger.account(id)?,
        wallet: state.ledger.wallet(id)?,
    }))
}

#[derive(Deserialize)]
pub(super) struct DepositBody {
    amount_cents: u64,
    #[serde(default)]
    reference: String,
    idempotency_key: Option<String>,
}

pub(super) async fn deposit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<DepositBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = parse_account(&id)?;
    let ledger_id = state.ledger.deposit(
        id,
        body.amount_cents,
        &body.reference,
        body.idempotency_key.as_deref(),
    )?;
    Ok(Json(json!({ "ledger_id": ledger_id })))
}

#[derive(Deserialize)]
pub(super) struct WithdrawBody {
    amount_cents: u64,
    method: String,
    idempotency_key: Option<String>,
}

pub(super) async fn withdraw(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<WithdrawBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = parse_account(&id)?;
    if bearer_account(&state, &headers)? != id {
        return Err(ApiError::Unauthorized);
    }
    let ledger_id = state.ledger.withdraw(
        id,
        body.amount_cents,
        &body.method,
        body.idempotency_key.as_deref(),
    )?;
    Ok(Json(json!({ "ledger_id": ledger_id })))
}

#[derive(Deserialize)]
pub(super) struct KycBody {
    state: KycState,
}

pub(super) async fn set_kyc(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<KycBody>,
) -> Result<StatusCode, ApiError> {
    let id = parse_account(&id)?;
    state.ledger.set_kyc(id, body.state)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub(super) struct HistoryQuery {
    cursor: Option<i64>,
    limit: Option<usize>,
}

#[derive(Serialize)]
pub(super) struct HistoryResponse {
    entries: Vec<LedgerEntry>,
    next_cursor: Option<i64>,
}

pub(super) async fn history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let id = parse_account(&id)?;
    let (entries, next_cursor) = state.ledger.history(
        id,
        query.cursor,
        query.limit.unwrap_or(HISTORY_DEFAULT_LIMIT),
    )?;
    Ok(Json(HistoryResponse {
        entries,
        next_cursor,
    }))
}

// ---- lobbies -------------------------------------------------------------

pub(super) async fn create_lobby(
    State(state): State<Arc<AppState>>,
    Json(config): Json<LobbyConfig>,
) -> Result<Json<Lobby>, ApiError> {
    Ok(Json(state.controller.create_lobby(&config)?))
}

pub(super) async fn list_lobbies(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Lobby>>, ApiError> {
    Ok(Json(state.registry.list_lobbies()?))
}

#[derive(Serialize)]
pub(super) struct LobbyResponse {
    lobby: Lobby,
    members: Vec<Membership>,
}

pub(super) async fn get_lobby(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<LobbyResponse>, ApiError> {
    Ok(Json(LobbyResponse {
        lobby: state.registry.lobby(id)?,
        members: state.registry.members(id)?,
    }))
}

pub(super) async fn join_lobby(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Result<Json<Membership>, ApiError> {
    let account = bearer_account(&state, &headers)?;
    Ok(Json(state.controller.join(id, account).await?))
}

pub(super) async fn leave_lobby(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let account = bearer_account(&state, &headers)?;
    state.controller.leave(id, account).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- matches -------------------------------------------------------------

#[derive(Serialize)]
pub(super) struct MatchResponse {
    id: MatchId,
    lobby_id: u64,
    commit: String,
    payout_model: PayoutModel,
    rake_bps: u16,
    rake_cap: Option<u64>,
    buy_in: u64,
    pot: u64,
    rake: u64,
    net_pot: u64,
    map_radius: f64,
    started_at: u64,
    ended_at: Option<u64>,
    outcome: Option<MatchOutcome>,
    /// Pre-image, revealed only once the match row is closed.
    seed: Option<String>,
    nonce: Option<String>,
    placements: Vec<Placement>,
}

pub(super) async fn get_match(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MatchResponse>, ApiError> {
    let id = parse_match(&id)?;
    let record = state.registry.match_record(id)?;
    let placements = if record.ended_at.is_some() {
        state.registry.placements(id)?
    } else {
        Vec::new()
    };
    let revealed = record.ended_at.is_some();
    Ok(Json(MatchResponse {
        id: record.id,
        lobby_id: record.lobby_id,
        commit: record.commit,
        payout_model: record.payout_model,
        rake_bps: record.rake_bps,
        rake_cap: record.rake_cap,
        buy_in: record.buy_in,
        pot: record.pot,
        rake: record.rake,
        net_pot: record.net_pot,
        map_radius: record.map_radius,
        started_at: record.started_at,
        ended_at: record.ended_at,
        outcome: record.outcome,
        seed: revealed.then_some(record.seed),
        nonce: revealed.then_some(record.nonce),
        placements,
    }))
}

#[derive(Serialize)]
pub(super) struct VerifyResponse {
    commit: String,
    seed: String,
    nonce: String,
    algorithm: &'static str,
    reproduced: ReproducedWorld,
}

#[derive(Serialize)]
pub(super) struct ReproducedWorld {
    spawn_positions: Vec<(f64, f64)>,
    pellet_positions: Vec<(f64, f64)>,
}

/// Post-reveal verification surface: replays the seeded world generation so
/// third parties can audit the commitment end to end.
pub(super) async fn verify_match(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let id = parse_match(&id)?;
    let record = state.registry.match_record(id)?;
    if record.ended_at.is_none() {
        return Err(ApiError::MatchNotComplete);
    }
    let seed = decode_seed(&record.seed)
        .map_err(|_| ApiError::Ledger(LedgerError::Integrity("stored seed unreadable".into())))?;
    let members = state.registry.members(record.lobby_id)?;
    let (spawn_positions, pellet_positions) =
        Arena::reproduce_initial(&seed, members.len(), record.map_radius);
    Ok(Json(VerifyResponse {
        commit: record.commit,
        seed: record.seed,
        nonce: record.nonce,
        algorithm: "SHA-256(hex(seed) || hex(nonce))",
        reproduced: ReproducedWorld {
            spawn_positions,
            pellet_positions,
        },
    }))
}
