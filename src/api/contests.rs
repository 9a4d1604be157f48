//! Contests API
//!
//! - GET /api/contests - List contests
//! - POST /api/contests - Create a contest
//! - GET /api/contests/:id - Contest details with phase flags
//! - POST /api/contests/:id/join - Enter a user into a contest
//! - GET /api/contests/:id/leaderboard - Ranked standings

use super::{ApiResponse, ErrorResponse};
use crate::services::{ContestError, LedgerError};
use crate::types::{Contest, NewContest, Participant, ParticipantIdentity, PhaseFlags};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/contests", get(list_contests).post(create_contest))
        .route("/api/contests/:id", get(get_contest))
        .route("/api/contests/:id/join", post(join_contest))
        .route("/api/contests/:id/leaderboard", get(get_leaderboard))
}

/// Convert ContestError to HTTP response.
impl IntoResponse for ContestError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match &self {
            ContestError::ContestNotFound(_) => (StatusCode::NOT_FOUND, "CONTEST_NOT_FOUND"),
            ContestError::PortfolioNotFound(_) => (StatusCode::NOT_FOUND, "PORTFOLIO_NOT_FOUND"),
            ContestError::InvalidSchedule(_) => (StatusCode::BAD_REQUEST, "INVALID_SCHEDULE"),
            ContestError::RegistrationClosed(_) => (StatusCode::CONFLICT, "REGISTRATION_CLOSED"),
            ContestError::AlreadyJoined { .. } => (StatusCode::CONFLICT, "ALREADY_JOINED"),
            ContestError::Ledger(e) => match e {
                LedgerError::Locked => (StatusCode::FORBIDDEN, "PORTFOLIO_LOCKED"),
                LedgerError::InvalidOrder(_) => (StatusCode::BAD_REQUEST, "INVALID_ORDER"),
                LedgerError::InsufficientFunds { .. } => {
                    (StatusCode::BAD_REQUEST, "INSUFFICIENT_FUNDS")
                }
                LedgerError::ConcentrationLimitExceeded { .. } => {
                    (StatusCode::BAD_REQUEST, "CONCENTRATION_LIMIT_EXCEEDED")
                }
                LedgerError::InvalidPick(_) => (StatusCode::BAD_REQUEST, "INVALID_PICK"),
            },
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

/// Contest plus the gating flags in effect now.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestView {
    #[serde(flatten)]
    pub contest: Contest,
    pub flags: PhaseFlags,
}

/// GET /api/contests
async fn list_contests(State(state): State<AppState>) -> Json<ApiResponse<Vec<Contest>>> {
    Json(ApiResponse::new(state.contests.list_contests()))
}

/// POST /api/contests
async fn create_contest(
    State(state): State<AppState>,
    Json(request): Json<NewContest>,
) -> Result<(StatusCode, Json<ApiResponse<Contest>>), ContestError> {
    let contest = state.contests.create_contest(request)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::new(contest))))
}

/// GET /api/contests/:id
async fn get_contest(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ContestView>>, ContestError> {
    let contest = state.contests.get_contest(&id)?;
    let flags = state.contests.phase_flags(&id)?;
    Ok(Json(ApiResponse::new(ContestView { contest, flags })))
}

/// POST /api/contests/:id/join
async fn join_contest(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(identity): Json<ParticipantIdentity>,
) -> Result<(StatusCode, Json<ApiResponse<Participant>>), ContestError> {
    let participant = state.contests.join_contest(&id, identity)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::new(participant))))
}

/// GET /api/contests/:id/leaderboard
async fn get_leaderboard(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<Participant>>>, ContestError> {
    Ok(Json(ApiResponse::new(state.contests.leaderboard(&id)?)))
}
