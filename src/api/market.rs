//! Market API
//!
//! - GET /api/market/status - Data source, last update, market open
//! - GET /api/market/instruments?exchange=NSE - Tradable universe
//! - GET /api/market/quotes?symbols=TCS,INFY - Quotes for symbols
//! - GET /api/market/indices - Benchmark indices
//! - POST /api/market/session - Establish the broker session
//! - POST /api/market/eod/refresh - Refresh the close cache if stale

use super::ApiResponse;
use crate::error::{AppError, Result};
use crate::types::{DataStatus, Index, Instrument, Quote};
use crate::AppState;
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/instruments", get(get_instruments))
        .route("/quotes", get(get_quotes))
        .route("/indices", get(get_indices))
        .route("/session", post(ensure_session))
        .route("/eod/refresh", post(refresh_eod))
}

#[derive(Debug, Deserialize)]
pub struct InstrumentsQuery {
    pub exchange: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuotesQuery {
    /// Comma-separated symbols.
    pub symbols: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub valid: bool,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EodRefreshResponse {
    pub refreshed: bool,
    pub session_date: Option<chrono::NaiveDate>,
    pub prices: usize,
}

/// GET /api/market/status
async fn get_status(State(state): State<AppState>) -> Json<ApiResponse<DataStatus>> {
    Json(ApiResponse::new(state.gateway.data_status()))
}

/// GET /api/market/instruments
async fn get_instruments(
    State(state): State<AppState>,
    Query(query): Query<InstrumentsQuery>,
) -> Json<ApiResponse<Vec<Instrument>>> {
    let instruments = state
        .gateway
        .list_instruments(query.exchange.as_deref())
        .await;
    Json(ApiResponse::new(instruments))
}

/// GET /api/market/quotes
///
/// Quotes come back in the order the symbols were asked for.
async fn get_quotes(
    State(state): State<AppState>,
    Query(query): Query<QuotesQuery>,
) -> Result<Json<ApiResponse<Vec<Quote>>>> {
    let symbols = parse_symbols(query.symbols.as_deref().unwrap_or_default());
    if symbols.is_empty() {
        return Err(AppError::BadRequest("symbols is required".to_string()));
    }

    let mut quotes = state.gateway.get_quotes(&symbols).await;
    let ordered = symbols
        .iter()
        .filter_map(|s| quotes.remove(s))
        .collect();
    Ok(Json(ApiResponse::new(ordered)))
}

/// GET /api/market/indices
async fn get_indices(State(state): State<AppState>) -> Json<ApiResponse<Vec<Index>>> {
    Json(ApiResponse::new(state.gateway.get_indices().await))
}

/// POST /api/market/session
async fn ensure_session(State(state): State<AppState>) -> Result<Json<ApiResponse<SessionResponse>>> {
    let session = state.gateway.ensure_session().await?;
    Ok(Json(ApiResponse::new(SessionResponse {
        valid: session.valid,
        expires_at: session.expires_at,
    })))
}

/// POST /api/market/eod/refresh
async fn refresh_eod(State(state): State<AppState>) -> Json<ApiResponse<EodRefreshResponse>> {
    let refreshed = state.gateway.refresh_eod_prices_if_stale().await;
    let snapshot = state.gateway.eod_snapshot().await;
    Json(ApiResponse::new(EodRefreshResponse {
        refreshed,
        session_date: snapshot.session_date,
        prices: snapshot.prices.len(),
    }))
}

/// Split, trim and uppercase a comma-separated symbol list, dropping repeats.
fn parse_symbols(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in raw.split(',').map(|s| s.trim().to_uppercase()) {
        if !symbol.is_empty() && !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    symbols
}
