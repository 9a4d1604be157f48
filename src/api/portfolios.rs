//! Portfolios API
//!
//! - GET /api/portfolios/:id - Portfolio with holdings and valuation
//! - POST /api/portfolios/:id/buy - Buy a symbol at the gateway's current quote
//! - POST /api/portfolios/:id/top-picks - Assign 5X / 3X / 2X picks
//! - POST /api/portfolios/:id/reset - Restore starting cash

use super::ApiResponse;
use crate::services::{ContestError, LedgerError};
use crate::types::{Portfolio, ValuationSnapshot};
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/portfolios/:id", get(get_portfolio))
        .route("/api/portfolios/:id/buy", post(buy))
        .route("/api/portfolios/:id/top-picks", post(set_top_picks))
        .route("/api/portfolios/:id/reset", post(reset_portfolio))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyRequest {
    pub symbol: String,
    pub quantity: f64,
}

#[derive(Debug, Deserialize)]
pub struct TopPicksRequest {
    pub first: Option<String>,
    pub second: Option<String>,
    pub third: Option<String>,
}

/// Portfolio record plus its valuation snapshot.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioView {
    #[serde(flatten)]
    pub portfolio: Portfolio,
    pub valuation: ValuationSnapshot,
}

impl From<Portfolio> for PortfolioView {
    fn from(portfolio: Portfolio) -> Self {
        let profit = portfolio.total_value - portfolio.initial_value;
        let profit_pct = if portfolio.initial_value > 0.0 {
            profit / portfolio.initial_value * 100.0
        } else {
            0.0
        };
        let valuation = ValuationSnapshot {
            value: portfolio.total_value,
            profit,
            profit_pct,
            multiplier_bonus: portfolio.total_multiplier_bonus,
        };
        Self {
            portfolio,
            valuation,
        }
    }
}

/// GET /api/portfolios/:id
async fn get_portfolio(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<PortfolioView>>, ContestError> {
    let portfolio = state.contests.portfolio(&id)?;
    Ok(Json(ApiResponse::new(portfolio.into())))
}

/// POST /api/portfolios/:id/buy
async fn buy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<BuyRequest>,
) -> Result<Json<ApiResponse<PortfolioView>>, ContestError> {
    let symbol = request.symbol.trim().to_uppercase();
    let quotes = state.gateway.get_quotes(std::slice::from_ref(&symbol)).await;
    let price = quotes
        .get(&symbol)
        .map(|q| q.last_price)
        .ok_or_else(|| LedgerError::InvalidOrder(format!("no price for {}", symbol)))?;

    let portfolio = state.contests.buy(&id, &symbol, request.quantity, price)?;
    Ok(Json(ApiResponse::new(portfolio.into())))
}

/// POST /api/portfolios/:id/top-picks
async fn set_top_picks(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TopPicksRequest>,
) -> Result<Json<ApiResponse<PortfolioView>>, ContestError> {
    let portfolio = state.contests.set_top_picks(
        &id,
        request.first.as_deref(),
        request.second.as_deref(),
        request.third.as_deref(),
    )?;
    Ok(Json(ApiResponse::new(portfolio.into())))
}

/// POST /api/portfolios/:id/reset
async fn reset_portfolio(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<PortfolioView>>, ContestError> {
    let portfolio = state.contests.reset_portfolio(&id)?;
    Ok(Json(ApiResponse::new(portfolio.into())))
}
