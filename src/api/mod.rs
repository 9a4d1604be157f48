pub mod contests;
pub mod health;
pub mod market;
pub mod portfolios;

use crate::AppState;
use axum::Router;
use serde::Serialize;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(contests::router())
        .merge(portfolios::router())
        .nest("/api/market", market::router())
}

/// Response envelope for every data endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}
