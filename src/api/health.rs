use crate::types::DataSource;
use crate::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    data_source: DataSource,
    market_open: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.gateway.data_status();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        data_source: status.source,
        market_open: status.market_open,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/health", get(health))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "ok",
            version: "1.0.0",
            data_source: DataSource::Eod,
            market_open: false,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"version\":\"1.0.0\""));
        assert!(json.contains("\"dataSource\":\"eod\""));
        assert!(json.contains("\"marketOpen\":false"));
    }
}
