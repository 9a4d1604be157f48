//! Contest Engine - fantasy trading contests with live and simulated market data

pub mod api;
pub mod config;
pub mod error;
pub mod services;
pub mod sources;
pub mod types;

use config::Config;
use services::{ContestService, MarketDataGateway};
use std::sync::Arc;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub gateway: Arc<MarketDataGateway>,
    pub contests: Arc<ContestService>,
}
