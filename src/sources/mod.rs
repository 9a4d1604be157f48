//! Market data sources (live broker REST, simulated random walk).

pub mod broker;
pub mod simulated;
pub mod universe;

pub use broker::{BrokerAuth, LiveSource};
pub use simulated::SimulatedSource;

use crate::types::{DataSource, Index, Instrument, Quote};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use thiserror::Error;

/// Failure talking to an upstream. Always absorbed by the gateway.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Session unavailable: {0}")]
    Session(String),

    #[error("No data for {0}")]
    NoData(String),
}

/// A provider of instruments, quotes, indices and closing prices.
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Source name for logs.
    fn name(&self) -> &'static str;

    /// Tag attached to quotes this source produces.
    fn tag(&self) -> DataSource;

    /// Tradable universe, optionally limited to one exchange.
    async fn instruments(&self, exchange: Option<&str>) -> Result<Vec<Instrument>, SourceError>;

    /// Quotes keyed by symbol. Symbols the source cannot answer are omitted.
    async fn quotes(&self, symbols: &[String]) -> Result<HashMap<String, Quote>, SourceError>;

    /// Benchmark indices.
    async fn indices(&self) -> Result<Vec<Index>, SourceError>;

    /// Closing price of `instrument` on `date`.
    async fn daily_close(&self, instrument: &Instrument, date: NaiveDate) -> Result<f64, SourceError>;
}
