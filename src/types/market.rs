use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a quote or index value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Real-time value from the broker feed.
    Live,
    /// Last cached closing price, market closed.
    Eod,
    /// Generated by the simulated source.
    Simulated,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Live => write!(f, "live"),
            DataSource::Eod => write!(f, "eod"),
            DataSource::Simulated => write!(f, "simulated"),
        }
    }
}

/// Kind of asset a contest trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    #[default]
    Stock,
    Crypto,
}

/// A tradable instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub token: String,
    pub symbol: String,
    pub name: String,
    pub last_price: f64,
    pub exchange: String,
}

impl Instrument {
    pub fn new(token: &str, symbol: &str, name: &str, last_price: f64, exchange: &str) -> Self {
        Self {
            token: token.to_string(),
            symbol: symbol.to_string(),
            name: name.to_string(),
            last_price,
            exchange: exchange.to_string(),
        }
    }
}

/// Open/high/low/close for the current session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Ohlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Ohlc {
    /// A flat bar where every field equals `price`.
    pub fn flat(price: f64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }
}

/// Normalized quote, regardless of upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub last_price: f64,
    pub day_change: f64,
    pub day_change_pct: f64,
    pub volume: u64,
    pub ohlc: Ohlc,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    pub source: DataSource,
}

impl Quote {
    /// Closing-price quote with zero change, used while the market is closed.
    pub fn end_of_day(symbol: &str, close: f64, timestamp: i64) -> Self {
        Self {
            symbol: symbol.to_string(),
            last_price: close,
            day_change: 0.0,
            day_change_pct: 0.0,
            volume: 0,
            ohlc: Ohlc::flat(close),
            timestamp,
            source: DataSource::Eod,
        }
    }
}

/// Market index value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub name: String,
    pub value: f64,
    pub change: f64,
    pub change_pct: f64,
    pub source: DataSource,
}

/// Provenance details surfaced next to every price the UI renders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStatus {
    pub source: DataSource,
    /// Unix timestamp in milliseconds of the last delivered quote batch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<i64>,
    pub market_open: bool,
    pub live_configured: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_source_serialization() {
        assert_eq!(serde_json::to_string(&DataSource::Live).unwrap(), "\"live\"");
        assert_eq!(serde_json::to_string(&DataSource::Eod).unwrap(), "\"eod\"");
        assert_eq!(
            serde_json::to_string(&DataSource::Simulated).unwrap(),
            "\"simulated\""
        );
    }

    #[test]
    fn test_data_source_display() {
        assert_eq!(DataSource::Eod.to_string(), "eod");
        assert_eq!(DataSource::Simulated.to_string(), "simulated");
    }

    #[test]
    fn test_end_of_day_quote_has_zero_change() {
        let quote = Quote::end_of_day("TCS", 3_450.5, 1_700_000_000_000);

        assert_eq!(quote.last_price, 3_450.5);
        assert_eq!(quote.day_change, 0.0);
        assert_eq!(quote.day_change_pct, 0.0);
        assert_eq!(quote.source, DataSource::Eod);
        assert_eq!(quote.ohlc.high, 3_450.5);
    }

    #[test]
    fn test_quote_serializes_camel_case() {
        let quote = Quote::end_of_day("INFY", 1_500.0, 0);
        let json = serde_json::to_string(&quote).unwrap();

        assert!(json.contains("\"lastPrice\":1500.0"));
        assert!(json.contains("\"dayChangePct\":0.0"));
        assert!(json.contains("\"source\":\"eod\""));
    }
}
