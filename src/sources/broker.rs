//! Broker REST client for live instruments, quotes and historical closes.
//!
//! Speaks the Kite Connect v3 REST shape:
//! - `POST /session/token` exchanges a request token for an access token
//! - `GET /instruments/{exchange}` returns a CSV dump of the universe
//! - `GET /quote?i=EXCHANGE:SYMBOL` returns quotes keyed by instrument
//! - `GET /instruments/historical/{token}/day` returns daily candles

use super::universe::{self, DEFAULT_EXCHANGE, INDICES};
use super::{MarketSource, SourceError};
use crate::config::BrokerConfig;
use crate::services::session::{SessionError, SessionManager, TokenIssuer};
use crate::services::Clock;
use crate::types::{DataSource, Index, Instrument, Ohlc, Quote};
use async_trait::async_trait;
use chrono::NaiveDate;
use csv::{ReaderBuilder, Trim};
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const API_VERSION: &str = "3";
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SessionData {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct BrokerOhlc {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

#[derive(Debug, Deserialize)]
struct BrokerQuote {
    last_price: f64,
    #[serde(default)]
    volume: Option<u64>,
    #[serde(default)]
    net_change: Option<f64>,
    ohlc: BrokerOhlc,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candles {
    candles: Vec<Vec<serde_json::Value>>,
}

fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Exchanges a request token for an access token.
pub struct BrokerAuth {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    request_token: Option<String>,
}

impl BrokerAuth {
    /// None when the API key or secret is missing.
    pub fn from_config(config: &BrokerConfig) -> Option<Self> {
        if !config.has_credentials() {
            return None;
        }
        Some(Self {
            client: http_client(),
            base_url: trim_base(&config.base_url),
            api_key: config.api_key.clone().unwrap_or_default(),
            api_secret: config.api_secret.clone().unwrap_or_default(),
            request_token: config.request_token.clone(),
        })
    }

    /// SHA-256 of `api_key + request_token + api_secret`, hex encoded.
    pub fn checksum(api_key: &str, request_token: &str, api_secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(api_key.as_bytes());
        hasher.update(request_token.as_bytes());
        hasher.update(api_secret.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl TokenIssuer for BrokerAuth {
    async fn issue_token(&self) -> Result<String, SessionError> {
        let request_token = self
            .request_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SessionError::MissingCredentials("request token".to_string()))?;

        let checksum = Self::checksum(&self.api_key, request_token, &self.api_secret);
        let params = [
            ("api_key", self.api_key.as_str()),
            ("request_token", request_token),
            ("checksum", checksum.as_str()),
        ];

        let response = self
            .client
            .post(format!("{}/session/token", self.base_url))
            .header("X-Kite-Version", API_VERSION)
            .form(&params)
            .send()
            .await
            .map_err(|e| SessionError::Upstream(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(SessionError::Upstream(format!("API error: {}", response.status())));
        }

        let envelope: Envelope<SessionData> = response
            .json()
            .await
            .map_err(|e| SessionError::Upstream(format!("Parse error: {}", e)))?;

        match envelope.data {
            Some(data) if envelope.status == "success" => {
                info!("Broker issued a new access token");
                Ok(data.access_token)
            }
            _ => Err(SessionError::Upstream(
                envelope.message.unwrap_or_else(|| "session rejected".to_string()),
            )),
        }
    }
}

/// Live market data backed by the broker REST API.
pub struct LiveSource {
    client: Client,
    base_url: String,
    api_key: String,
    session: Arc<SessionManager>,
    clock: Arc<dyn Clock>,
}

impl LiveSource {
    pub fn new(config: &BrokerConfig, session: Arc<SessionManager>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client: http_client(),
            base_url: trim_base(&config.base_url),
            api_key: config.api_key.clone().unwrap_or_default(),
            session,
            clock,
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Response, SourceError> {
        let token = self
            .session
            .access_token()
            .await
            .map_err(|e| SourceError::Session(e.to_string()))?;

        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("X-Kite-Version", API_VERSION)
            .header("Authorization", format!("token {}:{}", self.api_key, token))
            .query(query)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::FORBIDDEN {
            // Token revoked or expired upstream; next call mints a fresh one.
            self.session.invalidate().await;
            return Err(SourceError::Session("access token rejected".to_string()));
        }
        if !response.status().is_success() {
            return Err(SourceError::Api(response.status().to_string()));
        }
        Ok(response)
    }

    async fn raw_quotes(&self, keys: &[String]) -> Result<HashMap<String, BrokerQuote>, SourceError> {
        let query: Vec<(&str, String)> = keys.iter().map(|k| ("i", k.clone())).collect();
        let envelope: Envelope<HashMap<String, BrokerQuote>> = self
            .get("/quote", &query)
            .await?
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;

        if envelope.status != "success" {
            return Err(SourceError::Api(
                envelope.message.unwrap_or_else(|| envelope.status.clone()),
            ));
        }
        Ok(envelope.data.unwrap_or_default())
    }
}

fn instrument_key(symbol: &str) -> String {
    if symbol.contains(':') {
        symbol.to_string()
    } else {
        format!("{}:{}", DEFAULT_EXCHANGE, symbol)
    }
}

fn day_change(quote: &BrokerQuote) -> (f64, f64) {
    let change = quote
        .net_change
        .filter(|c| *c != 0.0)
        .unwrap_or(quote.last_price - quote.ohlc.close);
    let pct = if quote.ohlc.close > 0.0 {
        change / quote.ohlc.close * 100.0
    } else {
        0.0
    };
    (change, pct)
}

/// Broker quote time in epoch millis, or `fallback` when absent or unreadable.
fn parse_timestamp(raw: Option<&str>, fallback: i64) -> i64 {
    raw.and_then(|s| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
        // Broker timestamps are exchange-local (IST).
        .map(|dt| (dt - chrono::Duration::minutes(330)).and_utc().timestamp_millis())
        .unwrap_or(fallback)
}

/// One row of the instruments dump. Columns not named here are ignored.
#[derive(Debug, Deserialize)]
struct InstrumentRow {
    instrument_token: String,
    tradingsymbol: String,
    name: String,
    #[serde(default)]
    last_price: Option<f64>,
    #[serde(default)]
    instrument_type: Option<String>,
    exchange: String,
}

/// Parse the instruments CSV dump, keeping equity rows.
///
/// Rows that do not deserialize are skipped, so a dump without the
/// expected columns yields nothing.
fn parse_instruments_csv(body: &str) -> Vec<Instrument> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(body.as_bytes());

    let mut instruments = Vec::new();
    for result in reader.deserialize::<InstrumentRow>() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                debug!("Skipping instrument row: {}", e);
                continue;
            }
        };
        if row.instrument_type.as_deref().is_some_and(|t| t != "EQ") {
            continue;
        }
        instruments.push(Instrument {
            token: row.instrument_token,
            symbol: row.tradingsymbol,
            name: row.name,
            last_price: row.last_price.unwrap_or(0.0),
            exchange: row.exchange,
        });
    }
    instruments
}

#[async_trait]
impl MarketSource for LiveSource {
    fn name(&self) -> &'static str {
        "broker"
    }

    fn tag(&self) -> DataSource {
        DataSource::Live
    }

    async fn instruments(&self, exchange: Option<&str>) -> Result<Vec<Instrument>, SourceError> {
        let exchange = exchange.unwrap_or(DEFAULT_EXCHANGE).to_uppercase();
        let body = self
            .get(&format!("/instruments/{}", exchange), &[])
            .await?
            .text()
            .await?;

        let instruments = parse_instruments_csv(&body);
        if instruments.is_empty() {
            return Err(SourceError::NoData(format!("instruments for {}", exchange)));
        }
        debug!("Fetched {} instruments for {}", instruments.len(), exchange);
        Ok(instruments)
    }

    async fn quotes(&self, symbols: &[String]) -> Result<HashMap<String, Quote>, SourceError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<String> = symbols.iter().map(|s| instrument_key(s)).collect();
        let raw = self.raw_quotes(&keys).await?;
        let now = self.clock.now().timestamp_millis();

        let mut quotes = HashMap::new();
        for (symbol, key) in symbols.iter().zip(keys.iter()) {
            let Some(q) = raw.get(key) else {
                warn!("Broker returned no quote for {}", symbol);
                continue;
            };
            let (change, pct) = day_change(q);
            quotes.insert(
                symbol.clone(),
                Quote {
                    symbol: symbol.clone(),
                    last_price: q.last_price,
                    day_change: change,
                    day_change_pct: pct,
                    volume: q.volume.unwrap_or(0),
                    ohlc: Ohlc {
                        open: q.ohlc.open,
                        high: q.ohlc.high,
                        low: q.ohlc.low,
                        close: q.ohlc.close,
                    },
                    timestamp: parse_timestamp(q.timestamp.as_deref(), now),
                    source: DataSource::Live,
                },
            );
        }
        Ok(quotes)
    }

    async fn indices(&self) -> Result<Vec<Index>, SourceError> {
        let keys: Vec<String> = INDICES.iter().map(|(name, _)| universe::index_key(name)).collect();
        let raw = self.raw_quotes(&keys).await?;

        let indices: Vec<Index> = INDICES
            .iter()
            .zip(keys.iter())
            .filter_map(|((name, _), key)| {
                let q = raw.get(key)?;
                let (change, pct) = day_change(q);
                Some(Index {
                    name: name.to_string(),
                    value: q.last_price,
                    change,
                    change_pct: pct,
                    source: DataSource::Live,
                })
            })
            .collect();

        if indices.len() < INDICES.len() {
            return Err(SourceError::NoData("one or more indices".to_string()));
        }
        Ok(indices)
    }

    async fn daily_close(&self, instrument: &Instrument, date: NaiveDate) -> Result<f64, SourceError> {
        let day = date.format("%Y-%m-%d").to_string();
        let envelope: Envelope<Candles> = self
            .get(
                &format!("/instruments/historical/{}/day", instrument.token),
                &[("from", day.clone()), ("to", day)],
            )
            .await?
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;

        // Candle layout: [timestamp, open, high, low, close, volume]
        envelope
            .data
            .and_then(|d| d.candles.last().and_then(|c| c.get(4)).and_then(|v| v.as_f64()))
            .ok_or_else(|| SourceError::NoData(format!("close for {} on {}", instrument.symbol, date)))
    }
}
