use crate::services::MarketHours;
use chrono::{NaiveDate, NaiveTime};
use std::env;

/// Broker credentials and endpoint.
#[derive(Debug, Clone, Default)]
pub struct BrokerConfig {
    /// Broker API key.
    pub api_key: Option<String>,
    /// Broker API secret.
    pub api_secret: Option<String>,
    /// One-time request token exchanged for an access token.
    pub request_token: Option<String>,
    /// REST base URL.
    pub base_url: String,
}

impl BrokerConfig {
    /// Whether a live upstream can be used at all.
    pub fn has_credentials(&self) -> bool {
        matches!(
            (&self.api_key, &self.api_secret),
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty()
        )
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// SQLite path for snapshots (None = in-memory).
    pub database_path: Option<String>,
    /// Broker settings for the live source.
    pub broker: BrokerConfig,
    /// Hours a minted session stays valid.
    pub session_validity_hours: i64,
    /// Tick interval while the live source is in use (seconds).
    pub live_tick_secs: u64,
    /// Tick interval for polling/simulated delivery (seconds).
    pub poll_tick_secs: u64,
    /// Phase scheduler interval (seconds).
    pub scheduler_interval_secs: u64,
    /// How often to check whether the EOD cache is stale (seconds).
    pub eod_check_secs: u64,
    /// Exchange trading hours.
    pub market_hours: MarketHours,
    /// Starting cash when a contest does not specify one.
    pub default_virtual_cash: f64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = MarketHours::default();

        let market_hours = MarketHours {
            open: parse_time("MARKET_OPEN").unwrap_or(defaults.open),
            close: parse_time("MARKET_CLOSE").unwrap_or(defaults.close),
            utc_offset_minutes: env::var("MARKET_UTC_OFFSET_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.utc_offset_minutes),
            // Format: "2024-01-26,2024-03-08"
            holidays: env::var("MARKET_HOLIDAYS")
                .ok()
                .map(|s| parse_holidays(&s))
                .unwrap_or_default(),
        };

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3001),
            database_path: env::var("DATABASE_PATH").ok(),
            broker: BrokerConfig {
                api_key: env::var("BROKER_API_KEY").ok(),
                api_secret: env::var("BROKER_API_SECRET").ok(),
                request_token: env::var("BROKER_REQUEST_TOKEN").ok(),
                base_url: env::var("BROKER_BASE_URL")
                    .unwrap_or_else(|_| "https://api.kite.trade".to_string()),
            },
            session_validity_hours: env::var("SESSION_VALIDITY_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24),
            live_tick_secs: env::var("LIVE_TICK_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            poll_tick_secs: env::var("POLL_TICK_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            scheduler_interval_secs: env::var("SCHEDULER_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            eod_check_secs: env::var("EOD_CHECK_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
            market_hours,
            default_virtual_cash: env::var("DEFAULT_VIRTUAL_CASH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1_000_000.0),
        }
    }

    /// Capability check for the live source.
    pub fn has_broker_credentials(&self) -> bool {
        self.broker.has_credentials()
    }

    /// Tick interval for the source that will actually be used.
    pub fn tick_interval_secs(&self) -> u64 {
        if self.has_broker_credentials() {
            self.live_tick_secs
        } else {
            self.poll_tick_secs
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn parse_time(key: &str) -> Option<NaiveTime> {
    env::var(key)
        .ok()
        .and_then(|v| NaiveTime::parse_from_str(&v, "%H:%M").ok())
}

fn parse_holidays(raw: &str) -> Vec<NaiveDate> {
    raw.split(',')
        .filter_map(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
        .collect()
}
