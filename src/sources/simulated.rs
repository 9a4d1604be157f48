//! Simulated market data.
//!
//! Each symbol drifts around a reference close with a bounded random walk on
//! its day change %. The walk never rests at exactly zero, so an open-market
//! quote always shows movement. Reference closes come from the built-in
//! universe until the gateway seeds them with cached EOD prices.

use super::universe::{self, INDICES};
use super::{MarketSource, SourceError};
use crate::services::{Clock, SystemClock};
use crate::types::{DataSource, Index, Instrument, Ohlc, Quote};
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Largest absolute day move the walk reaches (percent).
const MAX_DAY_MOVE_PCT: f64 = 5.0;
/// Largest step per quote (percent points).
const MAX_STEP_PCT: f64 = 0.35;
/// Smallest absolute day move reported while open (percent).
const MIN_DAY_MOVE_PCT: f64 = 0.01;

#[derive(Debug, Clone, Copy)]
struct WalkState {
    reference: f64,
    day_change_pct: f64,
    high: f64,
    low: f64,
    volume: u64,
}

/// Random-walk price generator.
pub struct SimulatedSource {
    rng: Mutex<StdRng>,
    walks: DashMap<String, WalkState>,
    index_walks: DashMap<String, WalkState>,
    clock: Arc<dyn Clock>,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic generator for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            walks: DashMap::new(),
            index_walks: DashMap::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp quotes with `clock` instead of the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Re-anchor a symbol on a new closing price and restart its day.
    pub fn set_reference(&self, symbol: &str, close: f64) {
        if !(close.is_finite() && close > 0.0) {
            return;
        }
        self.walks.insert(symbol.to_string(), WalkState::anchored(close));
    }

    /// Reference close for a symbol, inventing one for unknown symbols.
    pub fn reference_price(&self, symbol: &str) -> f64 {
        if let Some(state) = self.walks.get(symbol) {
            return state.reference;
        }
        universe::reference_price(symbol).unwrap_or_else(|| self.invent_reference(symbol))
    }

    /// Reference value for an index.
    pub fn index_reference(&self, name: &str) -> f64 {
        if let Some(state) = self.index_walks.get(name) {
            return state.reference;
        }
        universe::index_reference(name).unwrap_or(1_000.0)
    }

    /// Next simulated quote for `symbol`.
    pub fn quote(&self, symbol: &str) -> Quote {
        let reference = self.reference_price(symbol);
        let step = self.step();
        let volume_step = self.volume_step();

        let mut state = self
            .walks
            .entry(symbol.to_string())
            .or_insert_with(|| WalkState::anchored(reference));
        state.advance(step, volume_step);

        let last_price = state.price();
        Quote {
            symbol: symbol.to_string(),
            last_price,
            day_change: last_price - state.reference,
            day_change_pct: state.day_change_pct,
            volume: state.volume,
            ohlc: Ohlc {
                open: state.reference,
                high: state.high,
                low: state.low,
                close: state.reference,
            },
            timestamp: self.clock.now().timestamp_millis(),
            source: DataSource::Simulated,
        }
    }

    /// Next simulated value for every built-in index.
    pub fn index_values(&self) -> Vec<Index> {
        INDICES
            .iter()
            .map(|(name, _)| {
                let reference = self.index_reference(name);
                let step = self.step();
                let mut state = self
                    .index_walks
                    .entry(name.to_string())
                    .or_insert_with(|| WalkState::anchored(reference));
                state.advance(step, 0);

                let value = state.price();
                Index {
                    name: name.to_string(),
                    value,
                    change: value - state.reference,
                    change_pct: state.day_change_pct,
                    source: DataSource::Simulated,
                }
            })
            .collect()
    }

    fn step(&self) -> f64 {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(-MAX_STEP_PCT..=MAX_STEP_PCT),
            Err(poisoned) => poisoned.into_inner().gen_range(-MAX_STEP_PCT..=MAX_STEP_PCT),
        }
    }

    fn volume_step(&self) -> u64 {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(100..5_000),
            Err(poisoned) => poisoned.into_inner().gen_range(100..5_000),
        }
    }

    fn invent_reference(&self, symbol: &str) -> f64 {
        let reference = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(100.0..5_000.0),
            Err(poisoned) => poisoned.into_inner().gen_range(100.0..5_000.0),
        };
        let reference = (reference * 100.0_f64).round() / 100.0;
        self.walks
            .entry(symbol.to_string())
            .or_insert_with(|| WalkState::anchored(reference))
            .reference
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl WalkState {
    fn anchored(reference: f64) -> Self {
        Self {
            reference,
            day_change_pct: 0.0,
            high: reference,
            low: reference,
            volume: 0,
        }
    }

    fn price(&self) -> f64 {
        let raw = self.reference * (1.0 + self.day_change_pct / 100.0);
        (raw * 100.0).round() / 100.0
    }

    fn advance(&mut self, step: f64, volume: u64) {
        let mut pct = (self.day_change_pct + step).clamp(-MAX_DAY_MOVE_PCT, MAX_DAY_MOVE_PCT);
        if pct.abs() < MIN_DAY_MOVE_PCT {
            pct = if step < 0.0 { -MIN_DAY_MOVE_PCT } else { MIN_DAY_MOVE_PCT };
        }
        self.day_change_pct = pct;
        let price = self.price();
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.volume += volume;
    }
}

#[async_trait]
impl MarketSource for SimulatedSource {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn tag(&self) -> DataSource {
        DataSource::Simulated
    }

    async fn instruments(&self, exchange: Option<&str>) -> Result<Vec<Instrument>, SourceError> {
        Ok(universe::builtin_instruments(exchange))
    }

    async fn quotes(&self, symbols: &[String]) -> Result<HashMap<String, Quote>, SourceError> {
        Ok(symbols
            .iter()
            .map(|symbol| (symbol.clone(), self.quote(symbol)))
            .collect())
    }

    async fn indices(&self) -> Result<Vec<Index>, SourceError> {
        Ok(self.index_values())
    }

    async fn daily_close(&self, instrument: &Instrument, _date: NaiveDate) -> Result<f64, SourceError> {
        Ok(self.reference_price(&instrument.symbol))
    }
}
