//! Portfolio Ledger
//!
//! Owns the cash and holdings of one contest portfolio:
//! - Buy orders checked against cash and the single-stock concentration cap
//! - Top-pick multiplier tiers (5X / 3X / 2X)
//! - Revaluation on price ticks, including the multiplier bonus
//!
//! Every mutation runs through one path that recomputes the derived fields,
//! so `total_value == cash + Σ holding.value` holds after each call. Rejected
//! operations leave the portfolio untouched.

use super::clock::{Clock, SystemClock};
use crate::types::{Holding, MultiplierTier, Portfolio, TopPicks, ValuationSnapshot, MAX_SINGLE_STOCK_PCT};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Ledger validation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("Portfolio is locked")]
    Locked,

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Insufficient funds: need {needed:.2}, have {available:.2}")]
    InsufficientFunds { needed: f64, available: f64 },

    #[error(
        "Concentration limit exceeded for {symbol}: current holding {current:.2}, \
         attempted addition {attempted:.2}, maximum additional allowed {max_additional:.2}"
    )]
    ConcentrationLimitExceeded {
        symbol: String,
        current: f64,
        attempted: f64,
        max_additional: f64,
    },

    #[error("Invalid pick: {0}")]
    InvalidPick(String),
}

/// Single-writer ledger around a [`Portfolio`] record.
#[derive(Clone)]
pub struct PortfolioLedger {
    portfolio: Portfolio,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for PortfolioLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortfolioLedger")
            .field("portfolio", &self.portfolio)
            .finish_non_exhaustive()
    }
}

impl PortfolioLedger {
    pub fn new(portfolio: Portfolio) -> Self {
        Self::from_record(portfolio)
    }

    /// Restore a ledger from a stored record, recomputing derived fields.
    pub fn from_record(portfolio: Portfolio) -> Self {
        let mut ledger = Self {
            portfolio,
            clock: Arc::new(SystemClock),
        };
        let stamp = ledger.portfolio.last_update_time;
        ledger.recompute(stamp);
        ledger
    }

    /// Stamp mutations with `clock` instead of the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Read-only view of the portfolio.
    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    /// Serializable copy of the portfolio.
    pub fn record(&self) -> Portfolio {
        self.portfolio.clone()
    }

    pub fn is_locked(&self) -> bool {
        self.portfolio.is_locked
    }

    /// Largest value any one symbol may reach through buys.
    pub fn max_position_value(&self) -> f64 {
        self.portfolio.initial_value * MAX_SINGLE_STOCK_PCT / 100.0
    }

    /// Buy `quantity` of `symbol` at `price`.
    pub fn buy(&mut self, symbol: &str, quantity: f64, price: f64) -> Result<(), LedgerError> {
        if self.portfolio.is_locked {
            return Err(LedgerError::Locked);
        }
        if symbol.trim().is_empty() {
            return Err(LedgerError::InvalidOrder("symbol is empty".to_string()));
        }
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(LedgerError::InvalidOrder(format!(
                "quantity must be positive, got {}",
                quantity
            )));
        }
        if !(price.is_finite() && price > 0.0) {
            return Err(LedgerError::InvalidOrder(format!(
                "price must be positive, got {}",
                price
            )));
        }

        let cost = quantity * price;
        if self.portfolio.cash < cost {
            return Err(LedgerError::InsufficientFunds {
                needed: cost,
                available: self.portfolio.cash,
            });
        }

        // The merged holding is repriced at `price`, so the cap applies to
        // the whole resulting position at that price.
        let held_quantity = self
            .portfolio
            .holdings
            .get(symbol)
            .map(|h| h.quantity)
            .unwrap_or(0.0);
        let current = held_quantity * price;
        let max_value = self.max_position_value();
        if current + cost > max_value {
            return Err(LedgerError::ConcentrationLimitExceeded {
                symbol: symbol.to_string(),
                current,
                attempted: cost,
                max_additional: (max_value - current).max(0.0),
            });
        }

        self.portfolio.cash -= cost;
        match self.portfolio.holdings.get_mut(symbol) {
            Some(holding) => {
                let total_quantity = holding.quantity + quantity;
                holding.avg_buy_price =
                    (holding.cost_basis() + cost) / total_quantity;
                holding.quantity = total_quantity;
                holding.current_price = price;
            }
            None => {
                self.portfolio
                    .holdings
                    .insert(symbol.to_string(), Holding::new(symbol, quantity, price));
            }
        }

        self.recompute(self.now_ms());
        debug!(
            "Portfolio {} bought {} {} @ {:.2}, cash left {:.2}",
            self.portfolio.id, quantity, symbol, price, self.portfolio.cash
        );
        Ok(())
    }

    /// Assign 5X / 3X / 2X to up to three held, distinct symbols.
    pub fn set_top_picks(
        &mut self,
        first: Option<&str>,
        second: Option<&str>,
        third: Option<&str>,
    ) -> Result<(), LedgerError> {
        if self.portfolio.is_locked {
            return Err(LedgerError::Locked);
        }

        let picks = TopPicks {
            first: first.map(str::to_string),
            second: second.map(str::to_string),
            third: third.map(str::to_string),
        };

        let mut seen = HashSet::new();
        for (symbol, _) in picks.tiers() {
            if !self.portfolio.holdings.contains_key(symbol) {
                return Err(LedgerError::InvalidPick(format!("{} is not held", symbol)));
            }
            if !seen.insert(symbol) {
                return Err(LedgerError::InvalidPick(format!(
                    "{} picked more than once",
                    symbol
                )));
            }
        }

        for holding in self.portfolio.holdings.values_mut() {
            holding.multiplier = None;
        }
        for (symbol, tier) in picks.tiers() {
            if let Some(holding) = self.portfolio.holdings.get_mut(symbol) {
                holding.multiplier = Some(tier);
            }
        }
        self.portfolio.top_picks = picks;

        self.recompute(self.now_ms());
        Ok(())
    }

    /// Revalue a held symbol. Unheld symbols are ignored.
    ///
    /// Returns whether anything changed.
    pub fn apply_price_update(
        &mut self,
        symbol: &str,
        price: f64,
        day_change: f64,
        day_change_pct: f64,
    ) -> bool {
        if !(price.is_finite() && price > 0.0) {
            return false;
        }
        let Some(holding) = self.portfolio.holdings.get_mut(symbol) else {
            return false;
        };

        holding.current_price = price;
        holding.day_change_pct = if day_change_pct.is_finite() { day_change_pct } else { 0.0 };
        self.recompute(self.now_ms());

        debug!(
            "Portfolio {} revalued {} @ {:.2} ({:+.2}, {:+.2}%)",
            self.portfolio.id, symbol, price, day_change, day_change_pct
        );
        true
    }

    /// Lock the portfolio. Calling it again has no effect.
    pub fn lock(&mut self) {
        if !self.portfolio.is_locked {
            self.portfolio.is_locked = true;
            self.portfolio.last_update_time = self.now_ms();
        }
    }

    /// Restore starting cash, drop holdings and picks, unlock.
    pub fn reset(&mut self) {
        self.portfolio.cash = self.portfolio.initial_value;
        self.portfolio.holdings.clear();
        self.portfolio.top_picks = TopPicks::default();
        self.portfolio.is_locked = false;
        self.recompute(self.now_ms());
    }

    /// Current valuation.
    pub fn snapshot(&self) -> ValuationSnapshot {
        let value = self.portfolio.total_value;
        let profit = value - self.portfolio.initial_value;
        let profit_pct = if self.portfolio.initial_value > 0.0 {
            profit / self.portfolio.initial_value * 100.0
        } else {
            0.0
        };

        ValuationSnapshot {
            value,
            profit,
            profit_pct,
            multiplier_bonus: self.portfolio.total_multiplier_bonus,
        }
    }

    /// Symbols carrying a multiplier tier.
    pub fn tagged(&self) -> Vec<(String, MultiplierTier)> {
        self.portfolio
            .holdings
            .values()
            .filter_map(|h| h.multiplier.map(|tier| (h.symbol.clone(), tier)))
            .collect()
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn recompute(&mut self, stamp: i64) {
        let initial_value = self.portfolio.initial_value;
        for holding in self.portfolio.holdings.values_mut() {
            holding.revalue(initial_value);
        }
        self.portfolio.total_value = self.portfolio.cash + self.portfolio.invested_value();
        self.portfolio.total_multiplier_bonus = self
            .portfolio
            .holdings
            .values()
            .map(|h| h.multiplier_bonus)
            .sum();
        self.portfolio.last_update_time = stamp;
    }
}
