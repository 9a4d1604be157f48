use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// No single holding may be bought past this share of the initial value.
pub const MAX_SINGLE_STOCK_PCT: f64 = 30.0;

/// Bonus tier assigned to a top pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MultiplierTier {
    #[serde(rename = "5X")]
    Five,
    #[serde(rename = "3X")]
    Three,
    #[serde(rename = "2X")]
    Two,
}

impl MultiplierTier {
    /// Weight applied to the day's percent change.
    pub fn weight(&self) -> f64 {
        match self {
            MultiplierTier::Five => 5.0,
            MultiplierTier::Three => 3.0,
            MultiplierTier::Two => 2.0,
        }
    }

    /// Bonus in percentage points for a given day move.
    ///
    /// The tier weight is divided by 100 before it is applied, so a 1% move
    /// on a 5X pick yields 0.05 points.
    pub fn bonus_for(&self, day_change_pct: f64) -> f64 {
        day_change_pct * (self.weight() / 100.0)
    }
}

/// The three symbols a participant backs with multipliers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopPicks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub third: Option<String>,
}

impl TopPicks {
    /// Picks paired with the tier each one earns.
    pub fn tiers(&self) -> Vec<(&str, MultiplierTier)> {
        [
            (self.first.as_deref(), MultiplierTier::Five),
            (self.second.as_deref(), MultiplierTier::Three),
            (self.third.as_deref(), MultiplierTier::Two),
        ]
        .into_iter()
        .filter_map(|(symbol, tier)| symbol.map(|s| (s, tier)))
        .collect()
    }
}

/// One symbol held in a portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub symbol: String,
    pub quantity: f64,
    pub avg_buy_price: f64,
    pub current_price: f64,
    pub value: f64,
    pub profit: f64,
    pub profit_pct: f64,
    pub weightage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<MultiplierTier>,
    pub multiplier_bonus: f64,
    /// Day change % from the most recent price update.
    #[serde(default)]
    pub day_change_pct: f64,
}

impl Holding {
    pub(crate) fn new(symbol: &str, quantity: f64, price: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            quantity,
            avg_buy_price: price,
            current_price: price,
            value: 0.0,
            profit: 0.0,
            profit_pct: 0.0,
            weightage: 0.0,
            multiplier: None,
            multiplier_bonus: 0.0,
            day_change_pct: 0.0,
        }
    }

    /// Amount paid for the current quantity.
    pub fn cost_basis(&self) -> f64 {
        self.quantity * self.avg_buy_price
    }

    /// Recompute every derived field from quantity, prices and tier.
    pub(crate) fn revalue(&mut self, initial_value: f64) {
        self.value = self.quantity * self.current_price;
        let cost = self.cost_basis();
        self.profit = self.value - cost;
        self.profit_pct = if cost > 0.0 { self.profit / cost * 100.0 } else { 0.0 };
        self.weightage = if initial_value > 0.0 {
            self.value / initial_value * 100.0
        } else {
            0.0
        };
        self.multiplier_bonus = self
            .multiplier
            .map(|tier| tier.bonus_for(self.day_change_pct))
            .unwrap_or(0.0);
    }
}

/// Serializable portfolio record.
///
/// Derived fields (`total_value`, holding values, bonuses) are recomputed by
/// the ledger on every mutation and when a record is restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub id: String,
    pub contest_id: String,
    pub user_id: String,
    pub cash: f64,
    pub initial_value: f64,
    pub total_value: f64,
    pub is_locked: bool,
    #[serde(default)]
    pub top_picks: TopPicks,
    #[serde(default)]
    pub holdings: BTreeMap<String, Holding>,
    #[serde(default)]
    pub total_multiplier_bonus: f64,
    /// Unix timestamp in milliseconds.
    pub created_at: i64,
    /// Unix timestamp in milliseconds of the last mutation or revaluation.
    pub last_update_time: i64,
}

impl Portfolio {
    /// Create an unlocked, all-cash portfolio. `created_at` is Unix milliseconds.
    pub fn new(contest_id: String, user_id: String, virtual_cash: f64, created_at: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            contest_id,
            user_id,
            cash: virtual_cash,
            initial_value: virtual_cash,
            total_value: virtual_cash,
            is_locked: false,
            top_picks: TopPicks::default(),
            holdings: BTreeMap::new(),
            total_multiplier_bonus: 0.0,
            created_at,
            last_update_time: created_at,
        }
    }

    /// Sum of all holding values.
    pub fn invested_value(&self) -> f64 {
        self.holdings.values().map(|h| h.value).sum()
    }
}

/// Point-in-time valuation of a portfolio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValuationSnapshot {
    pub value: f64,
    pub profit: f64,
    pub profit_pct: f64,
    pub multiplier_bonus: f64,
}

impl ValuationSnapshot {
    /// Score the leaderboard sorts on.
    pub fn total_return(&self) -> f64 {
        self.profit_pct + self.multiplier_bonus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_weights() {
        assert_eq!(MultiplierTier::Five.weight(), 5.0);
        assert_eq!(MultiplierTier::Three.weight(), 3.0);
        assert_eq!(MultiplierTier::Two.weight(), 2.0);
    }

    #[test]
    fn test_tier_bonus_scales_down() {
        let bonus = MultiplierTier::Five.bonus_for(1.17);
        assert!((bonus - 0.0585).abs() < 1e-12);

        let bonus = MultiplierTier::Two.bonus_for(-2.0);
        assert!((bonus + 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_tier_serialization() {
        assert_eq!(serde_json::to_string(&MultiplierTier::Five).unwrap(), "\"5X\"");
        assert_eq!(serde_json::to_string(&MultiplierTier::Three).unwrap(), "\"3X\"");
        assert_eq!(serde_json::to_string(&MultiplierTier::Two).unwrap(), "\"2X\"");
    }

    #[test]
    fn test_top_picks_tiers_skip_empty_slots() {
        let picks = TopPicks {
            first: Some("TCS".to_string()),
            second: None,
            third: Some("INFY".to_string()),
        };

        let tiers = picks.tiers();
        assert_eq!(tiers, vec![("TCS", MultiplierTier::Five), ("INFY", MultiplierTier::Two)]);
    }

    #[test]
    fn test_holding_revalue() {
        let mut holding = Holding::new("RELIANCE", 10.0, 100.0);
        holding.current_price = 110.0;
        holding.multiplier = Some(MultiplierTier::Three);
        holding.day_change_pct = 2.0;
        holding.revalue(10_000.0);

        assert_eq!(holding.value, 1_100.0);
        assert!((holding.profit - 100.0).abs() < 1e-9);
        assert!((holding.profit_pct - 10.0).abs() < 1e-9);
        assert!((holding.weightage - 11.0).abs() < 1e-9);
        assert!((holding.multiplier_bonus - 0.06).abs() < 1e-12);
    }

    #[test]
    fn test_new_portfolio_is_all_cash() {
        let portfolio = Portfolio::new(
            "contest-1".to_string(),
            "user-1".to_string(),
            1_000_000.0,
            1_709_517_600_000,
        );

        assert!(!portfolio.id.is_empty());
        assert_eq!(portfolio.cash, 1_000_000.0);
        assert_eq!(portfolio.total_value, 1_000_000.0);
        assert_eq!(portfolio.initial_value, 1_000_000.0);
        assert!(!portfolio.is_locked);
        assert!(portfolio.holdings.is_empty());
    }

    #[test]
    fn test_snapshot_total_return() {
        let snapshot = ValuationSnapshot {
            value: 1_010_000.0,
            profit: 10_000.0,
            profit_pct: 1.0,
            multiplier_bonus: 0.05,
        };
        assert!((snapshot.total_return() - 1.05).abs() < 1e-12);
    }
}
