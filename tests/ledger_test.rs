//! Portfolio ledger tests
//!
//! Tests cover:
//! - Buy constraints (cash, concentration, lock)
//! - Top-pick multipliers and bonus math
//! - Balance invariant across mixed operations

use contest_engine::services::{LedgerError, PortfolioLedger};
use contest_engine::types::*;

const EPS: f64 = 1e-6;

fn ledger() -> PortfolioLedger {
    PortfolioLedger::new(Portfolio::new(
        "contest-1".to_string(),
        "user-1".to_string(),
        1_000_000.0,
        1_709_517_600_000,
    ))
}

fn assert_balanced(ledger: &PortfolioLedger) {
    let p = ledger.portfolio();
    let held: f64 = p
        .holdings
        .values()
        .map(|h| h.quantity * h.current_price)
        .sum();
    assert!(
        (p.total_value - (p.cash + held)).abs() < EPS,
        "total {} != cash {} + held {}",
        p.total_value,
        p.cash,
        held
    );
}

fn assert_within_cap(ledger: &PortfolioLedger) {
    let cap = ledger.portfolio().initial_value * MAX_SINGLE_STOCK_PCT / 100.0;
    for holding in ledger.portfolio().holdings.values() {
        assert!(holding.cost_basis() <= cap + EPS);
    }
}

/// Buys reprice the holding at the trade price, so straight after one the
/// position value itself must sit under the cap.
fn assert_value_within_cap(ledger: &PortfolioLedger, symbol: &str) {
    let cap = ledger.portfolio().initial_value * MAX_SINGLE_STOCK_PCT / 100.0;
    assert!(ledger.portfolio().holdings[symbol].value <= cap + EPS);
}

// =============================================================================
// Scenarios
// =============================================================================

mod scenario_tests {
    use super::*;

    #[test]
    fn test_reliance_buy_is_accepted() {
        let mut ledger = ledger();
        ledger.buy("RELIANCE", 100.0, 2_780.45).unwrap();

        let p = ledger.portfolio();
        assert!((p.cash - 721_955.0).abs() < EPS);
        let reliance = &p.holdings["RELIANCE"];
        assert!((reliance.value - 278_045.0).abs() < EPS);
        assert!((reliance.weightage - 27.8045).abs() < EPS);
        assert_balanced(&ledger);
    }

    #[test]
    fn test_reliance_top_up_past_cap_is_rejected() {
        let mut ledger = ledger();
        ledger.buy("RELIANCE", 100.0, 2_780.45).unwrap();
        let before = ledger.record();

        let result = ledger.buy("RELIANCE", 8.0, 2_780.45);
        assert!(matches!(
            result,
            Err(LedgerError::ConcentrationLimitExceeded { .. })
        ));
        assert_eq!(ledger.record(), before);
    }

    #[test]
    fn test_five_x_bonus() {
        let mut ledger = ledger();
        ledger.buy("HDFCBANK", 50.0, 1_600.0).unwrap();
        ledger.set_top_picks(Some("HDFCBANK"), None, None).unwrap();
        ledger.apply_price_update("HDFCBANK", 1_618.72, 18.72, 1.17);

        let holding = &ledger.portfolio().holdings["HDFCBANK"];
        assert_eq!(holding.multiplier, Some(MultiplierTier::Five));
        assert!((holding.multiplier_bonus - 0.0585).abs() < 1e-9);
        assert!((ledger.snapshot().multiplier_bonus - 0.0585).abs() < 1e-9);
    }
}

// =============================================================================
// Top picks
// =============================================================================

mod top_pick_tests {
    use super::*;

    fn stocked() -> PortfolioLedger {
        let mut ledger = ledger();
        ledger.buy("TCS", 10.0, 3_900.0).unwrap();
        ledger.buy("INFY", 20.0, 1_500.0).unwrap();
        ledger.buy("ITC", 100.0, 440.0).unwrap();
        ledger
    }

    #[test]
    fn test_tiers_assigned_in_order() {
        let mut ledger = stocked();
        ledger
            .set_top_picks(Some("TCS"), Some("INFY"), Some("ITC"))
            .unwrap();

        let mut tagged = ledger.tagged();
        tagged.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            tagged,
            vec![
                ("INFY".to_string(), MultiplierTier::Three),
                ("ITC".to_string(), MultiplierTier::Two),
                ("TCS".to_string(), MultiplierTier::Five),
            ]
        );
    }

    #[test]
    fn test_repicking_clears_previous_tags() {
        let mut ledger = stocked();
        ledger
            .set_top_picks(Some("TCS"), Some("INFY"), Some("ITC"))
            .unwrap();
        ledger.set_top_picks(Some("ITC"), None, None).unwrap();

        assert_eq!(
            ledger.tagged(),
            vec![("ITC".to_string(), MultiplierTier::Five)]
        );
    }

    #[test]
    fn test_unheld_pick_rejected() {
        let mut ledger = stocked();
        let before = ledger.record();

        let err = ledger
            .set_top_picks(Some("TCS"), Some("WIPRO"), None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidPick(_)));
        assert_eq!(ledger.record(), before);
    }

    #[test]
    fn test_duplicate_pick_rejected() {
        let mut ledger = stocked();
        let err = ledger
            .set_top_picks(Some("TCS"), None, Some("TCS"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidPick(_)));
        assert!(ledger.tagged().is_empty());
    }

    #[test]
    fn test_bonus_tracks_latest_day_move() {
        let mut ledger = stocked();
        ledger
            .set_top_picks(Some("TCS"), Some("INFY"), None)
            .unwrap();

        ledger.apply_price_update("TCS", 3_939.0, 39.0, 1.0);
        ledger.apply_price_update("INFY", 1_470.0, -30.0, -2.0);
        // 1.0 * 0.05 + (-2.0) * 0.03
        assert!((ledger.portfolio().total_multiplier_bonus - (-0.01)).abs() < 1e-9);

        ledger.apply_price_update("TCS", 3_978.0, 78.0, 2.0);
        assert!((ledger.portfolio().total_multiplier_bonus - 0.04).abs() < 1e-9);
    }
}

// =============================================================================
// Invariants
// =============================================================================

mod invariant_tests {
    use super::*;

    fn check(ledger: &PortfolioLedger) {
        assert_balanced(ledger);
        assert_within_cap(ledger);
        assert!(ledger.tagged().len() <= 3);
    }

    #[test]
    fn test_balance_holds_across_mixed_operations() {
        let mut ledger = ledger();

        ledger.buy("TCS", 20.0, 3_900.0).unwrap();
        check(&ledger);
        ledger.apply_price_update("TCS", 3_950.0, 50.0, 1.28);
        check(&ledger);
        assert!(ledger.buy("TCS", 100.0, 3_950.0).is_err());
        check(&ledger);
        ledger.buy("SBIN", 300.0, 765.15).unwrap();
        check(&ledger);
        ledger.set_top_picks(Some("SBIN"), Some("TCS"), None).unwrap();
        check(&ledger);
        ledger.apply_price_update("SBIN", 770.0, 4.85, 0.63);
        check(&ledger);
        ledger.apply_price_update("UNHELD", 10.0, 1.0, 10.0);
        check(&ledger);
        assert!(ledger.buy("SBIN", 1_000.0, 770.0).is_err());
        check(&ledger);
    }

    #[test]
    fn test_buy_above_last_tick_cannot_breach_cap() {
        let mut ledger = ledger();
        ledger.buy("TCS", 100.0, 1_000.0).unwrap();
        check(&ledger);
        let before = ledger.record();

        let result = ledger.buy("TCS", 60.0, 2_000.0);
        assert!(matches!(
            result,
            Err(LedgerError::ConcentrationLimitExceeded { .. })
        ));
        assert_eq!(ledger.record(), before);
        check(&ledger);

        ledger.buy("TCS", 50.0, 2_000.0).unwrap();
        assert_value_within_cap(&ledger, "TCS");
    }

    #[test]
    fn test_buy_below_last_tick_uses_trade_price() {
        let mut ledger = ledger();
        ledger.buy("TCS", 100.0, 2_500.0).unwrap();
        ledger.apply_price_update("TCS", 2_900.0, 400.0, 16.0);

        // Holding is worth 290,000 at the last tick, but 100 shares at
        // 2,500 plus 20 more comes to 300,000 at the trade price.
        ledger.buy("TCS", 20.0, 2_500.0).unwrap();
        let holding = &ledger.portfolio().holdings["TCS"];
        assert!((holding.value - 300_000.0).abs() < EPS);
        check(&ledger);
    }

    #[test]
    fn test_exact_cap_is_allowed() {
        let mut ledger = ledger();
        ledger.buy("TCS", 75.0, 4_000.0).unwrap();
        assert!((ledger.portfolio().holdings["TCS"].weightage - 30.0).abs() < EPS);
        assert!(ledger.buy("TCS", 1.0, 4_000.0).is_err());
    }

    #[test]
    fn test_locked_ledger_rejects_mutations_but_tracks_prices() {
        let mut ledger = ledger();
        ledger.buy("TCS", 10.0, 4_000.0).unwrap();
        ledger.lock();

        assert_eq!(ledger.buy("TCS", 1.0, 4_000.0), Err(LedgerError::Locked));
        assert_eq!(
            ledger.set_top_picks(Some("TCS"), None, None),
            Err(LedgerError::Locked)
        );
        assert!(ledger.apply_price_update("TCS", 4_100.0, 100.0, 2.5));
        assert!((ledger.portfolio().total_value - 1_001_000.0).abs() < EPS);
    }

    #[test]
    fn test_unheld_price_update_is_noop() {
        let mut ledger = ledger();
        let before = ledger.record();
        assert!(!ledger.apply_price_update("TCS", 4_000.0, 10.0, 0.25));
        assert_eq!(ledger.record(), before);
    }

    #[test]
    fn test_snapshot_is_pure() {
        let mut ledger = ledger();
        ledger.buy("TCS", 10.0, 4_000.0).unwrap();
        ledger.apply_price_update("TCS", 4_400.0, 400.0, 10.0);

        let first = ledger.snapshot();
        let second = ledger.snapshot();
        assert_eq!(first, second);
        assert!((first.profit - 4_000.0).abs() < EPS);
        assert!((first.profit_pct - 0.4).abs() < EPS);
    }

    #[test]
    fn test_restored_record_recomputes_derived_fields() {
        let mut ledger = ledger();
        ledger.buy("TCS", 10.0, 4_000.0).unwrap();
        let mut record = ledger.record();
        record.total_value = 0.0;
        record.holdings.get_mut("TCS").unwrap().value = 0.0;

        let restored = PortfolioLedger::from_record(record);
        assert_balanced(&restored);
        assert!((restored.portfolio().holdings["TCS"].value - 40_000.0).abs() < EPS);
    }
}
