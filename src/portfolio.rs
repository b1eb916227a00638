//! Portfolio aggregation.
//!
//! Pure compute-on-read over point-in-time snapshots of positions, market
//! data, and the account summary. Nothing here is cached; callers
//! recompute whenever they need current numbers.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

use crate::domain::{AccountSummary, MarketDataSnapshot, Position, PositionKey};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub total_value: Decimal,
    pub cash_value: Decimal,
    /// Gross market exposure, sum of absolute position values
    pub stock_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub day_change: Decimal,
    pub day_change_percent: Decimal,
}

/// Price used for valuation: live snapshot price when one exists for the
/// symbol, otherwise the price the position push carried
fn valuation_price(
    position: &Position,
    snapshots: &HashMap<String, MarketDataSnapshot>,
) -> Decimal {
    snapshots
        .get(&position.symbol)
        .and_then(MarketDataSnapshot::current_price)
        .unwrap_or(position.market_price)
}

/// Aggregate the portfolio from the current state. Safe on empty inputs;
/// an absent account summary yields zero cash and a zero day change.
pub fn compute_portfolio(
    positions: &HashMap<PositionKey, Position>,
    snapshots: &HashMap<String, MarketDataSnapshot>,
    account: Option<&AccountSummary>,
) -> PortfolioSummary {
    let mut stock_value = Decimal::ZERO;
    let mut net_position_value = Decimal::ZERO;
    let mut unrealized_pnl = Decimal::ZERO;
    let mut realized_pnl = Decimal::ZERO;

    for position in positions.values() {
        let price = valuation_price(position, snapshots);
        let value = position.quantity * price;
        net_position_value += value;
        stock_value += value.abs();
        unrealized_pnl += position.quantity * (price - position.average_cost);
        realized_pnl += position.realized_pnl;
    }

    let cash_value = account.map(|a| a.cash_value).unwrap_or(Decimal::ZERO);
    let total_value = cash_value + net_position_value;

    let (day_change, day_change_percent) = match account.and_then(|a| a.previous_day_equity) {
        Some(prev) if !prev.is_zero() => {
            let change = total_value - prev;
            (change, change / prev * Decimal::ONE_HUNDRED)
        }
        _ => (Decimal::ZERO, Decimal::ZERO),
    };

    PortfolioSummary {
        total_value,
        cash_value,
        stock_value,
        unrealized_pnl,
        realized_pnl,
        day_change,
        day_change_percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MarketDataField;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn position(symbol: &str, quantity: Decimal, avg_cost: Decimal, mark: Decimal) -> Position {
        Position {
            account: "DU123".to_string(),
            symbol: symbol.to_string(),
            quantity,
            average_cost: avg_cost,
            market_price: mark,
            market_value: quantity * mark,
            unrealized_pnl: quantity * (mark - avg_cost),
            realized_pnl: dec!(0),
        }
    }

    fn account(cash: Decimal, prev_equity: Option<Decimal>) -> AccountSummary {
        AccountSummary {
            account_id: "DU123".to_string(),
            cash_value: cash,
            total_value: cash,
            buying_power: cash * dec!(4),
            margin_used: dec!(0),
            net_liquidation: cash,
            previous_day_equity: prev_equity,
            currency: "USD".to_string(),
        }
    }

    fn snapshot(symbol: &str, last: Decimal) -> MarketDataSnapshot {
        let mut snap = MarketDataSnapshot::new(symbol);
        snap.apply(MarketDataField::Last, last, Utc::now());
        snap
    }

    #[test]
    fn test_empty_inputs_are_safe() {
        let summary = compute_portfolio(&HashMap::new(), &HashMap::new(), None);
        assert_eq!(summary.total_value, dec!(0));
        assert_eq!(summary.stock_value, dec!(0));
        assert_eq!(summary.day_change_percent, dec!(0));
    }

    #[test]
    fn test_live_price_preferred_over_position_mark() {
        let mut positions = HashMap::new();
        let p = position("AAPL", dec!(10), dec!(140), dec!(145));
        positions.insert(p.key(), p);

        let mut snapshots = HashMap::new();
        snapshots.insert("AAPL".to_string(), snapshot("AAPL", dec!(150)));

        let summary = compute_portfolio(&positions, &snapshots, Some(&account(dec!(1000), None)));
        // 10 × 150 live, not 10 × 145 from the stale mark
        assert_eq!(summary.stock_value, dec!(1500));
        assert_eq!(summary.total_value, dec!(2500));
        assert_eq!(summary.unrealized_pnl, dec!(100));
    }

    #[test]
    fn test_position_mark_fallback_without_snapshot() {
        let mut positions = HashMap::new();
        let p = position("MSFT", dec!(5), dec!(390), dec!(400));
        positions.insert(p.key(), p);

        let summary = compute_portfolio(&positions, &HashMap::new(), None);
        assert_eq!(summary.stock_value, dec!(2000));
        assert_eq!(summary.unrealized_pnl, dec!(50));
    }

    #[test]
    fn test_short_positions_count_gross_and_net() {
        let mut positions = HashMap::new();
        let long = position("AAPL", dec!(10), dec!(100), dec!(100));
        let short = position("MSFT", dec!(-5), dec!(200), dec!(200));
        positions.insert(long.key(), long);
        positions.insert(short.key(), short);

        let summary = compute_portfolio(&positions, &HashMap::new(), Some(&account(dec!(0), None)));
        // Gross exposure adds magnitudes, net subtracts the short
        assert_eq!(summary.stock_value, dec!(2000));
        assert_eq!(summary.total_value, dec!(0));
    }

    #[test]
    fn test_day_change_against_previous_equity() {
        let mut positions = HashMap::new();
        let p = position("AAPL", dec!(10), dec!(100), dec!(110));
        positions.insert(p.key(), p);

        let acct = account(dec!(900), Some(dec!(1900)));
        let summary = compute_portfolio(&positions, &HashMap::new(), Some(&acct));

        // total = 900 + 1100 = 2000, prev = 1900
        assert_eq!(summary.day_change, dec!(100));
        assert_eq!(
            summary.day_change_percent.round_dp(4),
            dec!(5.2632)
        );
    }

    #[test]
    fn test_zero_previous_equity_yields_zero_change() {
        let summary = compute_portfolio(
            &HashMap::new(),
            &HashMap::new(),
            Some(&account(dec!(100), Some(dec!(0)))),
        );
        assert_eq!(summary.day_change, dec!(0));
        assert_eq!(summary.day_change_percent, dec!(0));
    }
}
