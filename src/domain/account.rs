use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::OrderSide;

/// Positions are keyed by account + symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub account: String,
    pub symbol: String,
}

impl std::fmt::Display for PositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.account, self.symbol)
    }
}

/// Trading position. Pushes arrive complete, so an update for an existing
/// key replaces the whole record, no partial merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub account: String,
    pub symbol: String,
    /// Signed quantity, negative for short positions
    pub quantity: Decimal,
    pub average_cost: Decimal,
    pub market_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
}

impl Position {
    pub fn key(&self) -> PositionKey {
        PositionKey {
            account: self.account.clone(),
            symbol: self.symbol.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.account.trim().is_empty() || self.symbol.trim().is_empty() {
            return Err("position push with empty account or symbol".to_string());
        }
        Ok(())
    }
}

/// Account summary, one record at a time, full replace on each push
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account_id: String,
    pub cash_value: Decimal,
    pub total_value: Decimal,
    pub buying_power: Decimal,
    pub margin_used: Decimal,
    pub net_liquidation: Decimal,
    /// Prior-day equity used for the day-change calculation
    pub previous_day_equity: Option<Decimal>,
    pub currency: String,
}

/// Execution report, kept in a newest-first ring buffer of 100
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub exec_id: String,
    pub order_id: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionReport {
    pub fn validate(&self) -> Result<(), String> {
        if self.exec_id.trim().is_empty() {
            return Err("execution report with empty exec id".to_string());
        }
        if self.symbol.trim().is_empty() {
            return Err(format!("execution {} carries empty symbol", self.exec_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(account: &str, symbol: &str, quantity: Decimal) -> Position {
        Position {
            account: account.to_string(),
            symbol: symbol.to_string(),
            quantity,
            average_cost: dec!(100),
            market_price: dec!(105),
            market_value: quantity * dec!(105),
            unrealized_pnl: dec!(0),
            realized_pnl: dec!(0),
        }
    }

    #[test]
    fn test_position_key_identity() {
        let a = position("DU123", "AAPL", dec!(10));
        let b = position("DU123", "AAPL", dec!(-5));
        let c = position("DU999", "AAPL", dec!(10));

        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_position_validation() {
        assert!(position("DU123", "AAPL", dec!(1)).validate().is_ok());
        assert!(position("", "AAPL", dec!(1)).validate().is_err());
        assert!(position("DU123", " ", dec!(1)).validate().is_err());
    }
}
