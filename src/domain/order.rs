use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type, wire codes follow the gateway convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "MKT")]
    Market,
    #[serde(rename = "LMT")]
    Limit,
    #[serde(rename = "STP")]
    Stop,
    #[serde(rename = "STP_LMT")]
    StopLimit,
}

/// Order status as reported by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingSubmit,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    ApiCancelled,
    Rejected,
}

impl OrderStatus {
    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::ApiCancelled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Map a raw gateway status string; unknown statuses are left to the
    /// transport boundary to report as protocol warnings
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PendingSubmit" => Some(OrderStatus::PendingSubmit),
            "Submitted" => Some(OrderStatus::Submitted),
            "PartiallyFilled" => Some(OrderStatus::PartiallyFilled),
            "Filled" => Some(OrderStatus::Filled),
            "Cancelled" => Some(OrderStatus::Cancelled),
            "ApiCancelled" => Some(OrderStatus::ApiCancelled),
            "Rejected" => Some(OrderStatus::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingSubmit => "PendingSubmit",
            OrderStatus::Submitted => "Submitted",
            OrderStatus::PartiallyFilled => "PartiallyFilled",
            OrderStatus::Filled => "Filled",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::ApiCancelled => "ApiCancelled",
            OrderStatus::Rejected => "Rejected",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order placement request, validated locally before any network call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub account: Option<String>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            stop_price: None,
            account: None,
        }
    }

    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            limit_price: Some(limit_price),
            stop_price: None,
            account: None,
        }
    }

    /// Reject bad requests locally before they reach the wire
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.trim().is_empty() {
            return Err("order symbol must not be empty".to_string());
        }
        if self.quantity <= Decimal::ZERO {
            return Err("order quantity must be positive".to_string());
        }
        match self.order_type {
            OrderType::Limit | OrderType::StopLimit if self.limit_price.is_none() => {
                return Err("limit price required for limit orders".to_string());
            }
            _ => {}
        }
        match self.order_type {
            OrderType::Stop | OrderType::StopLimit if self.stop_price.is_none() => {
                return Err("stop price required for stop orders".to_string());
            }
            _ => {}
        }
        if let Some(price) = self.limit_price {
            if price <= Decimal::ZERO {
                return Err("limit price must be positive".to_string());
            }
        }
        if let Some(price) = self.stop_price {
            if price <= Decimal::ZERO {
                return Err("stop price must be positive".to_string());
            }
        }
        Ok(())
    }
}

/// Order record tracked by the store, keyed by the numeric gateway order id.
/// Pushes carry the whole record; every update is a full replace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl Order {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.trim().is_empty() {
            return Err(format!("order {} carries empty symbol", self.order_id));
        }
        if self.filled < Decimal::ZERO || self.remaining < Decimal::ZERO {
            return Err(format!(
                "order {} carries negative fill quantities",
                self.order_id
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_terminal_set() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::ApiCancelled.is_terminal());

        assert!(OrderStatus::PendingSubmit.is_active());
        assert!(OrderStatus::Submitted.is_active());
        assert!(OrderStatus::PartiallyFilled.is_active());
        assert!(OrderStatus::Rejected.is_active());
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            OrderStatus::PendingSubmit,
            OrderStatus::Submitted,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::ApiCancelled,
            OrderStatus::Rejected,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("Inactive"), None);
    }

    #[test]
    fn test_request_validation() {
        let req = OrderRequest::market("AAPL", OrderSide::Buy, dec!(10));
        assert!(req.validate().is_ok());

        let req = OrderRequest::market("", OrderSide::Buy, dec!(10));
        assert!(req.validate().is_err());

        let req = OrderRequest::market("AAPL", OrderSide::Buy, dec!(0));
        assert!(req.validate().is_err());

        // Limit order without a limit price
        let mut req = OrderRequest::limit("AAPL", OrderSide::Sell, dec!(5), dec!(150));
        assert!(req.validate().is_ok());
        req.limit_price = None;
        assert!(req.validate().is_err());

        // Stop order without a stop price
        let mut req = OrderRequest::market("AAPL", OrderSide::Sell, dec!(5));
        req.order_type = OrderType::Stop;
        assert!(req.validate().is_err());
        req.stop_price = Some(dec!(140));
        assert!(req.validate().is_ok());
    }
}
