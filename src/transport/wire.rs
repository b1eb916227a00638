//! Wire messages for the gateway push channel.
//!
//! Every inbound payload is a tagged variant validated here, at the
//! transport boundary, before any reducer sees it. The framing and field
//! codes of the brokerage protocol itself stay opaque behind these shapes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{
    AccountSummary, ExecutionReport, MarketDataField, Order, OrderRequest, OrderSide, OrderStatus,
    OrderType, Position,
};

/// Messages sent from the client to the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth {
        token: String,
        client_id: i64,
    },
    Subscribe {
        request_id: u64,
        symbols: Vec<String>,
        fields: Vec<MarketDataField>,
    },
    Unsubscribe {
        request_id: u64,
        symbols: Vec<String>,
    },
    PlaceOrder {
        request_id: u64,
        order: OrderRequest,
    },
    CancelOrder {
        request_id: u64,
        order_id: u64,
    },
    FetchPositions {
        request_id: u64,
    },
    FetchAccount {
        request_id: u64,
    },
}

/// Order record as the gateway ships it; status arrives as a raw string
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireOrder {
    pub order_id: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    pub status: String,
    pub filled: Decimal,
    pub remaining: Decimal,
    #[serde(default)]
    pub avg_fill_price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl WireOrder {
    /// Convert to the domain order. Unknown statuses map to `Rejected` with
    /// a protocol warning, matching how the upstream adapter treats them.
    pub fn into_order(self) -> Order {
        let status = match OrderStatus::parse(&self.status) {
            Some(status) => status,
            None => {
                warn!(
                    order_id = self.order_id,
                    status = %self.status,
                    "unknown gateway order status, treating as Rejected"
                );
                OrderStatus::Rejected
            }
        };

        Order {
            order_id: self.order_id,
            symbol: self.symbol,
            side: self.side,
            order_type: self.order_type,
            quantity: self.quantity,
            limit_price: self.limit_price,
            stop_price: self.stop_price,
            status,
            filled: self.filled,
            remaining: self.remaining,
            avg_fill_price: self.avg_fill_price,
            timestamp: self.timestamp,
        }
    }
}

/// Messages pushed or returned by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    // Handshake
    AuthAck {
        session_id: String,
    },
    AuthReject {
        reason: String,
    },

    // Push stream
    Tick {
        symbol: String,
        field: MarketDataField,
        value: Decimal,
        timestamp: DateTime<Utc>,
    },
    OrderUpdate {
        order: WireOrder,
    },
    PositionUpdate {
        position: Position,
    },
    AccountUpdate {
        account: AccountSummary,
    },
    Execution {
        report: ExecutionReport,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },

    // Request/response correlation
    Ack {
        request_id: u64,
    },
    OrderAck {
        request_id: u64,
        order: WireOrder,
    },
    Positions {
        request_id: u64,
        positions: Vec<Position>,
    },
    Account {
        request_id: u64,
        account: AccountSummary,
    },
    Error {
        #[serde(default)]
        request_id: Option<u64>,
        #[serde(default)]
        code: Option<String>,
        message: String,
    },
}

impl GatewayMessage {
    /// Request id for response variants; push variants have none
    pub fn request_id(&self) -> Option<u64> {
        match self {
            GatewayMessage::Ack { request_id }
            | GatewayMessage::OrderAck { request_id, .. }
            | GatewayMessage::Positions { request_id, .. }
            | GatewayMessage::Account { request_id, .. } => Some(*request_id),
            GatewayMessage::Error { request_id, .. } => *request_id,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tick_round_trip() {
        let msg = GatewayMessage::Tick {
            symbol: "AAPL".to_string(),
            field: MarketDataField::Last,
            value: dec!(150.25),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&msg).expect("serialize");
        assert!(json.contains("\"type\":\"tick\""));
        assert!(json.contains("\"field\":\"last\""));

        let parsed: GatewayMessage = serde_json::from_str(&json).expect("deserialize");
        match parsed {
            GatewayMessage::Tick { symbol, value, .. } => {
                assert_eq!(symbol, "AAPL");
                assert_eq!(value, dec!(150.25));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_status_maps_to_rejected() {
        let wire = WireOrder {
            order_id: 7,
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: dec!(10),
            limit_price: None,
            stop_price: None,
            status: "Inactive".to_string(),
            filled: dec!(0),
            remaining: dec!(10),
            avg_fill_price: None,
            timestamp: Utc::now(),
        };

        assert_eq!(wire.into_order().status, OrderStatus::Rejected);
    }

    #[test]
    fn test_request_id_routing() {
        assert_eq!(GatewayMessage::Ack { request_id: 3 }.request_id(), Some(3));
        assert_eq!(
            GatewayMessage::Heartbeat {
                timestamp: Utc::now()
            }
            .request_id(),
            None
        );
        assert_eq!(
            GatewayMessage::Error {
                request_id: None,
                code: None,
                message: "boom".to_string()
            }
            .request_id(),
            None
        );
    }
}
