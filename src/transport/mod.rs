//! Transport layer: the single persistent push-channel connection to the
//! brokerage gateway.
//!
//! The wire protocol is opaque behind [`wire`]; consumers see typed push
//! events in strict arrival order plus request/response calls on the
//! [`Gateway`] trait.

pub mod gateway;
pub mod wire;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::{
    AccountSummary, ConnectionStatus, Credentials, ExecutionReport, MarketDataField,
    MarketDataUpdate, Order, OrderRequest, Position,
};
use crate::error::Result;

pub use gateway::GatewayClient;

/// Handle for one market-data subscription; symbols may be shared across
/// subscriptions, the id is the unit of lifecycle
pub type SubscriptionId = Uuid;

/// Typed push event delivered over the broadcast channel, one per gateway
/// push, in arrival order. Handlers must be idempotent and must never call
/// back into the transport synchronously.
#[derive(Debug, Clone)]
pub enum PushEvent {
    MarketData(MarketDataUpdate),
    Order(Order),
    Position(Position),
    Account(AccountSummary),
    Execution(ExecutionReport),
    Status(ConnectionStatus),
    Heartbeat(DateTime<Utc>),
    Error { kind: &'static str, message: String },
}

/// Request/response and push surface of the gateway connection.
///
/// The concrete implementation is [`GatewayClient`]; tests substitute a mock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Open the connection and authenticate. Resolves with the gateway
    /// session id once the transport reports connected; fails fast with
    /// `InvalidState` if a connection is already live.
    async fn connect(&self, credentials: Credentials, token: String) -> Result<String>;

    /// Tear down the connection. Always succeeds from the caller's
    /// perspective and is idempotent.
    async fn disconnect(&self) -> Result<()>;

    async fn subscribe_market_data(
        &self,
        symbols: Vec<String>,
        fields: Option<Vec<MarketDataField>>,
    ) -> Result<SubscriptionId>;

    async fn unsubscribe_market_data(&self, id: SubscriptionId) -> Result<()>;

    async fn place_order(&self, request: OrderRequest) -> Result<Order>;

    /// Fire-and-forget remote cancel; local order state must not be pruned
    /// until a corresponding push confirms it
    async fn cancel_order(&self, order_id: u64) -> Result<()>;

    /// One-shot refresh, independent of the push stream
    async fn fetch_positions(&self) -> Result<Vec<Position>>;

    /// One-shot refresh, independent of the push stream
    async fn fetch_account_summary(&self) -> Result<AccountSummary>;

    /// New receiver on the push-event channel
    fn subscribe_events(&self) -> broadcast::Receiver<PushEvent>;
}
