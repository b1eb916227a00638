pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod portfolio;
pub mod session;
pub mod store;
pub mod transport;

pub use client::BrokerClient;
pub use config::AppConfig;
pub use domain::{
    AccountSummary, ConnectionHealth, ConnectionSession, ConnectionStatus, Credentials,
    DataQuality, ExecutionReport, MarketDataField, MarketDataSnapshot, MarketDataUpdate, Order,
    OrderRequest, OrderSide, OrderStatus, OrderType, Position, PositionKey,
};
pub use error::{BrokerError, Result};
pub use portfolio::{compute_portfolio, PortfolioSummary};
pub use session::{PersistedSessionRecord, ReconnectPolicy, Resume, SessionMachine, SessionStore};
pub use store::DomainStore;
pub use transport::{Gateway, GatewayClient, PushEvent, SubscriptionId};
