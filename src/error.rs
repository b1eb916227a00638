use thiserror::Error;

/// Main error type for the brokerage sync core
#[derive(Error, Debug)]
pub enum BrokerError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Authentication errors (fatal, never auto-retried)
    #[error("Authentication rejected: {0}")]
    Auth(String),

    // Network errors (transient, drive the backoff reconnect path)
    #[error("Network error: {0}")]
    Network(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Request timeout: {0}")]
    Timeout(String),

    // Protocol errors (unexpected message shape; connection kept)
    #[error("Protocol error: {0}")]
    Protocol(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Local request validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Session state machine errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Order execution errors
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Order not found: {0}")]
    OrderNotFound(u64),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for BrokerError
pub type Result<T> = std::result::Result<T, BrokerError>;

impl BrokerError {
    /// Transient failures are retried with backoff by the session machine.
    /// Everything else surfaces as user-visible state without auto-retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::Network(_)
                | BrokerError::WebSocket(_)
                | BrokerError::Timeout(_)
                | BrokerError::Io(_)
        )
    }

    /// Short classification label used in logs and the status read model
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::Config(_) => "config",
            BrokerError::Auth(_) => "auth",
            BrokerError::Network(_) | BrokerError::WebSocket(_) | BrokerError::Timeout(_) => {
                "network"
            }
            BrokerError::Protocol(_) | BrokerError::Json(_) => "protocol",
            BrokerError::Validation(_) => "validation",
            BrokerError::InvalidState(_) | BrokerError::InvalidStateTransition { .. } => {
                "invalid_state"
            }
            BrokerError::OrderRejected(_) | BrokerError::OrderNotFound(_) => "order",
            BrokerError::Io(_) => "io",
            BrokerError::Internal(_) | BrokerError::Other(_) => "internal",
        }
    }
}
