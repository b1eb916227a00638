use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection status state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No connection, no retry in progress
    Disconnected,
    /// Handshake in flight
    Connecting,
    /// Authenticated and receiving pushes
    Connected,
    /// Lost connection, backoff retries in progress
    Reconnecting,
    /// Fatal failure or retries exhausted; waits for user action
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Error => "error",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: ConnectionStatus) -> bool {
        use ConnectionStatus::*;

        match (self, target) {
            // Explicit or automatic connect attempt
            (Disconnected, Connecting) => true,
            (Error, Connecting) => true,

            // Handshake outcome
            (Connecting, Connected) => true,
            (Connecting, Reconnecting) => true, // transient failure, backoff

            // Lost a live connection
            (Connected, Reconnecting) => true,

            // Backoff retry outcome
            (Reconnecting, Connected) => true,

            // Fatal failure from any state
            (_, Error) => true,

            // Disconnect is always honored locally
            (_, Disconnected) => true,

            // All other transitions are invalid
            _ => false,
        }
    }

    /// A new connect call is only legal from these states
    pub fn may_start_connect(&self) -> bool {
        matches!(self, ConnectionStatus::Disconnected | ConnectionStatus::Error)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Quality of the live data feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataQuality {
    Good,
    /// Gateway flagged the feed as delayed; never derived locally
    Delayed,
    /// No heartbeat within the staleness window
    Stale,
    /// Not connected
    Unavailable,
}

impl DataQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataQuality::Good => "good",
            DataQuality::Delayed => "delayed",
            DataQuality::Stale => "stale",
            DataQuality::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for DataQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health metrics for the live connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionHealth {
    pub data_quality: DataQuality,
    pub reconnect_attempts: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub connection_duration_ms: i64,
}

/// Read model for the single live connection session. Owned exclusively by
/// the session machine; mutated only through state transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSession {
    pub status: ConnectionStatus,
    pub attempts: u32,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub health: Option<ConnectionHealth>,
}

impl ConnectionSession {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            attempts: 0,
            last_connected_at: None,
            last_error: None,
            health: None,
        }
    }
}

impl Default for ConnectionSession {
    fn default() -> Self {
        Self::new()
    }
}

/// State transition event (for logging/debugging)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: ConnectionStatus,
    pub to: ConnectionStatus,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl StateTransition {
    pub fn new(from: ConnectionStatus, to: ConnectionStatus, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Connection credentials, supplied fresh for every connect.
///
/// Deliberately not serializable: credentials never reach the persisted
/// session record or any wire frame except the auth handshake fields.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub account: Option<String>,
    pub client_id: i64,
}
