//! Session state machine.
//!
//! Exclusively owns the [`ConnectionSession`]; status only ever changes
//! through [`SessionMachine::transition`], which enforces the transition
//! table. Also owns the reconnect backoff policy and heartbeat bookkeeping.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::ReconnectConfig;
use crate::domain::{
    ConnectionHealth, ConnectionSession, ConnectionStatus, DataQuality, StateTransition,
};
use crate::error::{BrokerError, Result};

/// Exponential backoff with jitter for transient connect failures
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fractional jitter, e.g. 0.2 for ±20 %
    pub jitter_pct: f64,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_pct: config.jitter_pct,
            max_attempts: config.max_attempts,
        }
    }

    /// Delay before the given attempt (1-based): base × 2^(n−1), capped,
    /// with ± jitter applied
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let raw = self.base_delay.as_millis() as f64 * 2f64.powi(exponent as i32);
        let capped = raw.min(self.max_delay.as_millis() as f64);

        let jitter = if self.jitter_pct > 0.0 {
            let unit: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
            1.0 + self.jitter_pct * unit
        } else {
            1.0
        };

        Duration::from_millis((capped * jitter).max(0.0) as u64)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_pct: 0.2,
            max_attempts: 5,
        }
    }
}

/// Owns the single live connection session and drives its transitions
pub struct SessionMachine {
    session: ConnectionSession,
    policy: ReconnectPolicy,
    heartbeat_timeout: Duration,
}

impl SessionMachine {
    pub fn new(policy: ReconnectPolicy, heartbeat_timeout: Duration) -> Self {
        Self {
            session: ConnectionSession::new(),
            policy,
            heartbeat_timeout,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.session.status
    }

    pub fn attempts(&self) -> u32 {
        self.session.attempts
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Read model for the UI layer, with the connection duration refreshed
    pub fn session(&self) -> ConnectionSession {
        let mut session = self.session.clone();
        if let (Some(health), Some(connected_at)) =
            (session.health.as_mut(), session.last_connected_at)
        {
            if session.status.is_connected() {
                health.connection_duration_ms = (Utc::now() - connected_at).num_milliseconds();
            }
        }
        session
    }

    /// The only mutation path for the connection status. Transitioning to
    /// the current status is a no-op so repeated transport notifications
    /// stay idempotent.
    pub fn transition(&mut self, to: ConnectionStatus, reason: impl Into<String>) -> Result<()> {
        let from = self.session.status;
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(BrokerError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let event = StateTransition::new(from, to, reason);
        info!(from = %event.from, to = %event.to, reason = %event.reason, "connection state transition");

        self.session.status = to;
        match to {
            ConnectionStatus::Connected => {
                let reconnect_attempts = self.session.attempts;
                self.session.attempts = 0;
                self.session.last_connected_at = Some(event.timestamp);
                self.session.last_error = None;
                self.session.health = Some(ConnectionHealth {
                    data_quality: DataQuality::Good,
                    reconnect_attempts,
                    last_heartbeat: Some(event.timestamp),
                    connection_duration_ms: 0,
                });
            }
            ConnectionStatus::Reconnecting => {
                if let Some(health) = self.session.health.as_mut() {
                    health.data_quality = DataQuality::Unavailable;
                }
            }
            ConnectionStatus::Disconnected | ConnectionStatus::Error => {
                if let Some(health) = self.session.health.as_mut() {
                    health.data_quality = DataQuality::Unavailable;
                }
            }
            // Entered only on a user-initiated connect, so the retry
            // budget starts over
            ConnectionStatus::Connecting => {
                self.session.attempts = 0;
            }
        }

        Ok(())
    }

    /// Record a failed connect attempt
    pub fn record_failure(&mut self, error: &BrokerError) {
        self.session.attempts += 1;
        self.session.last_error = Some(error.to_string());
        if let Some(health) = self.session.health.as_mut() {
            health.reconnect_attempts = self.session.attempts;
        }
        warn!(
            attempts = self.session.attempts,
            kind = error.kind(),
            "connect attempt failed: {error}"
        );
    }

    /// Record a non-fatal error surfaced to the user without a retry
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.session.last_error = Some(message.into());
    }

    /// Automatic retry applies to transient failures only, and only while
    /// attempts remain
    pub fn should_retry(&self, error: &BrokerError) -> bool {
        error.is_transient() && self.session.attempts < self.policy.max_attempts
    }

    /// Backoff delay before the next attempt
    pub fn next_delay(&self) -> Duration {
        self.policy.delay_for(self.session.attempts.max(1))
    }

    /// Health bookkeeping: every heartbeat or push refreshes the feed
    pub fn record_heartbeat(&mut self, timestamp: DateTime<Utc>) {
        if let Some(health) = self.session.health.as_mut() {
            health.last_heartbeat = Some(timestamp);
            if health.data_quality == DataQuality::Stale {
                health.data_quality = DataQuality::Good;
            }
        }
    }

    /// Downgrade data quality when the heartbeat goes quiet. Called
    /// periodically; `Delayed` is gateway-flagged and never overridden here.
    pub fn evaluate_quality(&mut self, now: DateTime<Utc>) {
        let Some(health) = self.session.health.as_mut() else {
            return;
        };

        if !self.session.status.is_connected() {
            health.data_quality = DataQuality::Unavailable;
            return;
        }

        let timeout = chrono::Duration::from_std(self.heartbeat_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(10));
        let quiet = match health.last_heartbeat {
            Some(last) => now - last > timeout,
            None => true,
        };

        if quiet && health.data_quality == DataQuality::Good {
            health.data_quality = DataQuality::Stale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> SessionMachine {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_pct: 0.0,
            max_attempts: 3,
        };
        SessionMachine::new(policy, Duration::from_secs(10))
    }

    #[test]
    fn test_connect_success_sequence() {
        let mut m = machine();
        assert_eq!(m.status(), ConnectionStatus::Disconnected);

        m.transition(ConnectionStatus::Connecting, "user connect")
            .expect("disconnected -> connecting");
        m.transition(ConnectionStatus::Connected, "handshake complete")
            .expect("connecting -> connected");

        let session = m.session();
        assert_eq!(session.status, ConnectionStatus::Connected);
        assert_eq!(session.attempts, 0);
        assert!(session.last_connected_at.is_some());
        assert_eq!(
            session.health.expect("health populated").data_quality,
            DataQuality::Good
        );
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut m = machine();
        let err = m
            .transition(ConnectionStatus::Connected, "skip handshake")
            .expect_err("disconnected -> connected is invalid");
        assert!(matches!(err, BrokerError::InvalidStateTransition { .. }));
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_same_state_transition_is_noop() {
        let mut m = machine();
        m.transition(ConnectionStatus::Disconnected, "repeated notification")
            .expect("no-op");
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_retry_policy_exhaustion() {
        let mut m = machine();
        let err = BrokerError::Network("timeout".to_string());

        m.transition(ConnectionStatus::Connecting, "user connect")
            .expect("connecting");
        m.transition(ConnectionStatus::Reconnecting, "transient failure")
            .expect("reconnecting");

        for _ in 0..3 {
            assert!(m.should_retry(&err) || m.attempts() >= 3);
            m.record_failure(&err);
        }
        assert_eq!(m.attempts(), 3);
        assert!(!m.should_retry(&err));

        m.transition(ConnectionStatus::Error, "retries exhausted")
            .expect("reconnecting -> error");
        assert_eq!(m.status(), ConnectionStatus::Error);
    }

    #[test]
    fn test_fresh_connect_restores_retry_budget() {
        let mut m = machine();
        let err = BrokerError::Network("timeout".to_string());

        m.transition(ConnectionStatus::Connecting, "user connect")
            .expect("connecting");
        m.transition(ConnectionStatus::Reconnecting, "transient failure")
            .expect("reconnecting");
        for _ in 0..3 {
            m.record_failure(&err);
        }
        assert!(!m.should_retry(&err));
        m.transition(ConnectionStatus::Error, "retries exhausted")
            .expect("error");

        // A new user connect starts with a full retry budget
        m.transition(ConnectionStatus::Connecting, "user connect")
            .expect("error -> connecting");
        assert_eq!(m.attempts(), 0);
        assert!(m.should_retry(&err));
    }

    #[test]
    fn test_fatal_error_never_retried() {
        let mut m = machine();
        let err = BrokerError::Auth("bad token".to_string());
        assert!(!m.should_retry(&err));
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_pct: 0.0,
            max_attempts: 10,
        };

        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(6), Duration::from_secs(30)); // capped
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
            jitter_pct: 0.2,
            max_attempts: 5,
        };

        for _ in 0..50 {
            let delay = policy.delay_for(1).as_millis() as f64;
            assert!((8_000.0..=12_000.0).contains(&delay), "delay {delay}");
        }
    }

    #[test]
    fn test_heartbeat_staleness() {
        let mut m = machine();
        m.transition(ConnectionStatus::Connecting, "connect")
            .expect("connecting");
        m.transition(ConnectionStatus::Connected, "connected")
            .expect("connected");

        // Fresh heartbeat keeps quality good
        m.record_heartbeat(Utc::now());
        m.evaluate_quality(Utc::now());
        assert_eq!(
            m.session().health.expect("health").data_quality,
            DataQuality::Good
        );

        // Quiet feed past the window downgrades to stale
        m.evaluate_quality(Utc::now() + chrono::Duration::seconds(11));
        assert_eq!(
            m.session().health.expect("health").data_quality,
            DataQuality::Stale
        );

        // A new heartbeat recovers
        m.record_heartbeat(Utc::now());
        m.evaluate_quality(Utc::now());
        assert_eq!(
            m.session().health.expect("health").data_quality,
            DataQuality::Good
        );
    }

    #[test]
    fn test_quality_unavailable_when_disconnected() {
        let mut m = machine();
        m.transition(ConnectionStatus::Connecting, "connect")
            .expect("connecting");
        m.transition(ConnectionStatus::Connected, "connected")
            .expect("connected");
        m.transition(ConnectionStatus::Disconnected, "user disconnect")
            .expect("disconnected");

        m.evaluate_quality(Utc::now());
        assert_eq!(
            m.session().health.expect("health").data_quality,
            DataQuality::Unavailable
        );
    }
}
