//! Broker client: ties the transport, session machine, store, and
//! persisted session together.
//!
//! A background event pump drains the transport's push channel into the
//! store reducers and the session health bookkeeping. All request paths
//! go through here so connection-state rules are enforced in one place.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::domain::{
    AccountSummary, ConnectionSession, ConnectionStatus, Credentials, MarketDataField, Order,
    OrderRequest, Position,
};
use crate::error::{BrokerError, Result};
use crate::portfolio::{self, PortfolioSummary};
use crate::session::{PersistedSessionRecord, ReconnectPolicy, Resume, SessionMachine, SessionStore};
use crate::store::DomainStore;
use crate::transport::{Gateway, PushEvent, SubscriptionId};

/// How often the pump re-evaluates feed staleness
const QUALITY_TICK_SECS: u64 = 1;

pub struct BrokerClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    gateway: Arc<dyn Gateway>,
    store: DomainStore,
    machine: Mutex<SessionMachine>,
    session_store: SessionStore,
    auto_reconnect: AtomicBool,
    /// Held in memory only, for automatic reconnects. Never persisted.
    credentials: Mutex<Option<(Credentials, String)>>,
}

impl BrokerClient {
    /// Build the client and start its event pump. Must be called from
    /// within a tokio runtime.
    pub fn new(gateway: Arc<dyn Gateway>, config: &AppConfig) -> Self {
        let machine = SessionMachine::new(
            ReconnectPolicy::from_config(&config.reconnect),
            Duration::from_millis(config.gateway.heartbeat_timeout_ms),
        );

        let inner = Arc::new(ClientInner {
            gateway,
            store: DomainStore::new(),
            machine: Mutex::new(machine),
            session_store: SessionStore::new(&config.session),
            auto_reconnect: AtomicBool::new(config.session.auto_reconnect),
            credentials: Mutex::new(None),
        });

        spawn_event_pump(Arc::clone(&inner));
        Self { inner }
    }

    // --- connection lifecycle ---

    /// Connect and authenticate. On a transient failure this keeps
    /// retrying with backoff until connected or retries are exhausted, so
    /// the returned result is the final outcome.
    pub async fn connect(&self, credentials: Credentials, token: String) -> Result<()> {
        let status = self.inner.with_machine(|m| m.status());
        if !status.may_start_connect() {
            return Err(BrokerError::InvalidState(format!(
                "connect is not allowed while {status}"
            )));
        }

        self.inner
            .with_machine(|m| m.transition(ConnectionStatus::Connecting, "user connect"))?;
        self.inner
            .set_credentials(Some((credentials.clone(), token.clone())));

        match self.inner.gateway.connect(credentials, token).await {
            Ok(session_id) => {
                self.inner.with_machine(|m| {
                    m.transition(ConnectionStatus::Connected, "handshake complete")
                })?;
                self.inner.persist_connected(&session_id);
                Ok(())
            }
            Err(e) => {
                let retry = self.inner.with_machine(|m| {
                    m.record_failure(&e);
                    m.should_retry(&e)
                });

                if retry {
                    self.inner.with_machine(|m| {
                        m.transition(ConnectionStatus::Reconnecting, "initial connect failed")
                    })?;
                    self.inner.reconnect_loop().await
                } else {
                    let _ = self
                        .inner
                        .with_machine(|m| m.transition(ConnectionStatus::Error, "connect failed"));
                    Err(e)
                }
            }
        }
    }

    /// User-initiated disconnect. Always honored locally: state goes to
    /// disconnected and in-memory credentials are dropped even if the
    /// transport teardown reports a problem. The persisted record is left
    /// untouched so a later startup judges freshness from the last
    /// successful connect.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner
            .with_machine(|m| m.transition(ConnectionStatus::Disconnected, "user disconnect"))?;
        self.inner.set_credentials(None);
        self.inner.gateway.disconnect().await
    }

    /// Apply the persisted-session policy at startup. A fresh record with
    /// auto-reconnect on connects immediately when credentials were
    /// supplied; without credentials it downgrades to a resume-available
    /// signal so the caller can prompt instead.
    pub async fn startup_resume(
        &self,
        credentials: Option<(Credentials, String)>,
    ) -> Result<Resume> {
        match self.inner.session_store.resume_decision(Utc::now()) {
            Resume::AutoConnect(record) => match credentials {
                Some((creds, token)) => {
                    info!(session_id = %record.session_id, "auto-resuming persisted session");
                    self.connect(creds, token).await?;
                    Ok(Resume::AutoConnect(record))
                }
                None => {
                    debug!("resumable session found but no credentials supplied");
                    Ok(Resume::Available(record))
                }
            },
            decision => Ok(decision),
        }
    }

    pub fn set_auto_reconnect(&self, enabled: bool) -> Result<()> {
        self.inner.auto_reconnect.store(enabled, Ordering::Relaxed);
        self.inner.session_store.set_auto_reconnect(enabled)
    }

    /// Forget the persisted session record
    pub fn clear_session(&self) -> Result<()> {
        self.inner.session_store.clear()
    }

    // --- request surface ---

    pub async fn subscribe_market_data(
        &self,
        symbols: Vec<String>,
        fields: Option<Vec<MarketDataField>>,
    ) -> Result<SubscriptionId> {
        self.require_connected()?;
        self.inner.gateway.subscribe_market_data(symbols, fields).await
    }

    pub async fn unsubscribe_market_data(&self, id: SubscriptionId) -> Result<()> {
        self.require_connected()?;
        self.inner.gateway.unsubscribe_market_data(id).await
    }

    /// Validate locally, submit, and record the acknowledged order. Local
    /// state changes only after the gateway's response.
    pub async fn place_order(&self, request: OrderRequest) -> Result<Order> {
        request.validate().map_err(BrokerError::Validation)?;
        self.require_connected()?;

        let order = self.inner.gateway.place_order(request).await?;
        info!(order_id = order.order_id, symbol = %order.symbol, status = %order.status.as_str(), "order accepted");
        self.inner.store.handle_order_update(order.clone());
        Ok(order)
    }

    /// Request a cancel. The local order stays untouched until a push
    /// confirms the new status.
    pub async fn cancel_order(&self, order_id: u64) -> Result<()> {
        self.require_connected()?;

        let order = self
            .inner
            .store
            .order(order_id)
            .ok_or(BrokerError::OrderNotFound(order_id))?;
        if order.status.is_terminal() {
            return Err(BrokerError::Validation(format!(
                "order {order_id} is already {}",
                order.status.as_str()
            )));
        }

        self.inner.gateway.cancel_order(order_id).await
    }

    /// One-shot refresh of all positions, merged into the store
    pub async fn refresh_positions(&self) -> Result<Vec<Position>> {
        self.require_connected()?;
        let positions = self.inner.gateway.fetch_positions().await?;
        for position in &positions {
            self.inner.store.handle_position_update(position.clone());
        }
        Ok(positions)
    }

    /// One-shot refresh of the account summary, merged into the store
    pub async fn refresh_account(&self) -> Result<AccountSummary> {
        self.require_connected()?;
        let account = self.inner.gateway.fetch_account_summary().await?;
        self.inner.store.handle_account_update(account.clone());
        Ok(account)
    }

    // --- read model ---

    pub fn store(&self) -> &DomainStore {
        &self.inner.store
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.with_machine(|m| m.status())
    }

    pub fn session(&self) -> ConnectionSession {
        self.inner.with_machine(|m| m.session())
    }

    /// Aggregate portfolio over the current state; computed fresh on
    /// every call
    pub fn portfolio(&self) -> PortfolioSummary {
        let positions = self.inner.store.positions_map();
        let snapshots = self.inner.store.market_data_map();
        let account = self.inner.store.account_summary();
        portfolio::compute_portfolio(&positions, &snapshots, account.as_ref())
    }

    /// New receiver on the raw push-event channel, e.g. for a UI layer
    pub fn events(&self) -> broadcast::Receiver<PushEvent> {
        self.inner.gateway.subscribe_events()
    }

    fn require_connected(&self) -> Result<()> {
        let status = self.status();
        if status.is_connected() {
            Ok(())
        } else {
            Err(BrokerError::InvalidState(format!(
                "request requires a live connection, currently {status}"
            )))
        }
    }
}

impl ClientInner {
    fn with_machine<R>(&self, f: impl FnOnce(&mut SessionMachine) -> R) -> R {
        let mut guard = self.machine.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    fn set_credentials(&self, value: Option<(Credentials, String)>) {
        let mut guard = self.credentials.lock().unwrap_or_else(|e| e.into_inner());
        *guard = value;
    }

    fn credentials(&self) -> Option<(Credentials, String)> {
        self.credentials
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn persist_connected(&self, session_id: &str) {
        let record = PersistedSessionRecord {
            session_id: session_id.to_string(),
            last_connection_time: Utc::now(),
            connection_attempts: 0,
            auto_reconnect_enabled: self.auto_reconnect.load(Ordering::Relaxed),
        };
        if let Err(e) = self.session_store.save(&record) {
            warn!("failed to persist session record: {e}");
        }
    }

    /// Backoff retry loop. Runs until connected, retries are exhausted, or
    /// the user disconnects while we were waiting.
    async fn reconnect_loop(&self) -> Result<()> {
        loop {
            let delay = self.with_machine(|m| m.next_delay());
            debug!(delay_ms = delay.as_millis() as u64, "waiting before reconnect attempt");
            tokio::time::sleep(delay).await;

            if self.with_machine(|m| m.status()) != ConnectionStatus::Reconnecting {
                return Ok(());
            }

            let Some((creds, token)) = self.credentials() else {
                let _ = self.with_machine(|m| {
                    m.transition(ConnectionStatus::Disconnected, "no credentials for reconnect")
                });
                return Err(BrokerError::InvalidState(
                    "reconnect without credentials".to_string(),
                ));
            };

            match self.gateway.connect(creds, token).await {
                Ok(session_id) => {
                    self.with_machine(|m| {
                        m.transition(ConnectionStatus::Connected, "reconnected")
                    })?;
                    self.persist_connected(&session_id);
                    return Ok(());
                }
                Err(e) => {
                    let give_up = self.with_machine(|m| {
                        m.record_failure(&e);
                        !m.should_retry(&e)
                    });
                    if give_up {
                        let _ = self.with_machine(|m| {
                            m.transition(ConnectionStatus::Error, "reconnect attempts exhausted")
                        });
                        error!("giving up on reconnect: {e}");
                        return Err(e);
                    }
                }
            }
        }
    }

    /// The transport reported a dropped connection. Reconnect in the
    /// background when allowed, otherwise settle in disconnected.
    fn on_transport_drop(self: &Arc<Self>) {
        let auto = self.auto_reconnect.load(Ordering::Relaxed) && self.credentials().is_some();

        let reconnecting = self.with_machine(|m| {
            if m.status() != ConnectionStatus::Connected {
                // Not our drop to handle: either the user disconnected or
                // a retry loop already owns the session
                return false;
            }
            let (target, reason) = if auto {
                (ConnectionStatus::Reconnecting, "connection dropped")
            } else {
                (ConnectionStatus::Disconnected, "connection dropped, auto-reconnect off")
            };
            if let Err(e) = m.transition(target, reason) {
                warn!("drop handling transition failed: {e}");
                return false;
            }
            target == ConnectionStatus::Reconnecting
        });

        if reconnecting {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                let _ = inner.reconnect_loop().await;
            });
        }
    }

    /// Apply one push event. Reducers are synchronous and this never calls
    /// back into the transport directly.
    fn handle_event(self: &Arc<Self>, event: PushEvent) {
        match event {
            PushEvent::MarketData(update) => {
                self.with_machine(|m| m.record_heartbeat(update.timestamp));
                self.store.handle_market_data(&update);
            }
            PushEvent::Order(order) => {
                self.with_machine(|m| m.record_heartbeat(Utc::now()));
                self.store.handle_order_update(order);
            }
            PushEvent::Position(position) => {
                self.with_machine(|m| m.record_heartbeat(Utc::now()));
                self.store.handle_position_update(position);
            }
            PushEvent::Account(account) => {
                self.with_machine(|m| m.record_heartbeat(Utc::now()));
                self.store.handle_account_update(account);
            }
            PushEvent::Execution(report) => {
                self.with_machine(|m| m.record_heartbeat(Utc::now()));
                self.store.handle_execution(report);
            }
            PushEvent::Heartbeat(timestamp) => {
                self.with_machine(|m| m.record_heartbeat(timestamp));
            }
            PushEvent::Status(ConnectionStatus::Disconnected) => self.on_transport_drop(),
            PushEvent::Status(status) => {
                debug!(status = %status, "transport status event");
            }
            PushEvent::Error { kind, message } => {
                warn!(kind, "gateway error event: {message}");
                self.with_machine(|m| m.record_error(message));
            }
        }
    }
}

fn spawn_event_pump(inner: Arc<ClientInner>) {
    let mut events = inner.gateway.subscribe_events();

    tokio::spawn(async move {
        let mut quality_tick = tokio::time::interval(Duration::from_secs(QUALITY_TICK_SECS));
        quality_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => inner.handle_event(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "event pump lagged, pushes were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = quality_tick.tick() => {
                    inner.with_machine(|m| m.evaluate_quality(Utc::now()));
                }
            }
        }
        debug!("event pump stopped, push channel closed");
    });
}
