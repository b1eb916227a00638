//! WebSocket gateway client.
//!
//! Owns the single persistent connection: authenticate/connect handshake,
//! request/response correlation by request id, and fan-out of push messages
//! onto the broadcast channel in arrival order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::domain::{
    AccountSummary, ConnectionStatus, Credentials, MarketDataField, MarketDataUpdate, Order,
    OrderRequest, Position,
};
use crate::error::{BrokerError, Result};
use crate::transport::wire::{ClientMessage, GatewayMessage};
use crate::transport::{Gateway, PushEvent, SubscriptionId};

const EVENT_CHANNEL_CAPACITY: usize = 4096;
const CONNECT_TIMEOUT_SECS: u64 = 10;
const PING_INTERVAL_SECS: u64 = 15;

type PendingMap = HashMap<u64, oneshot::Sender<GatewayMessage>>;

/// Live connection state; dropped wholesale on disconnect
struct ConnectionHandle {
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    alive: Arc<AtomicBool>,
    session_id: String,
}

/// One market-data subscription; symbols multiplex onto shared upstream
/// streams via the interest counts
#[derive(Debug, Clone)]
struct SubscriptionEntry {
    symbols: Vec<String>,
    fields: Vec<MarketDataField>,
}

#[derive(Default)]
struct SubscriptionState {
    entries: HashMap<SubscriptionId, SubscriptionEntry>,
    /// Per-symbol interest count; one upstream stream per symbol
    interest: HashMap<String, usize>,
}

/// Gateway client over a WebSocket push channel
pub struct GatewayClient {
    ws_url: String,
    auth_timeout: Duration,
    request_timeout: Duration,
    events_tx: broadcast::Sender<PushEvent>,
    next_request_id: AtomicU64,
    pending: Arc<Mutex<PendingMap>>,
    conn: Mutex<Option<ConnectionHandle>>,
    subscriptions: Mutex<SubscriptionState>,
}

impl GatewayClient {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let url = Url::parse(&config.ws_url)
            .map_err(|e| BrokerError::Validation(format!("invalid gateway URL: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(BrokerError::Validation(format!(
                "gateway URL must be ws:// or wss://, got {}",
                url.scheme()
            )));
        }

        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            ws_url: config.ws_url.clone(),
            auth_timeout: Duration::from_millis(config.auth_timeout_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            events_tx,
            next_request_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            conn: Mutex::new(None),
            subscriptions: Mutex::new(SubscriptionState::default()),
        })
    }

    /// Send a request and await its correlated response
    async fn request<F>(&self, build: F) -> Result<GatewayMessage>
    where
        F: FnOnce(u64) -> ClientMessage,
    {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let conn = self.conn.lock().await;
            let handle = conn
                .as_ref()
                .filter(|h| h.alive.load(Ordering::SeqCst))
                .ok_or_else(|| BrokerError::InvalidState("transport not connected".to_string()))?;

            self.pending.lock().await.insert(request_id, tx);

            let message = build(request_id);
            let text = serde_json::to_string(&message)?;
            if handle.outbound.send(Message::Text(text)).is_err() {
                self.pending.lock().await.remove(&request_id);
                return Err(BrokerError::Network("connection closed".to_string()));
            }
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(BrokerError::Timeout(format!(
                    "no response for request {request_id}"
                )))
            }
            Ok(Err(_)) => Err(BrokerError::Network(
                "connection dropped while awaiting response".to_string(),
            )),
            Ok(Ok(GatewayMessage::Error { code, message, .. })) => {
                Err(map_gateway_error(code.as_deref(), message))
            }
            Ok(Ok(message)) => Ok(message),
        }
    }

    /// Route one inbound frame: responses to their pending request, pushes
    /// onto the broadcast channel. Malformed frames are protocol errors,
    /// surfaced but never fatal to the connection.
    async fn route_message(
        text: &str,
        pending: &Mutex<PendingMap>,
        events: &broadcast::Sender<PushEvent>,
    ) {
        let message: GatewayMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("unparseable gateway frame: {e}");
                let _ = events.send(PushEvent::Error {
                    kind: "protocol",
                    message: format!("unparseable gateway frame: {e}"),
                });
                return;
            }
        };

        if let Some(request_id) = message.request_id() {
            match pending.lock().await.remove(&request_id) {
                Some(tx) => {
                    let _ = tx.send(message);
                }
                None => {
                    debug!(request_id, "response for unknown or timed-out request");
                }
            }
            return;
        }

        let event = match message {
            GatewayMessage::Tick {
                symbol,
                field,
                value,
                timestamp,
            } => {
                let update = MarketDataUpdate {
                    symbol,
                    field,
                    value,
                    timestamp,
                };
                match update.validate() {
                    Ok(()) => PushEvent::MarketData(update),
                    Err(e) => {
                        warn!("dropping invalid tick: {e}");
                        PushEvent::Error {
                            kind: "protocol",
                            message: e,
                        }
                    }
                }
            }
            GatewayMessage::OrderUpdate { order } => {
                let order = order.into_order();
                match order.validate() {
                    Ok(()) => PushEvent::Order(order),
                    Err(e) => {
                        warn!("dropping invalid order update: {e}");
                        PushEvent::Error {
                            kind: "protocol",
                            message: e,
                        }
                    }
                }
            }
            GatewayMessage::PositionUpdate { position } => match position.validate() {
                Ok(()) => PushEvent::Position(position),
                Err(e) => {
                    warn!("dropping invalid position update: {e}");
                    PushEvent::Error {
                        kind: "protocol",
                        message: e,
                    }
                }
            },
            GatewayMessage::AccountUpdate { account } => PushEvent::Account(account),
            GatewayMessage::Execution { report } => match report.validate() {
                Ok(()) => PushEvent::Execution(report),
                Err(e) => {
                    warn!("dropping invalid execution report: {e}");
                    PushEvent::Error {
                        kind: "protocol",
                        message: e,
                    }
                }
            },
            GatewayMessage::Heartbeat { timestamp } => PushEvent::Heartbeat(timestamp),
            other => {
                warn!("unexpected gateway message outside handshake: {other:?}");
                PushEvent::Error {
                    kind: "protocol",
                    message: "unexpected gateway message outside handshake".to_string(),
                }
            }
        };

        let _ = events.send(event);
    }
}

#[async_trait]
impl Gateway for GatewayClient {
    async fn connect(&self, credentials: Credentials, token: String) -> Result<String> {
        let mut conn = self.conn.lock().await;

        if let Some(handle) = conn.as_ref() {
            if handle.alive.load(Ordering::SeqCst) {
                return Err(BrokerError::InvalidState(
                    "connect while a connection is already live".to_string(),
                ));
            }
            // Stale handle from a dropped socket; reap it before reconnecting
            if let Some(stale) = conn.take() {
                stale.reader.abort();
                stale.writer.abort();
            }
        }

        info!(url = %self.ws_url, username = %credentials.username, "connecting to gateway");

        let (ws_stream, _) = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            connect_async(self.ws_url.as_str()),
        )
        .await
        .map_err(|_| BrokerError::Network("gateway connection timeout".to_string()))?
        .map_err(|e| BrokerError::Network(format!("gateway connection failed: {e}")))?;

        let (mut write, mut read) = ws_stream.split();

        let auth = ClientMessage::Auth {
            token,
            client_id: credentials.client_id,
        };
        write
            .send(Message::Text(serde_json::to_string(&auth)?))
            .await
            .map_err(BrokerError::WebSocket)?;

        // Await the auth outcome before anything else is processed
        let session_id = tokio::time::timeout(self.auth_timeout, async {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<GatewayMessage>(&text) {
                            Ok(GatewayMessage::AuthAck { session_id }) => {
                                return Ok(session_id);
                            }
                            Ok(GatewayMessage::AuthReject { reason }) => {
                                return Err(BrokerError::Auth(reason));
                            }
                            Ok(_) => {
                                debug!("ignoring pre-auth gateway message");
                            }
                            Err(e) => {
                                warn!("unparseable pre-auth frame: {e}");
                            }
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(BrokerError::Network(format!("handshake failed: {e}")));
                    }
                    None => {
                        return Err(BrokerError::Network(
                            "gateway closed during handshake".to_string(),
                        ));
                    }
                }
            }
        })
        .await
        .map_err(|_| BrokerError::Timeout("authentication handshake".to_string()))??;

        info!(session_id = %session_id, "gateway handshake complete");

        let alive = Arc::new(AtomicBool::new(true));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            let mut ping = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
            loop {
                tokio::select! {
                    msg = out_rx.recv() => match msg {
                        Some(m) => {
                            if write.send(m).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    _ = ping.tick() => {
                        if write.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let pending = Arc::clone(&self.pending);
        let events = self.events_tx.clone();
        let reader_alive = Arc::clone(&alive);
        let pong_tx = out_tx.clone();

        let reader = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        Self::route_message(&text, &pending, &events).await;
                    }
                    Ok(Message::Ping(data)) => {
                        let _ = pong_tx.send(Message::Pong(data));
                    }
                    Ok(Message::Close(_)) => {
                        info!("gateway sent close frame");
                        break;
                    }
                    Err(e) => {
                        warn!("gateway stream error: {e}");
                        break;
                    }
                    _ => {}
                }
            }

            reader_alive.store(false, Ordering::SeqCst);
            pending.lock().await.clear();
            let _ = events.send(PushEvent::Status(ConnectionStatus::Disconnected));
        });

        *conn = Some(ConnectionHandle {
            outbound: out_tx,
            reader,
            writer,
            alive,
            session_id: session_id.clone(),
        });

        let _ = self
            .events_tx
            .send(PushEvent::Status(ConnectionStatus::Connected));

        Ok(session_id)
    }

    async fn disconnect(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;

        if let Some(handle) = conn.take() {
            info!(session_id = %handle.session_id, "disconnecting from gateway");
            handle.alive.store(false, Ordering::SeqCst);
            // Dropping the outbound sender lets the writer send a close frame;
            // the reader is torn down regardless of the remote handshake.
            drop(handle.outbound);
            handle.reader.abort();

            self.pending.lock().await.clear();
            let mut subs = self.subscriptions.lock().await;
            subs.entries.clear();
            subs.interest.clear();

            let _ = self
                .events_tx
                .send(PushEvent::Status(ConnectionStatus::Disconnected));
        }

        Ok(())
    }

    async fn subscribe_market_data(
        &self,
        symbols: Vec<String>,
        fields: Option<Vec<MarketDataField>>,
    ) -> Result<SubscriptionId> {
        if symbols.is_empty() {
            return Err(BrokerError::Validation(
                "subscription needs at least one symbol".to_string(),
            ));
        }
        if symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(BrokerError::Validation(
                "subscription symbols must not be empty".to_string(),
            ));
        }

        let fields = fields.unwrap_or_else(MarketDataField::default_set);
        let mut subs = self.subscriptions.lock().await;

        // Duplicate interest multiplexes onto the existing upstream stream;
        // only symbols without a live stream go on the wire
        let fresh: Vec<String> = symbols
            .iter()
            .filter(|s| subs.interest.get(*s).copied().unwrap_or(0) == 0)
            .cloned()
            .collect();

        if !fresh.is_empty() {
            let wire_fields = fields.clone();
            let wire_symbols = fresh.clone();
            match self
                .request(|request_id| ClientMessage::Subscribe {
                    request_id,
                    symbols: wire_symbols,
                    fields: wire_fields,
                })
                .await?
            {
                GatewayMessage::Ack { .. } => {}
                other => {
                    return Err(BrokerError::Protocol(format!(
                        "unexpected subscribe response: {other:?}"
                    )));
                }
            }
        }

        for symbol in &symbols {
            *subs.interest.entry(symbol.clone()).or_insert(0) += 1;
        }

        let id = Uuid::new_v4();
        subs.entries.insert(
            id,
            SubscriptionEntry {
                symbols: symbols.clone(),
                fields,
            },
        );

        debug!(subscription = %id, symbols = ?symbols, "market data subscription created");
        Ok(id)
    }

    async fn unsubscribe_market_data(&self, id: SubscriptionId) -> Result<()> {
        let mut subs = self.subscriptions.lock().await;

        let entry = subs
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| BrokerError::Validation(format!("unknown subscription id {id}")))?;

        // Symbols whose interest would drop to zero are released upstream;
        // local bookkeeping changes only after the gateway confirms
        let released: Vec<String> = entry
            .symbols
            .iter()
            .filter(|s| subs.interest.get(*s).copied().unwrap_or(0) == 1)
            .cloned()
            .collect();

        if !released.is_empty() {
            let wire_symbols = released.clone();
            match self
                .request(|request_id| ClientMessage::Unsubscribe {
                    request_id,
                    symbols: wire_symbols,
                })
                .await?
            {
                GatewayMessage::Ack { .. } => {}
                other => {
                    return Err(BrokerError::Protocol(format!(
                        "unexpected unsubscribe response: {other:?}"
                    )));
                }
            }
        }

        for symbol in &entry.symbols {
            if let Some(count) = subs.interest.get_mut(symbol) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    subs.interest.remove(symbol);
                }
            }
        }
        subs.entries.remove(&id);

        debug!(subscription = %id, "market data subscription cancelled");
        Ok(())
    }

    async fn place_order(&self, request: OrderRequest) -> Result<Order> {
        request.validate().map_err(BrokerError::Validation)?;

        match self
            .request(|request_id| ClientMessage::PlaceOrder {
                request_id,
                order: request,
            })
            .await?
        {
            GatewayMessage::OrderAck { order, .. } => Ok(order.into_order()),
            other => Err(BrokerError::Protocol(format!(
                "unexpected place-order response: {other:?}"
            ))),
        }
    }

    async fn cancel_order(&self, order_id: u64) -> Result<()> {
        match self
            .request(|request_id| ClientMessage::CancelOrder {
                request_id,
                order_id,
            })
            .await?
        {
            GatewayMessage::Ack { .. } => Ok(()),
            other => Err(BrokerError::Protocol(format!(
                "unexpected cancel response: {other:?}"
            ))),
        }
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>> {
        match self
            .request(|request_id| ClientMessage::FetchPositions { request_id })
            .await?
        {
            GatewayMessage::Positions { positions, .. } => Ok(positions),
            other => Err(BrokerError::Protocol(format!(
                "unexpected positions response: {other:?}"
            ))),
        }
    }

    async fn fetch_account_summary(&self) -> Result<AccountSummary> {
        match self
            .request(|request_id| ClientMessage::FetchAccount { request_id })
            .await?
        {
            GatewayMessage::Account { account, .. } => Ok(account),
            other => Err(BrokerError::Protocol(format!(
                "unexpected account response: {other:?}"
            ))),
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<PushEvent> {
        self.events_tx.subscribe()
    }
}

fn map_gateway_error(code: Option<&str>, message: String) -> BrokerError {
    match code {
        Some("auth") => BrokerError::Auth(message),
        Some("validation") => BrokerError::Validation(message),
        Some("order_rejected") => BrokerError::OrderRejected(message),
        Some("rate_limited") => BrokerError::Network(message),
        _ => BrokerError::Internal(format!("gateway error: {message}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn test_client() -> GatewayClient {
        GatewayClient::new(&GatewayConfig {
            ws_url: "wss://gateway.example.com/stream".to_string(),
            auth_timeout_ms: 5_000,
            request_timeout_ms: 5_000,
            heartbeat_timeout_ms: 10_000,
        })
        .expect("valid config")
    }

    #[test]
    fn test_rejects_non_ws_url() {
        let result = GatewayClient::new(&GatewayConfig {
            ws_url: "https://gateway.example.com".to_string(),
            auth_timeout_ms: 5_000,
            request_timeout_ms: 5_000,
            heartbeat_timeout_ms: 10_000,
        });
        assert!(matches!(result, Err(BrokerError::Validation(_))));
    }

    #[tokio::test]
    async fn test_request_fails_fast_when_disconnected() {
        let client = test_client();
        let err = client
            .place_order(OrderRequest::market(
                "AAPL",
                crate::domain::OrderSide::Buy,
                dec!(1),
            ))
            .await
            .expect_err("no connection");
        assert!(matches!(err, BrokerError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_subscribe_validates_symbols_locally() {
        let client = test_client();
        let err = client
            .subscribe_market_data(vec![], None)
            .await
            .expect_err("empty symbol list");
        assert!(matches!(err, BrokerError::Validation(_)));

        let err = client
            .subscribe_market_data(vec!["".to_string()], None)
            .await
            .expect_err("blank symbol");
        assert!(matches!(err, BrokerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_route_push_messages_in_order() {
        let pending: Mutex<PendingMap> = Mutex::new(HashMap::new());
        let (events, mut rx) = broadcast::channel(16);

        let tick = serde_json::to_string(&GatewayMessage::Tick {
            symbol: "AAPL".to_string(),
            field: MarketDataField::Last,
            value: dec!(150.25),
            timestamp: Utc::now(),
        })
        .expect("serialize");
        let heartbeat = serde_json::to_string(&GatewayMessage::Heartbeat {
            timestamp: Utc::now(),
        })
        .expect("serialize");

        GatewayClient::route_message(&tick, &pending, &events).await;
        GatewayClient::route_message(&heartbeat, &pending, &events).await;

        match rx.try_recv().expect("first event") {
            PushEvent::MarketData(update) => {
                assert_eq!(update.symbol, "AAPL");
                assert_eq!(update.value, dec!(150.25));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            rx.try_recv().expect("second event"),
            PushEvent::Heartbeat(_)
        ));
    }

    #[tokio::test]
    async fn test_malformed_frame_surfaces_protocol_error() {
        let pending: Mutex<PendingMap> = Mutex::new(HashMap::new());
        let (events, mut rx) = broadcast::channel(16);

        GatewayClient::route_message("{not json", &pending, &events).await;

        match rx.try_recv().expect("error event") {
            PushEvent::Error { kind, .. } => assert_eq!(kind, "protocol"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_response_routed_to_pending_request() {
        let pending: Mutex<PendingMap> = Mutex::new(HashMap::new());
        let (events, _rx) = broadcast::channel(16);
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(42, tx);

        let ack = serde_json::to_string(&GatewayMessage::Ack { request_id: 42 }).expect("ack");
        GatewayClient::route_message(&ack, &pending, &events).await;

        assert!(matches!(
            rx.await.expect("response delivered"),
            GatewayMessage::Ack { request_id: 42 }
        ));
        assert!(pending.lock().await.is_empty());
    }

    #[test]
    fn test_gateway_error_mapping() {
        assert!(matches!(
            map_gateway_error(Some("auth"), "bad token".to_string()),
            BrokerError::Auth(_)
        ));
        assert!(matches!(
            map_gateway_error(Some("order_rejected"), "margin".to_string()),
            BrokerError::OrderRejected(_)
        ));
        assert!(matches!(
            map_gateway_error(None, "boom".to_string()),
            BrokerError::Internal(_)
        ));
    }
}
