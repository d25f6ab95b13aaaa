//! Upstream trade feed.
//!
//! The socket lives in its own task and only reports [`FeedEvent`]s over a
//! channel. [`FeedSession`] turns those events into [`FeedAction`]s without
//! touching I/O, and [`UpstreamFeedClient`] carries the actions out: opening
//! sockets, sending control frames, forwarding trades, scheduling reconnects.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

use crate::engine::filter::TickSink;
use crate::engine::types::Tick;
use crate::error::FeedError;
use crate::market_data::adapters::alpaca_types::{ControlMessage, InboundMessage, AUTHENTICATED_MSG};
use crate::market_data::stats_refresh::RefreshLoop;
use crate::market_data::subscriptions::SubscriptionManager;

const EVENT_QUEUE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedState {
    Disconnected,
    Connecting,
    Authenticating,
    Streaming,
}

impl std::fmt::Display for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedState::Disconnected => write!(f, "disconnected"),
            FeedState::Connecting => write!(f, "connecting"),
            FeedState::Authenticating => write!(f, "authenticating"),
            FeedState::Streaming => write!(f, "streaming"),
        }
    }
}

/// What the socket task reports. `generation` identifies the connection.
#[derive(Debug)]
pub enum FeedEvent {
    Opened { generation: u64 },
    Frame { generation: u64, text: String },
    Error { generation: u64, error: String },
    Closed { generation: u64, reason: String },
    ReconnectDue,
}

#[derive(Debug, PartialEq)]
pub enum FeedAction {
    Connect { generation: u64 },
    Send(ControlMessage),
    Streaming,
    Trade(Tick),
    ScheduleReconnect,
}

/// Sending side of the upstream control protocol.
pub trait ControlChannel: Send + Sync {
    /// True only once the session is authenticated and streaming.
    fn is_open(&self) -> bool;
    fn send(&self, msg: ControlMessage) -> Result<(), FeedError>;
}

/// Connection state shared between the feed driver and its readers.
#[derive(Debug)]
pub struct FeedHandle {
    state: RwLock<FeedState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<ControlMessage>>>,
}

impl FeedHandle {
    pub fn new() -> Self {
        Self { state: RwLock::new(FeedState::Disconnected), outbound: Mutex::new(None) }
    }

    pub fn state(&self) -> FeedState {
        *self.state.read()
    }

    fn set_state(&self, state: FeedState) {
        *self.state.write() = state;
    }

    fn attach(&self, tx: mpsc::UnboundedSender<ControlMessage>) {
        *self.outbound.lock() = Some(tx);
    }

    fn detach(&self) {
        self.outbound.lock().take();
    }

    // Bypasses the streaming check; auth has to go out before we are streaming
    fn send_raw(&self, msg: ControlMessage) -> Result<(), FeedError> {
        let guard = self.outbound.lock();
        let tx = guard.as_ref().ok_or(FeedError::NotConnected)?;
        tx.send(msg).map_err(|_| FeedError::NotConnected)
    }
}

impl Default for FeedHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlChannel for FeedHandle {
    fn is_open(&self) -> bool {
        self.state() == FeedState::Streaming
    }

    fn send(&self, msg: ControlMessage) -> Result<(), FeedError> {
        if !self.is_open() {
            return Err(FeedError::NotConnected);
        }
        self.send_raw(msg)
    }
}

/// Connection state machine: Disconnected -> Connecting -> Authenticating -> Streaming.
pub struct FeedSession {
    state: FeedState,
    generation: u64,
    key: String,
    secret: String,
}

impl FeedSession {
    pub fn new(key: &str, secret: &str) -> Self {
        Self { state: FeedState::Disconnected, generation: 0, key: key.to_string(), secret: secret.to_string() }
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn start(&mut self) -> Vec<FeedAction> {
        self.generation += 1;
        self.state = FeedState::Connecting;
        vec![FeedAction::Connect { generation: self.generation }]
    }

    pub fn handle(&mut self, event: FeedEvent) -> Vec<FeedAction> {
        match event {
            FeedEvent::ReconnectDue if self.state == FeedState::Disconnected => self.start(),
            FeedEvent::ReconnectDue => Vec::new(),
            FeedEvent::Opened { generation } if self.is_current(generation) && self.state == FeedState::Connecting => {
                self.state = FeedState::Authenticating;
                vec![FeedAction::Send(ControlMessage::Auth { key: self.key.clone(), secret: self.secret.clone() })]
            }
            FeedEvent::Frame { generation, text } if self.is_current(generation) => self.on_frame(&text),
            FeedEvent::Error { generation, error } => {
                error!(generation, error = %error, "upstream feed error");
                Vec::new()
            }
            FeedEvent::Closed { generation, reason } if self.is_current(generation) && self.state != FeedState::Disconnected => {
                warn!(generation, reason = %reason, "upstream feed closed");
                self.state = FeedState::Disconnected;
                vec![FeedAction::ScheduleReconnect]
            }
            stale => {
                debug!(?stale, current = self.generation, "ignoring event from stale connection");
                Vec::new()
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    fn on_frame(&mut self, text: &str) -> Vec<FeedAction> {
        let items = match serde_json::from_str::<serde_json::Value>(text) {
            Ok(serde_json::Value::Array(items)) => items,
            Ok(single) => vec![single],
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return Vec::new();
            }
        };

        let mut actions = Vec::new();
        for item in items {
            let msg = match serde_json::from_value::<InboundMessage>(item) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, "dropping malformed message");
                    continue;
                }
            };
            match msg {
                InboundMessage::Success { msg } if msg == AUTHENTICATED_MSG && self.state == FeedState::Authenticating => {
                    info!("authenticated with upstream feed");
                    self.state = FeedState::Streaming;
                    actions.push(FeedAction::Streaming);
                }
                InboundMessage::Success { msg } => debug!(msg = %msg, "upstream status"),
                InboundMessage::Error { code, msg } => warn!(?code, msg = %msg, "upstream rejected request"),
                InboundMessage::Subscription { trades } => info!(trades = trades.len(), "upstream subscription confirmed"),
                InboundMessage::Trade(tick) if self.state == FeedState::Streaming => actions.push(FeedAction::Trade(tick)),
                InboundMessage::Trade(tick) => debug!(symbol = %tick.symbol, state = %self.state, "trade before streaming, ignored"),
                InboundMessage::Other => trace!("ignoring unhandled message type"),
            }
        }
        actions
    }
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub url: String,
    pub key: String,
    pub secret: String,
    pub reconnect_delay: Duration,
}

/// Drives [`FeedSession`] against a real WebSocket and never gives up.
pub struct UpstreamFeedClient {
    settings: FeedSettings,
    handle: Arc<FeedHandle>,
    sink: Arc<dyn TickSink>,
    subscriptions: Arc<SubscriptionManager>,
    refresh: Arc<RefreshLoop>,
}

impl UpstreamFeedClient {
    pub fn new(
        settings: FeedSettings,
        handle: Arc<FeedHandle>,
        sink: Arc<dyn TickSink>,
        subscriptions: Arc<SubscriptionManager>,
        refresh: Arc<RefreshLoop>,
    ) -> Self {
        Self { settings, handle, sink, subscriptions, refresh }
    }

    pub async fn run(self) {
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE);
        let mut session = FeedSession::new(&self.settings.key, &self.settings.secret);

        let actions = session.start();
        self.handle.set_state(session.state());
        self.apply(actions, &events_tx);

        while let Some(event) = events_rx.recv().await {
            let actions = session.handle(event);
            self.handle.set_state(session.state());
            self.apply(actions, &events_tx);
        }
    }

    fn apply(&self, actions: Vec<FeedAction>, events: &mpsc::Sender<FeedEvent>) {
        for action in actions {
            match action {
                FeedAction::Connect { generation } => {
                    info!(url = %self.settings.url, generation, "connecting to upstream feed");
                    let (tx, rx) = mpsc::unbounded_channel();
                    self.handle.attach(tx);
                    tokio::spawn(run_connection(self.settings.url.clone(), generation, events.clone(), rx));
                }
                FeedAction::Send(msg) => {
                    if let Err(e) = self.handle.send_raw(msg) {
                        warn!(error = %e, "failed to queue control message");
                    }
                }
                FeedAction::Streaming => {
                    if self.refresh.ensure_started() {
                        info!("refresh loop started");
                    }
                    self.subscriptions.resubscribe_all();
                }
                FeedAction::Trade(tick) => self.sink.on_tick(tick),
                FeedAction::ScheduleReconnect => {
                    self.handle.detach();
                    metrics::counter!("scanx_feed_reconnects_total").increment(1);
                    let delay = self.settings.reconnect_delay;
                    info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                    let events = events.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = events.send(FeedEvent::ReconnectDue).await;
                    });
                }
            }
        }
    }
}

// One socket's lifetime. Always ends with a Closed event for its generation.
async fn run_connection(
    url: String,
    generation: u64,
    events: mpsc::Sender<FeedEvent>,
    mut outbound: mpsc::UnboundedReceiver<ControlMessage>,
) {
    let (ws_stream, response) = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok(ok) => ok,
        Err(e) => {
            let _ = events.send(FeedEvent::Error { generation, error: e.to_string() }).await;
            let _ = events.send(FeedEvent::Closed { generation, reason: "connect failed".into() }).await;
            return;
        }
    };
    debug!(generation, status = %response.status(), "websocket handshake complete");

    let (mut write, mut read) = ws_stream.split();
    if events.send(FeedEvent::Opened { generation }).await.is_err() {
        return;
    }

    let reason = loop {
        tokio::select! {
            Some(msg) = outbound.recv() => {
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to encode control message");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    let _ = events.send(FeedEvent::Error { generation, error: e.to_string() }).await;
                    break "send failed".to_string();
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if events.send(FeedEvent::Frame { generation, text }).await.is_err() {
                        break "event loop gone".to_string();
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        if events.send(FeedEvent::Frame { generation, text }).await.is_err() {
                            break "event loop gone".to_string();
                        }
                    }
                    Err(_) => warn!(generation, "dropping non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => break format!("closed by server: {frame:?}"),
                Some(Ok(_)) => {} // ping/pong are answered by tungstenite
                Some(Err(e)) => {
                    let _ = events.send(FeedEvent::Error { generation, error: e.to_string() }).await;
                    break "read error".to_string();
                }
                None => break "stream ended".to_string(),
            }
        }
    };
    let _ = events.send(FeedEvent::Closed { generation, reason }).await;
}
