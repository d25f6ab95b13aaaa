use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::engine::filter::TradeFilter;
use crate::engine::stats_cache::StatsCache;
use crate::engine::types::{StatsSnapshot, SymbolRuntimeState};
use crate::error::{ScreenerError, ScreenerResult};
use crate::market_data::feed::{FeedHandle, FeedState};
use crate::market_data::subscriptions::SubscriptionManager;
use crate::publish::Publisher;

#[derive(Clone)]
pub struct AppState {
    pub publisher: Publisher,
    pub stats: Arc<StatsCache>,
    pub filter: Arc<Mutex<TradeFilter>>,
    pub feed: Arc<FeedHandle>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::UnknownSymbol(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn create_router(state: AppState, allowed_origin: &str) -> ScreenerResult<Router> {
    let origin: HeaderValue = allowed_origin
        .parse()
        .map_err(|_| ScreenerError::InvalidConfig(format!("bad allowed_origin: {allowed_origin}")))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_credentials(true);

    Ok(Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/candidates", get(candidates))
        .route("/symbols/:symbol", get(symbol))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// Binds and serves until the process exits. Bind failure is fatal.
pub async fn serve(addr: SocketAddr, router: Router) -> ScreenerResult<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "publish server listening");
    axum::serve(listener, router).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.publisher.subscribe();
    metrics::gauge!("scanx_subscribers").increment(1.0);
    info!(subscribers = state.publisher.subscriber_count(), "subscriber connected");

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Ok(frame) => {
                    if socket.send(Message::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "subscriber lagging, frames dropped"),
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(other)) => debug!(?other, "ignoring subscriber message"),
            },
        }
    }

    metrics::gauge!("scanx_subscribers").decrement(1.0);
    info!("subscriber disconnected");
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    status: &'static str,
    feed: FeedState,
    subscribers: usize,
    upstream_symbols: usize,
    uptime_secs: i64,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        feed: state.feed.state(),
        subscribers: state.publisher.subscriber_count(),
        upstream_symbols: state.subscriptions.current().len(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

#[derive(Serialize)]
struct Candidate {
    symbol: String,
    #[serde(flatten)]
    stats: StatsSnapshot,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CandidatesView {
    refreshed_at: Option<DateTime<Utc>>,
    candidates: Vec<Candidate>,
}

async fn candidates(State(state): State<AppState>) -> Json<CandidatesView> {
    let book = state.stats.load();
    let candidates = book
        .candidates
        .symbols()
        .iter()
        .filter_map(|symbol| {
            let stats = book.snapshots.get(symbol)?.clone();
            Some(Candidate { symbol: symbol.clone(), stats })
        })
        .collect();
    Json(CandidatesView { refreshed_at: book.refreshed_at, candidates })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SymbolView {
    symbol: String,
    subscribed: bool,
    state: Option<SymbolRuntimeState>,
    stats: Option<StatsSnapshot>,
}

async fn symbol(Path(symbol): Path<String>, State(state): State<AppState>) -> Result<Json<SymbolView>, ApiError> {
    let symbol = symbol.to_uppercase();
    let runtime = state.filter.lock().symbol_state(&symbol);
    let stats = state.stats.snapshot(&symbol);
    if runtime.is_none() && stats.is_none() {
        return Err(ApiError::UnknownSymbol(symbol));
    }
    let subscribed = state.subscriptions.current().contains(&symbol);
    Ok(Json(SymbolView { symbol, subscribed, state: runtime, stats }))
}
