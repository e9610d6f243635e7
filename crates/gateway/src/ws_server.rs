//! WebSocket server handler using Axum.
//!
//! One connection gets one [`Session`], a read loop owned by this handler,
//! and a spawned write task draining the session's bounded outbound queue.
//! Subscription intents update the registries before any confirmation is
//! enqueued, so no event routed after the confirmation can be missed.

use crate::client::{Session, SessionRegistry, SlowConsumerPolicy};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::subscription::channel_keys;
use crate::symbols::SymbolRefs;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::HeaderValue,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use common::ControlCommand;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

/// Per-session tunables, copied out of the process configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Outbound queue capacity per session.
    pub queue_capacity: usize,
    /// Transport-level ping cadence from the write task.
    pub heartbeat_interval: Duration,
    /// Deadline for each outbound write.
    pub write_deadline: Duration,
    pub slow: SlowConsumerPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            heartbeat_interval: Duration::from_secs(30),
            write_deadline: Duration::from_secs(10),
            slow: SlowConsumerPolicy::default(),
        }
    }
}

/// Shared application state.
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub symbols: Arc<SymbolRefs>,
    /// Control channel into the upstream session; None when the gateway
    /// runs without a feed credential.
    pub feed_tx: Option<mpsc::Sender<ControlCommand>>,
    pub upstream_ready: Arc<AtomicBool>,
    pub started_at: Instant,
    pub settings: SessionSettings,
}

/// Create the HTTP router: WebSocket endpoint plus health surface.
pub fn create_router(state: Arc<AppState>, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
        .layer(cors_layer(allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "clients": state.registry.client_count(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "upstream_ready": state.upstream_ready.load(Ordering::Relaxed),
        "timestamp": Utc::now().timestamp(),
    }))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "clients": state.registry.client_count(),
        "channels": state.registry.channel_count(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "upstream_ready": state.upstream_ready.load(Ordering::Relaxed),
        "timestamp": Utc::now().timestamp(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Full lifecycle of one client connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (ws_tx, ws_rx) = socket.split();

    let (session, outbound_rx) = Session::new(state.settings.queue_capacity, state.settings.slow);
    state.registry.register(session.clone());

    counter!("gateway_connections_total").increment(1);
    gauge!("gateway_active_connections").set(state.registry.client_count() as f64);
    info!(
        "client {} connected (total: {})",
        session.id,
        state.registry.client_count()
    );

    let write_task = tokio::spawn(write_pump(
        ws_tx,
        outbound_rx,
        session.clone(),
        state.settings.heartbeat_interval,
        state.settings.write_deadline,
    ));

    read_loop(ws_rx, &state, &session).await;
    teardown(&state, &session).await;
    let _ = write_task.await;

    counter!("gateway_disconnections_total").increment(1);
    gauge!("gateway_active_connections").set(state.registry.client_count() as f64);
    info!(
        "client {} disconnected (total: {})",
        session.id,
        state.registry.client_count()
    );
}

/// Read frames until the transport closes or the session is flagged closed.
async fn read_loop(mut ws_rx: SplitStream<WebSocket>, state: &Arc<AppState>, session: &Arc<Session>) {
    let mut closed_rx = session.closed_rx();
    while !session.is_closing() {
        tokio::select! {
            biased;

            _ = closed_rx.changed() => {}

            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        session.touch();
                        handle_client_frame(state, session, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        session.touch();
                        match std::str::from_utf8(&data) {
                            Ok(text) => handle_client_frame(state, session, text).await,
                            Err(_) => warn!("client {} sent non-UTF-8 binary frame", session.id),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        session.touch();
                        let _ = session.enqueue(Message::Pong(data));
                    }
                    Some(Ok(Message::Pong(_))) => {
                        session.touch();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("client {} transport error: {}", session.id, e);
                        break;
                    }
                }
            }
        }
    }
}

const KNOWN_MESSAGE_TYPES: &[&str] = &["subscribe", "unsubscribe", "ping"];

/// Parse and dispatch one client frame. A message of an unknown type is
/// logged and ignored; a malformed frame is answered with an error message
/// on the session's own stream. Neither closes the connection.
async fn handle_client_frame(state: &Arc<AppState>, session: &Arc<Session>, text: &str) {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        if let Some(msg_type) = value.get("type").and_then(|t| t.as_str()) {
            if !KNOWN_MESSAGE_TYPES.contains(&msg_type) {
                warn!("unknown message type from {}: {}", session.id, msg_type);
                counter!("gateway_unsupported_messages_total").increment(1);
                return;
            }
        }
    }

    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("invalid message from {}: {}", session.id, e);
            counter!("gateway_protocol_errors_total").increment(1);
            let _ = session.send(&ServerMessage::Error {
                reason: format!("invalid message: {}", e),
            });
            return;
        }
    };
    handle_client_message(state, session, msg).await;
}

async fn handle_client_message(state: &Arc<AppState>, session: &Arc<Session>, msg: ClientMessage) {
    match msg {
        ClientMessage::Subscribe { channel, symbols } => {
            debug!("client {} subscribing to {:?} {:?}", session.id, channel, symbols);

            let before = session.covered_symbols();
            let added = state
                .registry
                .subscribe(session, channel_keys(channel, &symbols));
            counter!("gateway_subscriptions_total").increment(added.len() as u64);

            // Symbols this session newly covers drive the upstream delta
            let after = session.covered_symbols();
            let new_symbols: Vec<String> = after.difference(&before).cloned().collect();
            let to_subscribe = state.symbols.acquire(&new_symbols);
            notify_feed(state, ControlCommand::Subscribe(to_subscribe)).await;

            // Confirmation goes out only after the registry update
            let _ = session.send(&ServerMessage::Subscribed {
                channel,
                symbols,
                timestamp: Utc::now().timestamp_millis(),
            });
        }
        ClientMessage::Unsubscribe { channel, symbols } => {
            debug!("client {} unsubscribing from {:?} {:?}", session.id, channel, symbols);

            // Without symbols, drop everything the session holds on the channel
            let keys = if symbols.is_empty() {
                session.keys_for_channel(channel)
            } else {
                channel_keys(channel, &symbols)
            };

            let before = session.covered_symbols();
            state.registry.unsubscribe(session, keys);
            let after = session.covered_symbols();
            let released: Vec<String> = before.difference(&after).cloned().collect();
            let to_unsubscribe = state.symbols.release(&released);
            notify_feed(state, ControlCommand::Unsubscribe(to_unsubscribe)).await;

            let _ = session.send(&ServerMessage::Unsubscribed {
                channel,
                timestamp: Utc::now().timestamp_millis(),
            });
        }
        ClientMessage::Ping => {
            let _ = session.send(&ServerMessage::Pong {
                timestamp: Utc::now().timestamp_millis(),
            });
        }
    }
}

/// Forward a subscription delta to the upstream session, if one exists.
async fn notify_feed(state: &Arc<AppState>, cmd: ControlCommand) {
    let symbols = match &cmd {
        ControlCommand::Subscribe(s) | ControlCommand::Unsubscribe(s) => s,
        ControlCommand::Shutdown => return,
    };
    if symbols.is_empty() {
        return;
    }
    if let Some(tx) = &state.feed_tx {
        if tx.send(cmd).await.is_err() {
            warn!("upstream command channel closed, subscription delta lost");
        }
    }
}

/// Remove the session from every registry, release its symbols, and drive
/// the upstream unsubscribe for any symbol that lost its last referent.
/// Safe to call from either task; only the first caller does the work.
async fn teardown(state: &Arc<AppState>, session: &Arc<Session>) {
    let Some(session) = state.registry.remove_session(&session.id) else {
        return;
    };

    let covered: Vec<String> = session.covered_symbols().into_iter().collect();
    let to_unsubscribe = state.symbols.release(&covered);
    notify_feed(state, ControlCommand::Unsubscribe(to_unsubscribe)).await;

    session.close();
}

/// Drain the session's outbound queue onto the socket, pinging on the
/// heartbeat interval. Any write error or missed deadline closes the
/// session; the read loop observes the flag and finishes teardown.
async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Message>,
    session: Arc<Session>,
    heartbeat: Duration,
    deadline: Duration,
) {
    let mut ping_interval = interval(heartbeat);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut closed_rx = session.closed_rx();

    while !session.is_closing() {
        tokio::select! {
            biased;

            _ = closed_rx.changed() => {}

            maybe = outbound_rx.recv() => {
                match maybe {
                    Some(msg) => {
                        match timeout(deadline, ws_tx.send(msg)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(_)) | Err(_) => {
                                session.close();
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                let ping = Message::Ping(Vec::new().into());
                match timeout(deadline, ws_tx.send(ping)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) | Err(_) => {
                        session.close();
                        break;
                    }
                }
            }
        }
    }
    let _ = ws_tx.close().await;
}

/// Periodically close sessions that have gone quiet past the stale
/// threshold; their own read tasks complete the teardown.
pub fn spawn_stale_sweeper(
    registry: Arc<SessionRegistry>,
    sweep_interval: Duration,
    stale_after: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let closed = registry.close_stale(stale_after);
            if closed > 0 {
                info!("stale sweeper closed {} sessions", closed);
            }
        }
    })
}

/// Periodic liveness line with client count and uptime.
pub fn spawn_heartbeat_logger(registry: Arc<SessionRegistry>, started_at: Instant) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(30));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            info!(
                "heartbeat - clients: {}, uptime: {}s",
                registry.client_count(),
                started_at.elapsed().as_secs()
            );
        }
    })
}
