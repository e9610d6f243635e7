//! Downstream session state and registry management.
//!
//! Uses lock-free DashMap for high-throughput concurrent access. Every
//! outbound queue is bounded: enqueue is try-send, drop-on-full, so a slow
//! consumer never blocks the broadcast path or any other session.

use crate::error::{GatewayError, Result};
use crate::protocol::{Channel, ServerMessage};
use crate::subscription::ChannelKey;
use axum::extract::ws::{Message, Utf8Bytes};
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use metrics::counter;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unique session identifier.
pub type SessionId = Uuid;

/// When a session drops more than `max_drops` outbound messages within
/// `window`, it is closed rather than left to lag indefinitely.
#[derive(Debug, Clone, Copy)]
pub struct SlowConsumerPolicy {
    pub max_drops: u64,
    pub window: Duration,
}

impl Default for SlowConsumerPolicy {
    fn default() -> Self {
        Self {
            max_drops: 500,
            window: Duration::from_secs(10),
        }
    }
}

/// State for a single connected client.
pub struct Session {
    /// Unique session identifier.
    pub id: SessionId,
    /// Bounded channel feeding the session's write task.
    tx: mpsc::Sender<Message>,
    /// Channel keys this session subscribes to.
    keys: DashSet<ChannelKey>,
    /// Timestamp when the client connected, milliseconds.
    pub connected_at: i64,
    /// Timestamp of the last frame seen from the client.
    last_seen: AtomicI64,
    /// Total outbound messages dropped on this session.
    dropped: AtomicU64,
    window_dropped: AtomicU64,
    window_start: AtomicI64,
    slow: SlowConsumerPolicy,
    /// Close signal observed by the read and write tasks.
    closed: watch::Sender<bool>,
}

impl Session {
    /// Create a session with a bounded outbound queue of `queue_capacity`.
    /// The returned receiver belongs to the session's write task.
    pub fn new(
        queue_capacity: usize,
        slow: SlowConsumerPolicy,
    ) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let now = Utc::now().timestamp_millis();
        let (closed, _) = watch::channel(false);
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            tx,
            keys: DashSet::new(),
            connected_at: now,
            last_seen: AtomicI64::new(now),
            dropped: AtomicU64::new(0),
            window_dropped: AtomicU64::new(0),
            window_start: AtomicI64::new(now),
            slow,
            closed,
        });
        (session, rx)
    }

    /// Serialize and enqueue a message for this session.
    ///
    /// Backpressure drops the message (counted, possibly closing a
    /// persistently slow session); only serialization or a torn-down queue
    /// report an error.
    pub fn send(&self, msg: &ServerMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.enqueue(Message::Text(json.into()))
    }

    /// Enqueue an already-serialized broadcast payload.
    pub fn send_raw(&self, payload: Utf8Bytes) {
        let _ = self.enqueue(Message::Text(payload));
    }

    /// Enqueue a raw transport frame (e.g., a pong).
    pub fn enqueue(&self, msg: Message) -> Result<()> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.record_drop();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(GatewayError::ChannelSend),
        }
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_slow_consumer_drops_total").increment(1);

        let now = Utc::now().timestamp_millis();
        let window_ms = self.slow.window.as_millis() as i64;
        if now - self.window_start.load(Ordering::Relaxed) > window_ms {
            self.window_start.store(now, Ordering::Relaxed);
            self.window_dropped.store(1, Ordering::Relaxed);
            return;
        }
        let in_window = self.window_dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if in_window >= self.slow.max_drops && !self.is_closing() {
            warn!(
                "session {} dropped {} messages within {:?}, closing slow consumer",
                self.id, in_window, self.slow.window
            );
            counter!("gateway_slow_consumers_closed_total").increment(1);
            self.close();
        }
    }

    /// Total outbound messages dropped on this session.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Record activity from the client.
    pub fn touch(&self) {
        self.last_seen
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_seen_ms(&self) -> i64 {
        self.last_seen.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn backdate_last_seen(&self, ms_ago: i64) {
        self.last_seen
            .store(Utc::now().timestamp_millis() - ms_ago, Ordering::Relaxed);
    }

    /// Signal both session tasks to stop. Idempotent, and effective even
    /// before either task has subscribed to the close signal.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closing(&self) -> bool {
        *self.closed.borrow()
    }

    /// A receiver for the close signal; `changed()` fires on `close()`.
    pub fn closed_rx(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub(crate) fn insert_key(&self, key: ChannelKey) -> bool {
        self.keys.insert(key)
    }

    pub(crate) fn remove_key(&self, key: &ChannelKey) -> bool {
        self.keys.remove(key).is_some()
    }

    pub fn has_key(&self, key: &ChannelKey) -> bool {
        self.keys.contains(key)
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// All keys the session holds on one channel.
    pub fn keys_for_channel(&self, channel: Channel) -> Vec<ChannelKey> {
        self.keys
            .iter()
            .filter(|k| k.channel == channel)
            .map(|k| k.clone())
            .collect()
    }

    /// Specific symbols referenced by at least one of this session's keys.
    /// This is the session's contribution to the symbol reference registry.
    pub fn covered_symbols(&self) -> HashSet<String> {
        self.keys
            .iter()
            .filter_map(|k| k.symbol_scope().map(|s| s.to_string()))
            .collect()
    }

    fn keys_snapshot(&self) -> Vec<ChannelKey> {
        self.keys.iter().map(|k| k.clone()).collect()
    }
}

/// Lock-free registry of connected sessions and their subscriptions.
///
/// Maintains:
/// - Session ID → Session mapping
/// - Channel key → Session IDs reverse index for broadcast routing
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    routes: DashMap<ChannelKey, DashSet<SessionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            routes: DashMap::new(),
        }
    }

    /// Register a new session.
    pub fn register(&self, session: Arc<Session>) -> SessionId {
        let id = session.id;
        self.sessions.insert(id, session);
        id
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| s.clone())
    }

    /// Add channel keys for a session; returns the keys that were actually
    /// new to it. The session and the reverse index stay mirrored.
    pub fn subscribe(&self, session: &Arc<Session>, keys: Vec<ChannelKey>) -> Vec<ChannelKey> {
        let mut added = Vec::new();
        for key in keys {
            if session.insert_key(key.clone()) {
                self.routes.entry(key.clone()).or_default().insert(session.id);
                added.push(key);
            }
        }
        added
    }

    /// Remove channel keys from a session; returns the keys it actually held.
    pub fn unsubscribe(&self, session: &Arc<Session>, keys: Vec<ChannelKey>) -> Vec<ChannelKey> {
        let mut removed = Vec::new();
        for key in keys {
            if session.remove_key(&key) {
                if let Some(set) = self.routes.get(&key) {
                    set.remove(&session.id);
                }
                removed.push(key);
            }
        }
        removed
    }

    /// Remove a session and every routing entry pointing at it. Returns the
    /// session on first removal, None on repeated teardown.
    pub fn remove_session(&self, id: &SessionId) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(id)?;
        for key in session.keys_snapshot() {
            if let Some(set) = self.routes.get(&key) {
                set.remove(id);
            }
        }
        Some(session)
    }

    /// Sessions that should receive an event on `channel` for `symbol`:
    /// channel subscribers scoped to the symbol or to ALL, plus generic
    /// market-data subscribers under the same two scopes. No I/O, short
    /// map reads only.
    pub fn lookup(&self, channel: Channel, symbol: &str) -> Vec<Arc<Session>> {
        let candidates = [
            ChannelKey::all(channel),
            ChannelKey::symbol(channel, symbol),
            ChannelKey::all(Channel::MarketData),
            ChannelKey::symbol(Channel::MarketData, symbol),
        ];

        let mut matched: HashSet<SessionId> = HashSet::new();
        for key in &candidates {
            if let Some(set) = self.routes.get(key) {
                for id in set.iter() {
                    matched.insert(*id);
                }
            }
        }

        matched
            .into_iter()
            .filter_map(|id| self.sessions.get(&id).map(|s| s.clone()))
            .collect()
    }

    /// Number of connected sessions.
    pub fn client_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of distinct channel keys with at least one historical
    /// subscriber (empty sets may linger until their key is reused).
    pub fn channel_count(&self) -> usize {
        self.routes.len()
    }

    /// Close sessions idle past `max_idle`; teardown completes on their own
    /// read tasks. Returns how many were flagged.
    pub fn close_stale(&self, max_idle: Duration) -> usize {
        let now = Utc::now().timestamp_millis();
        let max_idle_ms = max_idle.as_millis() as i64;
        let mut closed = 0;
        for entry in self.sessions.iter() {
            let session = entry.value();
            if now - session.last_seen_ms() > max_idle_ms && !session.is_closing() {
                info!("closing stale session {}", session.id);
                counter!("gateway_stale_sessions_closed_total").increment(1);
                session.close();
                closed += 1;
            }
        }
        closed
    }

    /// Close every session (process shutdown).
    pub fn close_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().close();
        }
        debug!("close requested for all {} sessions", self.sessions.len());
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
