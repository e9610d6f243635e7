//! Feed handler for the Polygon-style upstream session.
//!
//! Implements the auth state machine driven by inbound status records, tracks
//! the upstream-subscribed symbol set, buffers subscription requests that
//! arrive while the session is not ready, and reissues the whole set as one
//! batched subscribe after every successful (re-)authentication.

use crate::polygon::frames::{auth_frame, subscribe_frame, unsubscribe_frame, DEFAULT_PREFIXES};
use async_trait::async_trait;
use common::{ControlCommand, Error, FeedHandler, Result};
use metrics::counter;
use normalizer::polygon::{parse_batch, RawRecord, StatusRecord};
use normalizer::Event;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Configuration for the Polygon feed session.
#[derive(Debug, Clone)]
pub struct PolygonConfig {
    /// Feed WebSocket endpoint.
    pub ws_url: String,
    /// Upstream credential.
    pub api_key: String,
    /// Event-kind prefixes to subscribe per symbol.
    pub prefixes: Vec<&'static str>,
}

impl PolygonConfig {
    pub fn new(ws_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            api_key: api_key.into(),
            prefixes: DEFAULT_PREFIXES.to_vec(),
        }
    }
}

#[derive(Debug, Default)]
struct SubscriptionState {
    /// Symbols currently subscribed on the wire (or to be reissued on the
    /// next auth success).
    subscribed: BTreeSet<String>,
    /// Symbols requested while the session was not ready.
    pending: BTreeSet<String>,
}

/// Upstream session handler. One instance lives for the process lifetime,
/// across reconnects of the underlying transport.
pub struct PolygonHandler {
    config: PolygonConfig,
    ingress: mpsc::Sender<Arc<Event>>,
    ready: Arc<AtomicBool>,
    state: Mutex<SubscriptionState>,
}

impl PolygonHandler {
    /// `ready` is shared with the HTTP health surface; the handler is its
    /// only writer.
    pub fn new(
        config: PolygonConfig,
        ingress: mpsc::Sender<Arc<Event>>,
        ready: Arc<AtomicBool>,
    ) -> Self {
        ready.store(false, Ordering::Relaxed);
        Self {
            config,
            ingress,
            ready,
            state: Mutex::new(SubscriptionState::default()),
        }
    }

    fn handle_status(&self, status: StatusRecord) -> Result<Option<String>> {
        match status.status.as_str() {
            "auth_success" => {
                info!("upstream authentication successful");
                self.ready.store(true, Ordering::Relaxed);
                let mut state = self.state.lock().unwrap();
                let pending = std::mem::take(&mut state.pending);
                state.subscribed.extend(pending);
                if state.subscribed.is_empty() {
                    Ok(None)
                } else {
                    let symbols: Vec<&String> = state.subscribed.iter().collect();
                    info!("resubscribing {} symbols upstream", symbols.len());
                    Ok(Some(subscribe_frame(&symbols, &self.config.prefixes)))
                }
            }
            "auth_failed" => {
                self.ready.store(false, Ordering::Relaxed);
                Err(Error::AuthFailed(status.message))
            }
            "connected" => {
                debug!("upstream transport connected");
                Ok(None)
            }
            "success" => {
                debug!("upstream ack: {}", status.message);
                Ok(None)
            }
            "error" => {
                warn!("upstream error notice: {}", status.message);
                counter!("feed_status_errors_total").increment(1);
                Ok(None)
            }
            other => {
                debug!("upstream status {}: {}", other, status.message);
                Ok(None)
            }
        }
    }

    fn publish(&self, event: Event) {
        match self.ingress.try_send(Arc::new(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                // The stream is live, not replayable; shed under pressure.
                counter!("feed_events_dropped_total").increment(1);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("broadcast ingress closed, dropping event");
            }
        }
    }
}

#[async_trait]
impl FeedHandler for PolygonHandler {
    fn url(&self) -> &str {
        &self.config.ws_url
    }

    fn on_connect_message(&self) -> Option<String> {
        Some(auth_frame(&self.config.api_key))
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    async fn on_message(&self, msg: &str) -> Result<Vec<String>> {
        let records = match parse_batch(msg) {
            Ok(records) => records,
            Err(e) => {
                warn!("dropping malformed upstream frame: {}", e);
                counter!("feed_malformed_frames_total").increment(1);
                return Ok(Vec::new());
            }
        };

        let mut replies = Vec::new();
        for record in records {
            match record {
                RawRecord::Status(status) => {
                    if let Some(frame) = self.handle_status(status)? {
                        replies.push(frame);
                    }
                }
                RawRecord::Unknown => {
                    counter!("feed_unknown_records_total").increment(1);
                }
                data => {
                    if let Some(event) = data.into_event() {
                        counter!("feed_events_received_total").increment(1);
                        self.publish(event);
                    }
                }
            }
        }
        Ok(replies)
    }

    async fn on_disconnect(&self) {
        self.ready.store(false, Ordering::Relaxed);
    }

    async fn handle_command(&self, cmd: ControlCommand) -> Option<String> {
        match cmd {
            ControlCommand::Subscribe(symbols) => {
                let mut state = self.state.lock().unwrap();
                let new: Vec<String> = symbols
                    .into_iter()
                    .filter(|s| !state.subscribed.contains(s) && !state.pending.contains(s))
                    .collect();
                if new.is_empty() {
                    return None;
                }
                if self.is_ready() {
                    state.subscribed.extend(new.iter().cloned());
                    Some(subscribe_frame(&new, &self.config.prefixes))
                } else {
                    debug!("buffering {} symbols until the session is ready", new.len());
                    state.pending.extend(new);
                    None
                }
            }
            ControlCommand::Unsubscribe(symbols) => {
                let mut state = self.state.lock().unwrap();
                let mut on_wire = Vec::new();
                for symbol in symbols {
                    state.pending.remove(&symbol);
                    if state.subscribed.remove(&symbol) {
                        on_wire.push(symbol);
                    }
                }
                // Absent symbols are a silent no-op
                if on_wire.is_empty() || !self.is_ready() {
                    None
                } else {
                    Some(unsubscribe_frame(&on_wire, &self.config.prefixes))
                }
            }
            ControlCommand::Shutdown => None,
        }
    }

    fn subscribed_symbols(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.subscribed.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTH_OK: &str = r#"[{"ev":"status","status":"auth_success","message":"authenticated"}]"#;

    fn handler_with_ingress(capacity: usize) -> (PolygonHandler, mpsc::Receiver<Arc<Event>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handler = PolygonHandler::new(
            PolygonConfig::new("wss://example.test/stocks", "test-key"),
            tx,
            Arc::new(AtomicBool::new(false)),
        );
        (handler, rx)
    }

    #[tokio::test]
    async fn connect_message_is_auth_frame() {
        let (handler, _rx) = handler_with_ingress(8);
        let frame = handler.on_connect_message().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["action"], "auth");
        assert_eq!(parsed["params"], "test-key");
    }

    #[tokio::test]
    async fn auth_success_marks_ready() {
        let (handler, _rx) = handler_with_ingress(8);
        assert!(!handler.is_ready());
        let replies = handler.on_message(AUTH_OK).await.unwrap();
        assert!(handler.is_ready());
        // Nothing subscribed yet, so nothing to reissue
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn auth_failure_is_terminal() {
        let (handler, _rx) = handler_with_ingress(8);
        let err = handler
            .on_message(r#"[{"ev":"status","status":"auth_failed","message":"bad key"}]"#)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthFailed(ref m) if m == "bad key"));
        assert!(err.is_terminal());
        assert!(!handler.is_ready());
    }

    #[tokio::test]
    async fn subscribe_before_ready_is_buffered_and_flushed() {
        let (handler, _rx) = handler_with_ingress(8);

        let frame = handler
            .handle_command(ControlCommand::Subscribe(vec!["AAPL".into()]))
            .await;
        assert!(frame.is_none());
        assert!(handler.subscribed_symbols().is_empty());

        let replies = handler.on_message(AUTH_OK).await.unwrap();
        assert_eq!(replies.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&replies[0]).unwrap();
        assert_eq!(parsed["action"], "subscribe");
        assert_eq!(parsed["params"], "T.AAPL,Q.AAPL,A.AAPL");
        assert_eq!(handler.subscribed_symbols(), vec!["AAPL".to_string()]);
    }

    #[tokio::test]
    async fn subscribe_when_ready_emits_frame_once() {
        let (handler, _rx) = handler_with_ingress(8);
        handler.on_message(AUTH_OK).await.unwrap();

        let frame = handler
            .handle_command(ControlCommand::Subscribe(vec!["AAPL".into()]))
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["params"], "T.AAPL,Q.AAPL,A.AAPL");

        // Duplicate subscribe is filtered against the tracked set
        let again = handler
            .handle_command(ControlCommand::Subscribe(vec!["AAPL".into()]))
            .await;
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn unsubscribe_absent_symbol_is_noop() {
        let (handler, _rx) = handler_with_ingress(8);
        handler.on_message(AUTH_OK).await.unwrap();
        let frame = handler
            .handle_command(ControlCommand::Unsubscribe(vec!["GME".into()]))
            .await;
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn reconnect_reissues_full_symbol_set() {
        let (handler, _rx) = handler_with_ingress(8);
        handler.on_message(AUTH_OK).await.unwrap();
        for sym in ["AAPL", "TSLA", "NVDA"] {
            handler
                .handle_command(ControlCommand::Subscribe(vec![sym.into()]))
                .await;
        }

        // Transport drops; symbol set must survive
        handler.on_disconnect().await;
        assert!(!handler.is_ready());
        assert_eq!(handler.subscribed_symbols().len(), 3);

        // Re-auth produces one batched subscribe covering everything
        let replies = handler.on_message(AUTH_OK).await.unwrap();
        assert_eq!(replies.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&replies[0]).unwrap();
        let params = parsed["params"].as_str().unwrap();
        for sym in ["AAPL", "TSLA", "NVDA"] {
            assert!(params.contains(&format!("T.{}", sym)));
        }
    }

    #[tokio::test]
    async fn data_records_are_published_to_ingress() {
        let (handler, mut rx) = handler_with_ingress(8);
        handler.on_message(AUTH_OK).await.unwrap();

        let replies = handler
            .on_message(r#"[{"ev":"T","sym":"AAPL","p":150.25,"s":100,"x":4,"t":1700000000000}]"#)
            .await
            .unwrap();
        assert!(replies.is_empty());

        let event = rx.try_recv().unwrap();
        assert_eq!(event.symbol, "AAPL");
        assert_eq!(event.kind, normalizer::EventKind::Trade);
    }

    #[tokio::test]
    async fn full_ingress_sheds_events() {
        let (handler, mut rx) = handler_with_ingress(1);
        handler.on_message(AUTH_OK).await.unwrap();

        let batch = r#"[
            {"ev":"T","sym":"AAPL","p":1.0,"s":1,"x":1,"t":1},
            {"ev":"T","sym":"AAPL","p":2.0,"s":1,"x":1,"t":2},
            {"ev":"T","sym":"AAPL","p":3.0,"s":1,"x":1,"t":3}
        ]"#;
        handler.on_message(batch).await.unwrap();

        // Only the first event fits; the rest were dropped, not queued
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_without_error() {
        let (handler, _rx) = handler_with_ingress(8);
        let replies = handler.on_message("not json at all").await.unwrap();
        assert!(replies.is_empty());
    }
}
