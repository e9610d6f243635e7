//! Broadcast engine: upstream events → matching downstream sessions.
//!
//! One worker drains the bounded ingress queue that the upstream parser
//! try-sends into. Per-symbol event order is preserved end to end because a
//! single worker owns the queue; delivery to each session is a try-send onto
//! its bounded outbound queue, so no subscriber can stall another. The cache
//! and durable sinks are fed first, through their own bounded queues, and
//! never sit on the fan-out path.

use crate::client::SessionRegistry;
use crate::protocol::{Channel, ServerMessage};
use axum::extract::ws::Utf8Bytes;
use feed::SinkHandle;
use metrics::counter;
use normalizer::Event;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Spawn the broadcast worker over the ingress receiver.
///
/// The worker exits when every ingress sender is gone.
pub fn spawn_broadcast_worker(
    registry: Arc<SessionRegistry>,
    mut ingress: mpsc::Receiver<Arc<Event>>,
    sinks: Vec<SinkHandle>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("broadcast worker running ({} sinks)", sinks.len());
        while let Some(event) = ingress.recv().await {
            // Side channels first; each is a non-blocking enqueue
            for sink in &sinks {
                sink.write(&event);
            }

            let channel = Channel::for_kind(event.kind);
            let sessions = registry.lookup(channel, &event.symbol);
            if sessions.is_empty() {
                continue;
            }

            // Serialize once per broadcast, not once per recipient
            let msg = ServerMessage::market_data(&event);
            let payload: Utf8Bytes = match serde_json::to_string(&msg) {
                Ok(json) => json.into(),
                Err(e) => {
                    warn!("failed to serialize broadcast message: {}", e);
                    continue;
                }
            };

            for session in sessions {
                session.send_raw(payload.clone());
            }
            counter!("gateway_events_routed_total").increment(1);
        }
        debug!("broadcast worker exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Session, SlowConsumerPolicy};
    use crate::subscription::ChannelKey;
    use axum::extract::ws::Message;
    use normalizer::{EventKind, EventPayload, TradeData};
    use std::time::Duration;
    use tokio::time::timeout;

    fn trade(symbol: &str, seq: i64) -> Arc<Event> {
        Arc::new(Event {
            kind: EventKind::Trade,
            symbol: symbol.to_string(),
            timestamp_ms: seq,
            payload: EventPayload::Trade(TradeData {
                price: 150.25,
                size: 100,
                exchange: 4,
                conditions: vec![],
            }),
        })
    }

    async fn recv_json(rx: &mut mpsc::Receiver<Message>) -> serde_json::Value {
        let msg = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for broadcast")
            .expect("session queue closed");
        match msg {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    fn registry_with(
        subscriptions: &[(Channel, Option<&str>)],
        capacity: usize,
    ) -> (Arc<SessionRegistry>, Arc<Session>, mpsc::Receiver<Message>) {
        let registry = Arc::new(SessionRegistry::new());
        let (session, rx) = Session::new(capacity, SlowConsumerPolicy::default());
        registry.register(session.clone());
        let keys = subscriptions
            .iter()
            .map(|(channel, scope)| match scope {
                Some(symbol) => ChannelKey::symbol(*channel, *symbol),
                None => ChannelKey::all(*channel),
            })
            .collect();
        registry.subscribe(&session, keys);
        (registry, session, rx)
    }

    #[tokio::test]
    async fn delivers_matching_event_with_wire_shape() {
        let (registry, _session, mut rx) =
            registry_with(&[(Channel::Trades, Some("AAPL"))], 16);
        let (tx, ingress) = mpsc::channel(16);
        let worker = spawn_broadcast_worker(registry, ingress, Vec::new());

        tx.send(trade("AAPL", 1_700_000_000_000)).await.unwrap();

        let json = recv_json(&mut rx).await;
        assert_eq!(json["type"], "market-data");
        assert_eq!(json["channel"], "trades");
        assert_eq!(json["symbols"], serde_json::json!(["AAPL"]));
        assert_eq!(json["data"]["price"], 150.25);
        assert_eq!(json["data"]["size"], 100);

        drop(tx);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn skips_non_matching_sessions() {
        let (registry, _session, mut rx) =
            registry_with(&[(Channel::Trades, Some("TSLA"))], 16);
        let (tx, ingress) = mpsc::channel(16);
        let worker = spawn_broadcast_worker(registry, ingress, Vec::new());

        tx.send(trade("AAPL", 1)).await.unwrap();
        drop(tx);
        worker.await.unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn market_data_channel_matches_by_symbol() {
        let (registry, _session, mut rx) =
            registry_with(&[(Channel::MarketData, Some("AAPL"))], 16);
        let (tx, ingress) = mpsc::channel(16);
        let worker = spawn_broadcast_worker(registry, ingress, Vec::new());

        tx.send(trade("AAPL", 1)).await.unwrap();
        let json = recv_json(&mut rx).await;
        // The event still names its concrete channel
        assert_eq!(json["channel"], "trades");

        drop(tx);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn per_symbol_order_is_preserved() {
        let (registry, _session, mut rx) = registry_with(&[(Channel::Trades, None)], 256);
        let (tx, ingress) = mpsc::channel(256);
        let worker = spawn_broadcast_worker(registry, ingress, Vec::new());

        for seq in 0..100 {
            tx.send(trade("AAPL", seq)).await.unwrap();
        }

        for expected in 0..100 {
            let json = recv_json(&mut rx).await;
            assert_eq!(json["data"]["timestamp_ms"], expected);
        }

        drop(tx);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn slow_consumer_does_not_stall_others() {
        let registry = Arc::new(SessionRegistry::new());

        // Session A: tiny queue, write task never drains it
        let (slow_session, _slow_rx) = Session::new(4, SlowConsumerPolicy::default());
        registry.register(slow_session.clone());
        registry.subscribe(
            &slow_session,
            vec![ChannelKey::symbol(Channel::Trades, "AAPL")],
        );

        // Session B: healthy consumer of the same symbol
        let (fast_session, mut fast_rx) = Session::new(2048, SlowConsumerPolicy::default());
        registry.register(fast_session.clone());
        registry.subscribe(
            &fast_session,
            vec![ChannelKey::symbol(Channel::Trades, "AAPL")],
        );

        let (tx, ingress) = mpsc::channel(2048);
        let worker = spawn_broadcast_worker(registry, ingress, Vec::new());

        for seq in 0..1000 {
            tx.send(trade("AAPL", seq)).await.unwrap();
        }
        drop(tx);
        worker.await.unwrap();

        // B got the full stream in order
        for expected in 0..1000 {
            let json = recv_json(&mut fast_rx).await;
            assert_eq!(json["data"]["timestamp_ms"], expected);
        }

        // A shed everything past its queue capacity
        assert_eq!(slow_session.dropped(), 996);
    }

    #[tokio::test]
    async fn no_delivery_after_teardown() {
        let (registry, session, mut rx) =
            registry_with(&[(Channel::Trades, Some("AAPL"))], 16);
        let (tx, ingress) = mpsc::channel(16);
        let worker = spawn_broadcast_worker(registry.clone(), ingress, Vec::new());

        registry.remove_session(&session.id);

        tx.send(trade("AAPL", 1)).await.unwrap();
        drop(tx);
        worker.await.unwrap();

        assert!(rx.try_recv().is_err());
    }
}
