//! WebSocket protocol message types.
//!
//! Defines the JSON message format for client-server communication.

use chrono::Utc;
use normalizer::{Event, EventKind, EventPayload};
use serde::{Deserialize, Serialize};

/// Logical stream a client can subscribe to. `market-data` is the generic
/// channel that carries every event kind for its symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    Trades,
    Quotes,
    Aggregates,
    MarketData,
}

impl Channel {
    /// The channel an event kind is routed on.
    pub fn for_kind(kind: EventKind) -> Self {
        match kind {
            EventKind::Trade => Channel::Trades,
            EventKind::Quote => Channel::Quotes,
            EventKind::AggSec | EventKind::AggMin => Channel::Aggregates,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Trades => "trades",
            Channel::Quotes => "quotes",
            Channel::Aggregates => "aggregates",
            Channel::MarketData => "market-data",
        }
    }
}

// ============================================================================
// Client → Server Messages
// ============================================================================

/// Message sent from client to server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Subscribe to a channel, optionally scoped to specific symbols.
    Subscribe {
        channel: Channel,
        #[serde(default)]
        symbols: Vec<String>,
    },
    /// Unsubscribe from a channel; without symbols, drops every
    /// subscription the session holds on that channel.
    Unsubscribe {
        channel: Channel,
        #[serde(default)]
        symbols: Vec<String>,
    },
    /// Application-level keepalive.
    Ping,
}

// ============================================================================
// Server → Client Messages
// ============================================================================

/// Message sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Confirmation of subscription.
    Subscribed {
        channel: Channel,
        symbols: Vec<String>,
        timestamp: i64,
    },
    /// Confirmation of unsubscription.
    Unsubscribed { channel: Channel, timestamp: i64 },
    /// Pong response to ping.
    Pong { timestamp: i64 },
    /// A market event for one of the session's subscriptions.
    MarketData {
        channel: Channel,
        data: MarketDataBody,
        symbols: Vec<String>,
        timestamp: i64,
        metadata: MessageMetadata,
    },
    /// Error message.
    Error { reason: String },
}

/// The `data` object of a market-data message: the normalized payload plus
/// the symbol and the upstream event time.
#[derive(Debug, Clone, Serialize)]
pub struct MarketDataBody {
    pub symbol: String,
    pub timestamp_ms: i64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Provenance attached to each market-data message.
#[derive(Debug, Clone, Serialize)]
pub struct MessageMetadata {
    pub source: &'static str,
    pub event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<i64>,
}

impl ServerMessage {
    /// Build the market-data message for an event. Serialized once per
    /// broadcast by the caller, never per recipient.
    pub fn market_data(event: &Event) -> Self {
        let exchange = match &event.payload {
            EventPayload::Trade(trade) => Some(trade.exchange),
            _ => None,
        };
        ServerMessage::MarketData {
            channel: Channel::for_kind(event.kind),
            data: MarketDataBody {
                symbol: event.symbol.clone(),
                timestamp_ms: event.timestamp_ms,
                payload: event.payload.clone(),
            },
            symbols: vec![event.symbol.clone()],
            timestamp: Utc::now().timestamp_millis(),
            metadata: MessageMetadata {
                source: "polygon",
                event_type: event.kind.code(),
                exchange,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use normalizer::TradeData;

    #[test]
    fn parses_subscribe_with_symbols() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"subscribe","channel":"trades","symbols":["AAPL","TSLA"]}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Subscribe { channel, symbols } => {
                assert_eq!(channel, Channel::Trades);
                assert_eq!(symbols, vec!["AAPL", "TSLA"]);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn parses_subscribe_without_symbols() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","channel":"market-data"}"#).unwrap();
        match msg {
            ClientMessage::Subscribe { channel, symbols } => {
                assert_eq!(channel, Channel::MarketData);
                assert!(symbols.is_empty());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn parses_ping() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"order","symbol":"AAPL"}"#).is_err());
    }

    #[test]
    fn market_data_message_shape() {
        let event = Event {
            kind: normalizer::EventKind::Trade,
            symbol: "AAPL".to_string(),
            timestamp_ms: 1_700_000_000_000,
            payload: EventPayload::Trade(TradeData {
                price: 150.25,
                size: 100,
                exchange: 4,
                conditions: vec![],
            }),
        };
        let json = serde_json::to_value(ServerMessage::market_data(&event)).unwrap();

        assert_eq!(json["type"], "market-data");
        assert_eq!(json["channel"], "trades");
        assert_eq!(json["symbols"], serde_json::json!(["AAPL"]));
        assert_eq!(json["data"]["symbol"], "AAPL");
        assert_eq!(json["data"]["price"], 150.25);
        assert_eq!(json["data"]["size"], 100);
        assert_eq!(json["data"]["timestamp_ms"], 1_700_000_000_000i64);
        assert_eq!(json["metadata"]["source"], "polygon");
        assert_eq!(json["metadata"]["event_type"], "T");
        assert_eq!(json["metadata"]["exchange"], 4);
    }

    #[test]
    fn confirmation_message_shape() {
        let json = serde_json::to_value(ServerMessage::Subscribed {
            channel: Channel::Trades,
            symbols: vec!["AAPL".to_string()],
            timestamp: 123,
        })
        .unwrap();
        assert_eq!(json["type"], "subscribed");
        assert_eq!(json["channel"], "trades");

        let json = serde_json::to_value(ServerMessage::Pong { timestamp: 456 }).unwrap();
        assert_eq!(json["type"], "pong");
        assert_eq!(json["timestamp"], 456);
    }

    #[test]
    fn aggregate_kinds_share_a_channel() {
        assert_eq!(Channel::for_kind(normalizer::EventKind::AggSec), Channel::Aggregates);
        assert_eq!(Channel::for_kind(normalizer::EventKind::AggMin), Channel::Aggregates);
    }
}
