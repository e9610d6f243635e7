//! Normalized market event schema definitions.

use serde::{Deserialize, Serialize};

/// Kind of market event, derived from the upstream record tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Executed trade.
    Trade,
    /// Top-of-book quote update.
    Quote,
    /// Per-second aggregate bar.
    AggSec,
    /// Per-minute aggregate bar.
    AggMin,
}

impl EventKind {
    /// The upstream short code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            EventKind::Trade => "T",
            EventKind::Quote => "Q",
            EventKind::AggSec => "A",
            EventKind::AggMin => "AM",
        }
    }
}

/// Trade payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeData {
    pub price: f64,
    pub size: u64,
    /// Upstream exchange identifier.
    pub exchange: i64,
    /// Trade condition codes, empty when the upstream omits them.
    #[serde(default)]
    pub conditions: Vec<i64>,
}

/// Quote payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteData {
    pub bid_price: f64,
    pub bid_size: u64,
    pub ask_price: f64,
    pub ask_size: u64,
}

/// Aggregate bar payload, shared by second and minute bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggData {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub vwap: f64,
    pub trade_count: u64,
}

/// Event payload variants. Serializes as the bare payload object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Trade(TradeData),
    Quote(QuoteData),
    Agg(AggData),
}

/// A normalized record from the upstream feed.
///
/// Events are immutable once built; the broadcast path and the sinks share
/// them behind `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub symbol: String,
    pub timestamp_ms: i64,
    pub payload: EventPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes_match_upstream_tags() {
        assert_eq!(EventKind::Trade.code(), "T");
        assert_eq!(EventKind::Quote.code(), "Q");
        assert_eq!(EventKind::AggSec.code(), "A");
        assert_eq!(EventKind::AggMin.code(), "AM");
    }

    #[test]
    fn payload_serializes_without_variant_tag() {
        let payload = EventPayload::Trade(TradeData {
            price: 150.25,
            size: 100,
            exchange: 4,
            conditions: vec![12],
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["price"], 150.25);
        assert_eq!(json["size"], 100);
        assert!(json.get("Trade").is_none());
    }

    #[test]
    fn quote_payload_round_trips() {
        let payload = EventPayload::Quote(QuoteData {
            bid_price: 150.20,
            bid_size: 300,
            ask_price: 150.30,
            ask_size: 200,
        });
        let json = serde_json::to_string(&payload).unwrap();
        let back: EventPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }
}
