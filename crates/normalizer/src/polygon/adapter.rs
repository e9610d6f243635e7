//! Batch parsing and normalization of upstream records.

use crate::polygon::records::RawRecord;
use crate::schema::{AggData, Event, EventKind, EventPayload, QuoteData, TradeData};
use tracing::debug;

/// Parse one upstream frame (a JSON array of records) into raw records.
///
/// A malformed record is dropped and the rest of the batch survives; only a
/// frame that is not a JSON array at all fails. Unknown record types come
/// back as [`RawRecord::Unknown`] so the caller can count them.
pub fn parse_batch(text: &str) -> serde_json::Result<Vec<RawRecord>> {
    let values: Vec<serde_json::Value> = serde_json::from_str(text)?;
    let records = values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<RawRecord>(value) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("dropping malformed upstream record: {}", e);
                None
            }
        })
        .collect();
    Ok(records)
}

impl RawRecord {
    /// Normalize a data record into an [`Event`].
    ///
    /// Status and unknown records return None; they carry no market data.
    pub fn into_event(self) -> Option<Event> {
        match self {
            RawRecord::Trade(t) => Some(Event {
                kind: EventKind::Trade,
                timestamp_ms: t.t,
                payload: EventPayload::Trade(TradeData {
                    price: t.p,
                    size: t.s,
                    exchange: t.x,
                    conditions: t.c.map(|c| c.into_vec()).unwrap_or_default(),
                }),
                symbol: t.sym,
            }),
            RawRecord::Quote(q) => Some(Event {
                kind: EventKind::Quote,
                timestamp_ms: q.t,
                payload: EventPayload::Quote(QuoteData {
                    bid_price: q.bp,
                    bid_size: q.bs,
                    ask_price: q.ap,
                    ask_size: q.ask_size,
                }),
                symbol: q.sym,
            }),
            RawRecord::AggSecond(a) => Some(Self::agg_event(EventKind::AggSec, a)),
            RawRecord::AggMinute(a) => Some(Self::agg_event(EventKind::AggMin, a)),
            RawRecord::Status(_) | RawRecord::Unknown => None,
        }
    }

    fn agg_event(kind: EventKind, a: crate::polygon::records::AggRecord) -> Event {
        Event {
            kind,
            timestamp_ms: a.timestamp_ms(),
            payload: EventPayload::Agg(AggData {
                open: a.o,
                high: a.h,
                low: a.l,
                close: a.c,
                volume: a.v,
                vwap: a.vw,
                trade_count: a.n,
            }),
            symbol: a.sym,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trade_record() {
        let batch = r#"[{"ev":"T","sym":"AAPL","p":150.25,"s":100,"x":4,"t":1700000000000}]"#;
        let records = parse_batch(batch).unwrap();
        assert_eq!(records.len(), 1);

        let event = records.into_iter().next().unwrap().into_event().unwrap();
        assert_eq!(event.kind, EventKind::Trade);
        assert_eq!(event.symbol, "AAPL");
        assert_eq!(event.timestamp_ms, 1700000000000);
        match event.payload {
            EventPayload::Trade(t) => {
                assert_eq!(t.price, 150.25);
                assert_eq!(t.size, 100);
                assert_eq!(t.exchange, 4);
                assert!(t.conditions.is_empty());
            }
            other => panic!("expected trade payload, got {:?}", other),
        }
    }

    #[test]
    fn parses_quote_record() {
        let batch = r#"[{"ev":"Q","sym":"TSLA","bp":244.10,"bs":5,"ap":244.15,"as":3,"t":1700000001000}]"#;
        let records = parse_batch(batch).unwrap();
        let event = records.into_iter().next().unwrap().into_event().unwrap();
        assert_eq!(event.kind, EventKind::Quote);
        match event.payload {
            EventPayload::Quote(q) => {
                assert_eq!(q.bid_price, 244.10);
                assert_eq!(q.ask_size, 3);
            }
            other => panic!("expected quote payload, got {:?}", other),
        }
    }

    #[test]
    fn parses_minute_aggregate() {
        let batch = r#"[{"ev":"AM","sym":"NVDA","o":495.0,"h":497.5,"l":494.2,"c":496.8,"v":120000,"vw":496.1,"n":830,"s":1700000000000,"e":1700000060000}]"#;
        let records = parse_batch(batch).unwrap();
        let event = records.into_iter().next().unwrap().into_event().unwrap();
        assert_eq!(event.kind, EventKind::AggMin);
        // No explicit t, falls back to the window end
        assert_eq!(event.timestamp_ms, 1700000060000);
        match event.payload {
            EventPayload::Agg(a) => {
                assert_eq!(a.close, 496.8);
                assert_eq!(a.trade_count, 830);
            }
            other => panic!("expected aggregate payload, got {:?}", other),
        }
    }

    #[test]
    fn status_records_carry_no_event() {
        let batch = r#"[{"ev":"status","status":"auth_success","message":"authenticated"}]"#;
        let records = parse_batch(batch).unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], RawRecord::Status(_)));
        assert!(records.into_iter().next().unwrap().into_event().is_none());
    }

    #[test]
    fn malformed_record_does_not_fail_batch() {
        let batch = r#"[{"ev":"T","sym":"AAPL","p":"not-a-number"},{"ev":"T","sym":"MSFT","p":420.5,"s":10,"x":11,"t":1700000002000}]"#;
        let records = parse_batch(batch).unwrap();
        assert_eq!(records.len(), 1);
        let event = records.into_iter().next().unwrap().into_event().unwrap();
        assert_eq!(event.symbol, "MSFT");
    }

    #[test]
    fn unknown_record_types_fall_through() {
        let batch = r#"[{"ev":"LULD","sym":"AAPL","t":1700000000000},{"ev":"status","status":"success","message":"subscribed"}]"#;
        let records = parse_batch(batch).unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], RawRecord::Unknown));
    }

    #[test]
    fn non_array_frame_is_an_error() {
        assert!(parse_batch(r#"{"ev":"T"}"#).is_err());
        assert!(parse_batch("not json").is_err());
    }

    #[test]
    fn conditions_accept_int_or_list() {
        let batch = r#"[
            {"ev":"T","sym":"A","p":1.0,"s":1,"x":1,"t":1,"c":12},
            {"ev":"T","sym":"B","p":1.0,"s":1,"x":1,"t":1,"c":[14,37]}
        ]"#;
        let records = parse_batch(batch).unwrap();
        let events: Vec<Event> = records.into_iter().filter_map(|r| r.into_event()).collect();
        match (&events[0].payload, &events[1].payload) {
            (EventPayload::Trade(a), EventPayload::Trade(b)) => {
                assert_eq!(a.conditions, vec![12]);
                assert_eq!(b.conditions, vec![14, 37]);
            }
            _ => panic!("expected trade payloads"),
        }
    }
}
