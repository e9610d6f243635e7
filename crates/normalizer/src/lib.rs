//! Normalized market event schema and upstream record adapters.
//!
//! The upstream feed speaks in batches of short-named records; downstream
//! everything works in terms of [`Event`]. This crate owns both shapes and
//! the translation between them.
//!
//! ```text
//! Upstream frame (JSON array) --> parse_batch --> RawRecord --> Event
//! ```

pub mod polygon;
pub mod schema;

pub use schema::{AggData, Event, EventKind, EventPayload, QuoteData, TradeData};
