//! Polygon-style upstream record parsing and normalization.

mod adapter;
mod records;

pub use adapter::parse_batch;
pub use records::{AggRecord, QuoteRecord, RawRecord, StatusRecord, TradeRecord};
