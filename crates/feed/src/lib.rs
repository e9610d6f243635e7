//! Upstream market-data session and write-through event sinks.
//!
//! The [`polygon`] module implements the feed side of the gateway: the
//! handler that `common::FeedManager` drives through connect, auth, and
//! reconnect, translating subscription deltas into upstream frames and
//! inbound batches into normalized events.
//!
//! The [`sink`] module (with the [`cache`] and [`durable`] implementations)
//! carries events to the hot cache and the durable store without ever
//! touching broadcast latency.

pub mod cache;
pub mod durable;
pub mod error;
pub mod polygon;
pub mod sink;

pub use cache::CacheSink;
pub use durable::DurableSink;
pub use error::{Error, Result};
pub use polygon::{PolygonConfig, PolygonHandler};
pub use sink::{spawn_sink_worker, EventSink, SinkHandle};
