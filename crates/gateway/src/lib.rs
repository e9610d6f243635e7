//! Real-time market-data fan-out gateway.
//!
//! This service:
//! - Holds one authenticated upstream connection to the market-data feed
//! - Accepts WebSocket connections from many downstream clients
//! - Reference-counts per-symbol demand so N subscribers share one upstream
//!   subscription
//! - Fans each normalized event out to matching sessions with bounded
//!   latency and per-client backpressure
//!
//! ## Architecture
//!
//! ```text
//! Upstream feed (wss, auth + reconnect)
//!         ↓ normalized events, try-send
//! Broadcast worker (bounded ingress, serialize once)
//!         ↓                               ↘ cache / durable sinks
//! SessionRegistry lookup (DashMap routing)
//!         ↓ try-send per session
//! Bounded outbound queues → WebSocket clients
//! ```
//!
//! ## Low-Latency Design
//!
//! - Lock-free session registry using DashMap
//! - Pre-serialized messages for broadcast
//! - Bounded queues everywhere with drop-on-full, so slow consumers shed
//!   load instead of leaking memory or stalling the hot path

pub mod broadcast;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod subscription;
pub mod symbols;
pub mod ws_server;

pub use broadcast::spawn_broadcast_worker;
pub use client::{Session, SessionId, SessionRegistry, SlowConsumerPolicy};
pub use config::Config;
pub use error::{GatewayError, Result};
pub use protocol::{Channel, ClientMessage, ServerMessage};
pub use subscription::{channel_keys, ChannelKey, SymbolScope};
pub use symbols::SymbolRefs;
pub use ws_server::{
    create_router, spawn_heartbeat_logger, spawn_stale_sweeper, AppState, SessionSettings,
};
