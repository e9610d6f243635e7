//! Hot-data cache sink over Redis.
//!
//! Keeps the latest value per symbol under short TTLs so dashboard-style
//! readers can answer without touching the durable store. Strictly
//! best-effort: a write failure costs a counter and a log line, nothing else.

use crate::error::Result;
use crate::sink::EventSink;
use async_trait::async_trait;
use normalizer::{Event, EventPayload};
use redis::AsyncCommands;

const TTL_PRICE_SECS: u64 = 300;
const TTL_AGG_SECS: u64 = 900;

/// Redis-backed latest-value cache.
pub struct CacheSink {
    conn: redis::aio::MultiplexedConnection,
}

impl CacheSink {
    /// Connect to the cache endpoint (e.g., `redis://localhost:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl EventSink for CacheSink {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn write(&self, event: &Event) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&event.payload)?;
        match &event.payload {
            EventPayload::Trade(trade) => {
                conn.set_ex::<_, _, ()>(format!("price:{}", event.symbol), trade.price, TTL_PRICE_SECS)
                    .await?;
                conn.set_ex::<_, _, ()>(format!("trade:{}", event.symbol), payload, TTL_PRICE_SECS)
                    .await?;
            }
            EventPayload::Quote(_) => {
                conn.set_ex::<_, _, ()>(format!("quote:{}", event.symbol), payload, TTL_PRICE_SECS)
                    .await?;
            }
            EventPayload::Agg(_) => {
                conn.set_ex::<_, _, ()>(
                    format!("agg:1min:{}", event.symbol),
                    payload,
                    TTL_AGG_SECS,
                )
                .await?;
            }
        }
        Ok(())
    }
}
