//! Environment-driven configuration.
//!
//! Every knob has a default good enough for local development; production
//! overrides come from the environment (or a `.env` file via dotenvy).

use crate::client::SlowConsumerPolicy;
use crate::ws_server::SessionSettings;
use common::BackoffConfig;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket listen port.
    pub port: u16,
    /// Prometheus exporter port.
    pub metrics_port: u16,
    /// CORS allow-list; `*` means permissive.
    pub allowed_origins: Vec<String>,
    /// Upstream credential; empty disables the feed.
    pub api_key: String,
    /// Upstream WebSocket endpoint.
    pub feed_url: String,
    /// Hot cache endpoint; None disables the cache sink.
    pub cache_url: Option<String>,
    /// Durable ingest endpoint; None disables the durable sink.
    pub durable_url: Option<String>,
    /// Symbols pinned upstream for the process lifetime.
    pub warmup_symbols: Vec<String>,

    pub session_queue_capacity: usize,
    pub ingress_capacity: usize,
    pub sink_queue_capacity: usize,
    pub heartbeat_interval: Duration,
    pub write_deadline: Duration,
    pub cleanup_interval: Duration,
    pub stale_after: Duration,
    pub slow_max_drops: u64,
    pub slow_window: Duration,

    pub feed_read_timeout: Duration,
    pub feed_auth_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_reconnect_attempts: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", 8080),
            metrics_port: env_parse("METRICS_PORT", 9093),
            allowed_origins: split_list(&env_or("ALLOWED_ORIGINS", "*")),
            api_key: env_or("POLYGON_API_KEY", ""),
            feed_url: env_or("POLYGON_WS_URL", "wss://socket.polygon.io/stocks"),
            cache_url: env_opt("CACHE_URL"),
            durable_url: env_opt("DURABLE_URL"),
            warmup_symbols: split_list(&env_or("WARMUP_SYMBOLS", "")),
            session_queue_capacity: env_parse("SESSION_QUEUE_CAPACITY", 256),
            ingress_capacity: env_parse("BROADCAST_INGRESS_CAPACITY", 1024),
            sink_queue_capacity: env_parse("SINK_QUEUE_CAPACITY", 256),
            heartbeat_interval: env_secs("HEARTBEAT_INTERVAL_SECS", 30),
            write_deadline: env_secs("WRITE_DEADLINE_SECS", 10),
            cleanup_interval: env_secs("CLEANUP_INTERVAL_SECS", 60),
            stale_after: env_secs("STALE_AFTER_SECS", 120),
            slow_max_drops: env_parse("SLOW_CONSUMER_MAX_DROPS", 500),
            slow_window: env_secs("SLOW_CONSUMER_WINDOW_SECS", 10),
            feed_read_timeout: env_secs("FEED_READ_TIMEOUT_SECS", 60),
            feed_auth_timeout: env_secs("FEED_AUTH_TIMEOUT_SECS", 10),
            backoff_base: env_secs("FEED_BACKOFF_BASE_SECS", 5),
            backoff_max: env_secs("FEED_BACKOFF_MAX_SECS", 30),
            max_reconnect_attempts: env_parse("FEED_MAX_RECONNECT_ATTEMPTS", 10),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            queue_capacity: self.session_queue_capacity,
            heartbeat_interval: self.heartbeat_interval,
            write_deadline: self.write_deadline,
            slow: SlowConsumerPolicy {
                max_drops: self.slow_max_drops,
                window: self.slow_window,
            },
        }
    }

    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base: self.backoff_base,
            max: self.backoff_max,
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr + Display + Copy>(key: &str, default: T) -> T
where
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(e) => {
                warn!("{}={} is invalid ({}), using default {}", key, raw, e, default);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_parse(key, default_secs))
}

/// Split a comma-separated list, trimming whitespace and dropping empties.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_and_trims_lists() {
        assert_eq!(split_list("AAPL, TSLA ,NVDA"), vec!["AAPL", "TSLA", "NVDA"]);
        assert_eq!(split_list(""), Vec::<String>::new());
        assert_eq!(split_list(" , ,"), Vec::<String>::new());
        assert_eq!(split_list("*"), vec!["*"]);
    }
}
