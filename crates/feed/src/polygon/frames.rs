//! Outbound frame builders for the upstream protocol.
//!
//! The feed takes `{"action": ..., "params": ...}` frames. Subscription
//! params are comma-joined tokens, one per event-kind prefix per symbol:
//! `T.AAPL,Q.AAPL,A.AAPL`.

use serde::Serialize;

/// Event-kind prefixes enabled by the default subscription policy:
/// trades, quotes, and second aggregates.
pub const DEFAULT_PREFIXES: &[&str] = &["T", "Q", "A"];

#[derive(Debug, Serialize)]
struct RequestFrame<'a> {
    action: &'a str,
    params: String,
}

/// Build the credential frame sent right after the transport connects.
pub fn auth_frame(api_key: &str) -> String {
    let msg = RequestFrame {
        action: "auth",
        params: api_key.to_string(),
    };
    serde_json::to_string(&msg).unwrap()
}

/// Build a subscribe frame covering every enabled prefix for each symbol.
pub fn subscribe_frame<S: AsRef<str>>(symbols: &[S], prefixes: &[&str]) -> String {
    let msg = RequestFrame {
        action: "subscribe",
        params: subscription_params(symbols, prefixes),
    };
    serde_json::to_string(&msg).unwrap()
}

/// Build an unsubscribe frame with the same token layout as subscribe.
pub fn unsubscribe_frame<S: AsRef<str>>(symbols: &[S], prefixes: &[&str]) -> String {
    let msg = RequestFrame {
        action: "unsubscribe",
        params: subscription_params(symbols, prefixes),
    };
    serde_json::to_string(&msg).unwrap()
}

fn subscription_params<S: AsRef<str>>(symbols: &[S], prefixes: &[&str]) -> String {
    let mut tokens = Vec::with_capacity(symbols.len() * prefixes.len());
    for symbol in symbols {
        for prefix in prefixes {
            tokens.push(format!("{}.{}", prefix, symbol.as_ref()));
        }
    }
    tokens.join(",")
}
