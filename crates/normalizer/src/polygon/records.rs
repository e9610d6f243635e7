//! Raw record types for the upstream wire format.
//!
//! Upstream frames are JSON arrays of records tagged by an `ev` field, with
//! the feed's short field names consumed verbatim (`sym`, `p`, `s`, `bp`,
//! `vw`, ...). Status records share the stream with data records and drive
//! the session's auth state machine.

use serde::Deserialize;

/// One record from an upstream batch, dispatched on the `ev` tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "ev")]
pub enum RawRecord {
    #[serde(rename = "T")]
    Trade(TradeRecord),
    #[serde(rename = "Q")]
    Quote(QuoteRecord),
    #[serde(rename = "A")]
    AggSecond(AggRecord),
    #[serde(rename = "AM")]
    AggMinute(AggRecord),
    #[serde(rename = "status")]
    Status(StatusRecord),
    /// Record types this gateway does not consume; dropped, never an error.
    #[serde(other)]
    Unknown,
}

/// Trade record (`ev == "T"`).
#[derive(Debug, Clone, Deserialize)]
pub struct TradeRecord {
    pub sym: String,
    /// Price.
    pub p: f64,
    /// Size.
    #[serde(default)]
    pub s: u64,
    /// Exchange identifier.
    #[serde(default)]
    pub x: i64,
    /// SIP timestamp in milliseconds.
    #[serde(default)]
    pub t: i64,
    /// Condition codes; the feed sends a single integer or a list.
    #[serde(default)]
    pub c: Option<Conditions>,
}

/// Quote record (`ev == "Q"`).
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteRecord {
    pub sym: String,
    #[serde(default)]
    pub bp: f64,
    #[serde(default)]
    pub bs: u64,
    #[serde(default)]
    pub ap: f64,
    #[serde(default, rename = "as")]
    pub ask_size: u64,
    #[serde(default)]
    pub t: i64,
}

/// Aggregate bar record (`ev == "A"` or `"AM"`).
#[derive(Debug, Clone, Deserialize)]
pub struct AggRecord {
    pub sym: String,
    #[serde(default)]
    pub o: f64,
    #[serde(default)]
    pub h: f64,
    #[serde(default)]
    pub l: f64,
    #[serde(default)]
    pub c: f64,
    #[serde(default)]
    pub v: u64,
    #[serde(default)]
    pub vw: f64,
    /// Trade count for the window.
    #[serde(default)]
    pub n: u64,
    /// Window start, milliseconds.
    #[serde(default)]
    pub s: i64,
    /// Window end, milliseconds.
    #[serde(default)]
    pub e: i64,
    #[serde(default)]
    pub t: i64,
}

impl AggRecord {
    /// Best available timestamp: explicit `t`, else window end, else start.
    pub fn timestamp_ms(&self) -> i64 {
        if self.t != 0 {
            self.t
        } else if self.e != 0 {
            self.e
        } else {
            self.s
        }
    }
}

/// Status record (`ev == "status"`). Drives authentication and surfaces
/// informational or error notices.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusRecord {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

/// Trade conditions arrive as either a bare integer or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Conditions {
    One(i64),
    Many(Vec<i64>),
}

impl Conditions {
    pub fn into_vec(self) -> Vec<i64> {
        match self {
            Conditions::One(c) => vec![c],
            Conditions::Many(cs) => cs,
        }
    }
}
