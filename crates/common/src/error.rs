//! Error types for the upstream feed connection.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Timed out waiting for authentication")]
    AuthTimeout,

    #[error("Reconnect attempts exhausted after {0} tries")]
    AttemptsExhausted(u32),

    #[error("Generic error: {0}")]
    Generic(String),
}

impl Error {
    /// Whether this error permanently ends the upstream session.
    /// Everything else is transient and handled by the reconnect loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::AuthFailed(_) | Error::AttemptsExhausted(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
