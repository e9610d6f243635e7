//! Feed handler trait for upstream market-data adapters.

use crate::error::Result;
use crate::messages::ControlCommand;
use async_trait::async_trait;

/// Trait that upstream feed adapters implement to handle connection events.
/// The `FeedManager` calls these methods as the connection lifecycle unfolds.
#[async_trait]
pub trait FeedHandler: Send + Sync + 'static {
    /// Returns the WebSocket URL to connect to.
    fn url(&self) -> &str;

    /// Returns the frame to send immediately after the transport connects
    /// (e.g., the credential frame). Return None if no handshake is needed.
    fn on_connect_message(&self) -> Option<String>;

    /// Whether the session has completed authentication and can service
    /// subscription commands.
    fn is_ready(&self) -> bool;

    /// Called when a text frame is received from the upstream.
    ///
    /// Returns any frames the manager should write back (e.g., the batched
    /// resubscribe issued after a successful re-authentication). A returned
    /// `Error::AuthFailed` terminates the session permanently.
    async fn on_message(&self, msg: &str) -> Result<Vec<String>>;

    /// Called when the connection is lost, before any reconnect attempt.
    async fn on_disconnect(&self);

    /// Handle a subscribe/unsubscribe command.
    ///
    /// Returns the frame to send upstream, or None when nothing needs to go
    /// out (command was a no-op, or the session is not ready and the request
    /// was buffered for the next ready state).
    async fn handle_command(&self, cmd: ControlCommand) -> Option<String>;

    /// Symbols currently subscribed upstream.
    fn subscribed_symbols(&self) -> Vec<String>;
}
