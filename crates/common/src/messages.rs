//! Control messages for dynamic upstream subscription management.

/// Commands that can be sent to a `FeedManager` to update subscriptions at runtime.
#[derive(Debug, Clone)]
pub enum ControlCommand {
    /// Subscribe to additional symbols
    Subscribe(Vec<String>),
    /// Unsubscribe from symbols
    Unsubscribe(Vec<String>),
    /// Graceful shutdown
    Shutdown,
}
