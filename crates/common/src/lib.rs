//! Shared upstream-transport plumbing for the market-data gateway.

pub mod backoff;
pub mod error;
pub mod feed_handler;
pub mod feed_manager;
pub mod messages;

pub use backoff::{Backoff, BackoffConfig};
pub use error::{Error, Result};
pub use feed_handler::FeedHandler;
pub use feed_manager::{FeedManager, FeedManagerConfig};
pub use messages::ControlCommand;
