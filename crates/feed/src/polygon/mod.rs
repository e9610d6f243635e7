//! Polygon-style upstream feed session.

mod frames;
mod handler;

pub use frames::{auth_frame, subscribe_frame, unsubscribe_frame, DEFAULT_PREFIXES};
pub use handler::{PolygonConfig, PolygonHandler};
