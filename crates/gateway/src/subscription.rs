//! Channel keys: the unit of subscription.
//!
//! A channel key pairs a channel with a symbol scope. A subscribe request
//! with symbols expands into one key per symbol; without symbols it becomes
//! a single all-symbols key.

use crate::protocol::Channel;

/// Which symbols a subscription covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolScope {
    /// Every symbol flowing on the channel.
    All,
    /// One specific symbol.
    Symbol(String),
}

/// Identifies one logical subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub channel: Channel,
    pub scope: SymbolScope,
}

impl ChannelKey {
    pub fn all(channel: Channel) -> Self {
        Self {
            channel,
            scope: SymbolScope::All,
        }
    }

    pub fn symbol(channel: Channel, symbol: impl Into<String>) -> Self {
        Self {
            channel,
            scope: SymbolScope::Symbol(symbol.into()),
        }
    }

    /// The specific symbol this key references, if any.
    pub fn symbol_scope(&self) -> Option<&str> {
        match &self.scope {
            SymbolScope::All => None,
            SymbolScope::Symbol(s) => Some(s),
        }
    }
}

/// Expand a client subscribe/unsubscribe request into channel keys.
pub fn channel_keys(channel: Channel, symbols: &[String]) -> Vec<ChannelKey> {
    if symbols.is_empty() {
        vec![ChannelKey::all(channel)]
    } else {
        symbols
            .iter()
            .map(|s| ChannelKey::symbol(channel, s.clone()))
            .collect()
    }
}
