//! Symbol reference registry.
//!
//! Amortizes one upstream subscription across every downstream session that
//! needs the symbol. Only the 0↔≥1 transitions reach the upstream session:
//! `acquire` returns the symbols that just became referenced, `release` the
//! symbols that just lost their last referent.

use metrics::counter;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Process-wide symbol → reference count table.
///
/// Callers pass de-duplicated symbol sets; each call is atomic under one
/// lock so racing sessions observe a consistent net demand.
#[derive(Debug, Default)]
pub struct SymbolRefs {
    counts: Mutex<HashMap<String, usize>>,
}

impl SymbolRefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a reference on each symbol; returns those that now need an
    /// upstream subscribe (count went 0 → 1).
    pub fn acquire(&self, symbols: &[String]) -> Vec<String> {
        let mut counts = self.counts.lock().unwrap();
        let mut to_subscribe = Vec::new();
        for symbol in symbols {
            let count = counts.entry(symbol.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                to_subscribe.push(symbol.clone());
            }
        }
        to_subscribe
    }

    /// Drop a reference on each symbol; returns those that now need an
    /// upstream unsubscribe (count hit 0). A release without a matching
    /// acquire is a no-op recorded on a diagnostic counter.
    pub fn release(&self, symbols: &[String]) -> Vec<String> {
        let mut counts = self.counts.lock().unwrap();
        let mut to_unsubscribe = Vec::new();
        for symbol in symbols {
            match counts.get_mut(symbol) {
                Some(count) if *count > 1 => *count -= 1,
                Some(_) => {
                    counts.remove(symbol);
                    to_unsubscribe.push(symbol.clone());
                }
                None => {
                    counter!("gateway_dangling_symbol_releases_total").increment(1);
                    debug!("release of untracked symbol {}", symbol);
                }
            }
        }
        to_unsubscribe
    }

    /// Current reference count for a symbol (0 when absent).
    pub fn count(&self, symbol: &str) -> usize {
        self.counts.lock().unwrap().get(symbol).copied().unwrap_or(0)
    }

    /// Symbols currently referenced, sorted.
    pub fn tracked(&self) -> Vec<String> {
        let counts = self.counts.lock().unwrap();
        let mut symbols: Vec<String> = counts.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.counts.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn first_acquire_subscribes_last_release_unsubscribes() {
        let refs = SymbolRefs::new();

        // Session A subscribes to AAPL
        assert_eq!(refs.acquire(&syms(&["AAPL"])), syms(&["AAPL"]));
        // Session B subscribes to AAPL: already referenced upstream
        assert_eq!(refs.acquire(&syms(&["AAPL"])), Vec::<String>::new());
        assert_eq!(refs.count("AAPL"), 2);

        // A leaves: B still holds the symbol
        assert_eq!(refs.release(&syms(&["AAPL"])), Vec::<String>::new());
        assert_eq!(refs.count("AAPL"), 1);

        // B leaves: upstream unsubscribe
        assert_eq!(refs.release(&syms(&["AAPL"])), syms(&["AAPL"]));
        assert_eq!(refs.count("AAPL"), 0);
        assert!(refs.is_empty());
    }

    #[test]
    fn acquire_reports_only_new_symbols() {
        let refs = SymbolRefs::new();
        refs.acquire(&syms(&["AAPL"]));

        let to_subscribe = refs.acquire(&syms(&["AAPL", "TSLA"]));
        assert_eq!(to_subscribe, syms(&["TSLA"]));
        assert_eq!(refs.tracked(), syms(&["AAPL", "TSLA"]));
    }

    #[test]
    fn entry_absent_when_count_is_zero() {
        let refs = SymbolRefs::new();
        refs.acquire(&syms(&["NVDA"]));
        refs.release(&syms(&["NVDA"]));
        assert_eq!(refs.len(), 0);
        assert_eq!(refs.count("NVDA"), 0);
    }

    #[test]
    fn dangling_release_never_underflows() {
        let refs = SymbolRefs::new();
        assert_eq!(refs.release(&syms(&["GME"])), Vec::<String>::new());
        assert_eq!(refs.count("GME"), 0);

        // A later legitimate acquire starts cleanly at 1
        assert_eq!(refs.acquire(&syms(&["GME"])), syms(&["GME"]));
        assert_eq!(refs.count("GME"), 1);
    }
}
