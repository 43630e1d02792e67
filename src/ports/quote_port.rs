//! Quote provider port trait.

use crate::domain::quote::Quote;

/// Source of current prices.
///
/// Implementations must bound their own latency. Every failure mode (unknown
/// ticker, timeout, bad response) collapses to `None`.
pub trait QuotePort: Send + Sync {
    fn lookup(&self, symbol: &str) -> Option<Quote>;
}
