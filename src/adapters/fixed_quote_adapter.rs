//! Quote adapter backed by a fixed price table.
//!
//! Used for offline runs (`[quotes] provider = fixed`) and as the
//! deterministic fake in tests. Prices can be changed at runtime.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::error::PapertradeError;
use crate::domain::money::Money;
use crate::domain::quote::{normalize_symbol, Quote};
use crate::ports::config_port::ConfigPort;
use crate::ports::quote_port::QuotePort;

#[derive(Debug, Default)]
pub struct FixedQuoteAdapter {
    prices: RwLock<HashMap<String, Money>>,
}

impl FixedQuoteAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, symbol: &str, price: Money) -> Self {
        self.set_price(symbol, price);
        self
    }

    pub fn set_price(&self, symbol: &str, price: Money) {
        if let Ok(mut prices) = self.prices.write() {
            prices.insert(normalize_symbol(symbol), price);
        }
    }

    /// Make a symbol unresolvable, as if the provider stopped listing it.
    pub fn remove(&self, symbol: &str) {
        if let Ok(mut prices) = self.prices.write() {
            prices.remove(&normalize_symbol(symbol));
        }
    }

    /// Parse `SYMBOL:PRICE` pairs separated by commas, e.g.
    /// `AAPL:150.00, MSFT:300`.
    pub fn parse(spec: &str) -> Result<Self, PapertradeError> {
        let adapter = Self::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (symbol, price) = entry.split_once(':').ok_or_else(|| {
                PapertradeError::invalid_input(format!(
                    "expected SYMBOL:PRICE, got {entry:?}"
                ))
            })?;
            let price = Money::parse(price)?;
            if !price.is_positive() {
                return Err(PapertradeError::invalid_input(format!(
                    "price for {symbol} must be positive"
                )));
            }
            adapter.set_price(symbol, price);
        }
        Ok(adapter)
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PapertradeError> {
        let spec = config.get_string("quotes", "fixed_prices").ok_or_else(|| {
            PapertradeError::ConfigMissing {
                section: "quotes".into(),
                key: "fixed_prices".into(),
            }
        })?;
        Self::parse(&spec).map_err(|e| PapertradeError::ConfigInvalid {
            section: "quotes".into(),
            key: "fixed_prices".into(),
            reason: e.to_string(),
        })
    }
}

impl QuotePort for FixedQuoteAdapter {
    fn lookup(&self, symbol: &str) -> Option<Quote> {
        let symbol = normalize_symbol(symbol);
        let price = *self.prices.read().ok()?.get(&symbol)?;
        Some(Quote {
            name: symbol.clone(),
            symbol,
            price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    #[test]
    fn lookup_is_case_insensitive() {
        let quotes = FixedQuoteAdapter::new().with_price("aapl", Money::from_cents(15000));
        let quote = quotes.lookup(" AaPl ").unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.price, Money::from_cents(15000));
        assert!(quotes.lookup("MSFT").is_none());
    }

    #[test]
    fn prices_can_change_and_disappear() {
        let quotes = FixedQuoteAdapter::new().with_price("AAPL", Money::from_cents(100));
        quotes.set_price("AAPL", Money::from_cents(200));
        assert_eq!(quotes.lookup("AAPL").unwrap().price, Money::from_cents(200));
        quotes.remove("AAPL");
        assert!(quotes.lookup("AAPL").is_none());
    }

    #[test]
    fn parse_price_table() {
        let quotes = FixedQuoteAdapter::parse("AAPL:150.00, msft:300").unwrap();
        assert_eq!(quotes.lookup("AAPL").unwrap().price, Money::from_cents(15000));
        assert_eq!(quotes.lookup("MSFT").unwrap().price, Money::from_cents(30000));
    }

    #[test]
    fn parse_rejects_bad_entries() {
        assert!(FixedQuoteAdapter::parse("AAPL").is_err());
        assert!(FixedQuoteAdapter::parse("AAPL:abc").is_err());
        assert!(FixedQuoteAdapter::parse("AAPL:0").is_err());
    }

    #[test]
    fn from_config_reports_section_and_key() {
        let config =
            FileConfigAdapter::from_string("[quotes]\nfixed_prices = AAPL:oops\n").unwrap();
        match FixedQuoteAdapter::from_config(&config) {
            Err(PapertradeError::ConfigInvalid { section, key, .. }) => {
                assert_eq!(section, "quotes");
                assert_eq!(key, "fixed_prices");
            }
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }
}
