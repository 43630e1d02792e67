//! Finnhub quote adapter.
//!
//! Calls `GET {base_url}/quote?symbol=SYM&token=KEY` with a bounded timeout.
//! The `c` field is the current price; a missing, null or non-positive `c`
//! means the symbol is unknown.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::domain::error::PapertradeError;
use crate::domain::money::Money;
use crate::domain::quote::{is_valid_symbol, normalize_symbol, Quote};
use crate::ports::config_port::ConfigPort;
use crate::ports::quote_port::QuotePort;

pub const DEFAULT_BASE_URL: &str = "https://finnhub.io/api/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
const API_KEY_ENV: &str = "FINNHUB_API_KEY";

#[derive(Debug, Deserialize)]
struct FinnhubQuote {
    c: Option<f64>,
}

pub struct FinnhubAdapter {
    client: Client,
    base_url: String,
    api_key: String,
}

impl FinnhubAdapter {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PapertradeError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| PapertradeError::Http {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PapertradeError> {
        let base_url = config
            .get_string("quotes", "base_url")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let api_key = config
            .get_string("quotes", "api_key")
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .unwrap_or_default();
        if api_key.is_empty() {
            tracing::warn!("no Finnhub API key configured, quote lookups will fail");
        }
        let timeout_secs = config.get_int("quotes", "timeout_secs", DEFAULT_TIMEOUT_SECS as i64);
        let timeout_secs = u64::try_from(timeout_secs).unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self::new(base_url, api_key, Duration::from_secs(timeout_secs))
    }

    fn fetch(&self, symbol: &str) -> Result<FinnhubQuote, reqwest::Error> {
        self.client
            .get(format!("{}/quote", self.base_url))
            .query(&[("symbol", symbol), ("token", self.api_key.as_str())])
            .send()?
            .error_for_status()?
            .json::<FinnhubQuote>()
    }
}

/// Turn a decoded response into a quote, rejecting empty or non-positive prices.
fn to_quote(symbol: String, response: &FinnhubQuote) -> Option<Quote> {
    let price = response.c.filter(|c| *c > 0.0).and_then(Money::from_dollars)?;
    if !price.is_positive() {
        return None;
    }
    Some(Quote {
        name: symbol.clone(),
        symbol,
        price,
    })
}

impl QuotePort for FinnhubAdapter {
    fn lookup(&self, symbol: &str) -> Option<Quote> {
        let symbol = normalize_symbol(symbol);
        if !is_valid_symbol(&symbol) {
            return None;
        }

        match self.fetch(&symbol) {
            Ok(response) => {
                let quote = to_quote(symbol.clone(), &response);
                if quote.is_none() {
                    tracing::debug!(%symbol, "finnhub returned no price");
                }
                quote
            }
            Err(e) => {
                tracing::warn!(%symbol, error = %e, timeout = e.is_timeout(), "finnhub request failed");
                None
            }
        }
    }
}
