//! Portfolio valuation at current quotes.

use std::fmt;
use std::str::FromStr;

use super::account::UserId;
use super::error::PapertradeError;
use super::money::Money;
use super::position::{last_trade_prices, positions};
use super::transaction::Transaction;
use crate::ports::ledger_port::LedgerPort;
use crate::ports::quote_port::QuotePort;

/// What to do with a held symbol whose quote cannot be fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingQuotePolicy {
    /// Leave the symbol out of the holdings and the total.
    #[default]
    Exclude,
    /// Value the symbol at its most recent trade price and flag it as stale.
    LastTradePrice,
}

impl FromStr for MissingQuotePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exclude" => Ok(Self::Exclude),
            "last_trade" | "last_trade_price" => Ok(Self::LastTradePrice),
            other => Err(format!(
                "unknown policy {other:?}, expected exclude or last_trade"
            )),
        }
    }
}

impl fmt::Display for MissingQuotePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exclude => f.write_str("exclude"),
            Self::LastTradePrice => f.write_str("last_trade"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holding {
    pub symbol: String,
    pub name: String,
    pub shares: i64,
    pub price: Money,
    pub value: Money,
    /// Priced from the ledger rather than a live quote.
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortfolioSummary {
    pub holdings: Vec<Holding>,
    /// Held symbols left out because no price was available.
    pub excluded: Vec<String>,
    pub cash: Money,
    pub total: Money,
}

/// Value every held symbol at its current quote and add the cash balance.
pub fn value_portfolio(
    transactions: &[Transaction],
    cash: Money,
    quotes: &dyn QuotePort,
    policy: MissingQuotePolicy,
) -> Result<PortfolioSummary, PapertradeError> {
    let overflow = || PapertradeError::invalid_input("portfolio value out of range");
    let last_prices = last_trade_prices(transactions);

    let mut holdings = Vec::new();
    let mut excluded = Vec::new();
    let mut total = cash;

    for (symbol, shares) in positions(transactions) {
        let (name, price, stale) = match quotes.lookup(&symbol) {
            Some(quote) => (quote.name, quote.price, false),
            None => match (policy, last_prices.get(&symbol)) {
                (MissingQuotePolicy::LastTradePrice, Some(price)) => {
                    (symbol.clone(), *price, true)
                }
                _ => {
                    tracing::debug!(%symbol, "no quote available, excluding from portfolio");
                    excluded.push(symbol);
                    continue;
                }
            },
        };

        let value = price.checked_mul(shares).ok_or_else(overflow)?;
        total = total.checked_add(value).ok_or_else(overflow)?;
        holdings.push(Holding {
            symbol,
            name,
            shares,
            price,
            value,
            stale,
        });
    }

    Ok(PortfolioSummary {
        holdings,
        excluded,
        cash,
        total,
    })
}

/// Load a user's ledger and value it. Used by the portfolio page and CLI.
pub fn load_portfolio(
    ledger: &dyn LedgerPort,
    quotes: &dyn QuotePort,
    user_id: UserId,
    policy: MissingQuotePolicy,
) -> Result<PortfolioSummary, PapertradeError> {
    let user = ledger
        .find_user(user_id)?
        .ok_or_else(|| PapertradeError::UserNotFound {
            user: user_id.to_string(),
        })?;
    let transactions = ledger.list_transactions(user_id)?;
    value_portfolio(&transactions, user.cash, quotes, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fixed_quote_adapter::FixedQuoteAdapter;
    use chrono::Utc;

    fn tx(id: i64, symbol: &str, share_delta: i64, price_cents: i64) -> Transaction {
        Transaction {
            id,
            user_id: 1,
            symbol: symbol.into(),
            share_delta,
            price: Money::from_cents(price_cents),
            transacted_at: Utc::now(),
        }
    }

    fn history() -> Vec<Transaction> {
        vec![
            tx(1, "AAPL", 10, 5000),
            tx(2, "AAPL", -4, 6000),
            tx(3, "GONE", 2, 1000),
        ]
    }

    #[test]
    fn values_holdings_at_current_quotes() {
        let quotes = FixedQuoteAdapter::new()
            .with_price("AAPL", Money::from_cents(7000))
            .with_price("GONE", Money::from_cents(1500));
        let summary = value_portfolio(
            &history(),
            Money::from_cents(74_000),
            &quotes,
            MissingQuotePolicy::Exclude,
        )
        .unwrap();

        assert_eq!(summary.holdings.len(), 2);
        assert_eq!(summary.holdings[0].symbol, "AAPL");
        assert_eq!(summary.holdings[0].shares, 6);
        assert_eq!(summary.holdings[0].value, Money::from_cents(42_000));
        assert_eq!(summary.holdings[1].value, Money::from_cents(3_000));
        assert_eq!(summary.total, Money::from_cents(74_000 + 42_000 + 3_000));
        assert!(summary.excluded.is_empty());
    }

    #[test]
    fn exclude_policy_drops_unpriced_symbols() {
        let quotes = FixedQuoteAdapter::new().with_price("AAPL", Money::from_cents(7000));
        let summary = value_portfolio(
            &history(),
            Money::from_cents(100),
            &quotes,
            MissingQuotePolicy::Exclude,
        )
        .unwrap();

        assert_eq!(summary.holdings.len(), 1);
        assert_eq!(summary.excluded, vec!["GONE".to_string()]);
        assert_eq!(summary.total, Money::from_cents(100 + 42_000));
    }

    #[test]
    fn last_trade_policy_uses_ledger_price() {
        let quotes = FixedQuoteAdapter::new().with_price("AAPL", Money::from_cents(7000));
        let summary = value_portfolio(
            &history(),
            Money::ZERO,
            &quotes,
            MissingQuotePolicy::LastTradePrice,
        )
        .unwrap();

        let gone = summary
            .holdings
            .iter()
            .find(|h| h.symbol == "GONE")
            .unwrap();
        assert!(gone.stale);
        assert_eq!(gone.price, Money::from_cents(1000));
        assert_eq!(gone.value, Money::from_cents(2000));
        assert!(summary.excluded.is_empty());
    }

    #[test]
    fn policy_parses_from_config_strings() {
        assert_eq!(
            "exclude".parse::<MissingQuotePolicy>().unwrap(),
            MissingQuotePolicy::Exclude
        );
        assert_eq!(
            " Last_Trade ".parse::<MissingQuotePolicy>().unwrap(),
            MissingQuotePolicy::LastTradePrice
        );
        assert!("stale".parse::<MissingQuotePolicy>().is_err());
    }
}
