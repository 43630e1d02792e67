//! HTML templates using Askama.
//!
//! Page templates render only the content block. Full page loads wrap that
//! block in [`BasePage`]; HTMX requests receive it as is.

use askama::Template;

use crate::domain::money::Money;
use crate::domain::portfolio::PortfolioSummary;
use crate::domain::quote::Quote;
use crate::domain::transaction::Transaction;

#[derive(Template)]
#[template(path = "base.html")]
pub struct BasePage<'a> {
    pub title: &'a str,
    pub content: &'a str,
    pub flash: Option<&'a str>,
    pub username: Option<&'a str>,
}

#[derive(Template)]
#[template(path = "flash.html")]
pub struct FlashTemplate<'a> {
    pub message: &'a str,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate<'a> {
    pub message: &'a str,
    pub status: u16,
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate<'a> {
    pub error: Option<&'a str>,
    pub next: &'a str,
}

#[derive(Template)]
#[template(path = "register.html")]
pub struct RegisterTemplate<'a> {
    pub username: &'a str,
}

#[derive(Template)]
#[template(path = "portfolio.html")]
pub struct PortfolioTemplate<'a> {
    pub summary: &'a PortfolioSummary,
}

#[derive(Template)]
#[template(path = "quote.html")]
pub struct QuoteTemplate<'a> {
    pub symbol: &'a str,
}

#[derive(Template)]
#[template(path = "quoted.html")]
pub struct QuotedTemplate<'a> {
    pub quote: &'a Quote,
}

#[derive(Template)]
#[template(path = "buy.html")]
pub struct BuyTemplate<'a> {
    pub symbol: &'a str,
}

/// A sellable position; `price` and `value` are `None` when no quote is available.
pub struct OwnedShares {
    pub symbol: String,
    pub shares: i64,
    pub price: Option<Money>,
    pub value: Option<Money>,
}

#[derive(Template)]
#[template(path = "sell.html")]
pub struct SellTemplate<'a> {
    pub owned: &'a [OwnedShares],
}

pub struct HistoryRow {
    pub symbol: String,
    pub side: &'static str,
    pub shares: i64,
    pub price: Money,
    pub transacted_at: String,
}

impl From<&Transaction> for HistoryRow {
    fn from(tx: &Transaction) -> Self {
        Self {
            symbol: tx.symbol.clone(),
            side: tx.side().as_str(),
            shares: tx.share_delta.abs(),
            price: tx.price,
            transacted_at: tx.transacted_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Template)]
#[template(path = "history.html")]
pub struct HistoryTemplate<'a> {
    pub rows: &'a [HistoryRow],
}

#[derive(Template)]
#[template(path = "addcash.html")]
pub struct AddCashTemplate {
    pub amount: Money,
}
