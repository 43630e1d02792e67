//! Trade execution: buys, sells and cash top-ups.
//!
//! Every operation follows the same shape: validate the request, price it
//! outside any lock, then open one [`LedgerUnit`] for the user and re-check
//! cash and position against the locked state before writing. The ledger
//! insert and the balance update commit together or not at all.
//!
//! [`LedgerUnit`]: crate::ports::ledger_port::LedgerUnit

use std::sync::Arc;

use chrono::Utc;

use super::account::UserId;
use super::error::PapertradeError;
use super::money::Money;
use super::position::shares_held;
use super::quote::{is_valid_symbol, normalize_symbol, Quote};
use super::transaction::{NewTransaction, TradeSide, Transaction};
use crate::ports::ledger_port::LedgerPort;
use crate::ports::quote_port::QuotePort;

/// Who is trading. Passed explicitly into every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeContext {
    pub user_id: UserId,
}

impl TradeContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }
}

/// Outcome of a committed buy or sell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeReceipt {
    pub transaction: Transaction,
    pub quote: Quote,
    pub cash_before: Money,
    pub cash_after: Money,
}

/// Parse a share count typed by a user. Only positive whole numbers pass.
pub fn parse_share_count(input: &str) -> Result<i64, PapertradeError> {
    let trimmed = input.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(PapertradeError::invalid_input(
            "enter a valid number of shares",
        ));
    }
    let count: i64 = trimmed
        .parse()
        .map_err(|_| PapertradeError::invalid_input("enter a valid number of shares"))?;
    require_positive_shares(count)
}

fn require_positive_shares(count: i64) -> Result<i64, PapertradeError> {
    if count <= 0 {
        return Err(PapertradeError::invalid_input(
            "enter a valid number of shares",
        ));
    }
    Ok(count)
}

pub struct TradeExecutor {
    ledger: Arc<dyn LedgerPort>,
    quotes: Arc<dyn QuotePort>,
}

impl TradeExecutor {
    pub fn new(ledger: Arc<dyn LedgerPort>, quotes: Arc<dyn QuotePort>) -> Self {
        Self { ledger, quotes }
    }

    /// Resolve a symbol to a usable quote, or `UnknownSymbol`.
    pub fn quote(&self, symbol: &str) -> Result<Quote, PapertradeError> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Err(PapertradeError::invalid_input("must provide symbol"));
        }
        if !is_valid_symbol(&symbol) {
            return Err(PapertradeError::UnknownSymbol { symbol });
        }
        match self.quotes.lookup(&symbol) {
            Some(quote) if quote.price.is_positive() => Ok(quote),
            _ => {
                tracing::info!(%symbol, "quote unavailable");
                Err(PapertradeError::UnknownSymbol { symbol })
            }
        }
    }

    pub fn buy(
        &self,
        ctx: &TradeContext,
        symbol: &str,
        share_count: i64,
    ) -> Result<TradeReceipt, PapertradeError> {
        self.execute(ctx, symbol, share_count, TradeSide::Buy)
    }

    pub fn sell(
        &self,
        ctx: &TradeContext,
        symbol: &str,
        share_count: i64,
    ) -> Result<TradeReceipt, PapertradeError> {
        self.execute(ctx, symbol, share_count, TradeSide::Sell)
    }

    /// Add play money to the user's cash. Returns the new balance.
    pub fn top_up(&self, ctx: &TradeContext, amount: Money) -> Result<Money, PapertradeError> {
        if !amount.is_positive() {
            return Err(PapertradeError::invalid_input(
                "top-up amount must be positive",
            ));
        }

        let mut unit = self.ledger.begin(ctx.user_id)?;
        let cash_after = unit
            .user()
            .cash
            .checked_add(amount)
            .ok_or_else(|| PapertradeError::invalid_input("cash balance out of range"))?;
        unit.update_cash_balance(cash_after)?;
        unit.commit().inspect_err(|e| log_commit_failure(ctx, e))?;

        tracing::info!(user_id = ctx.user_id, %amount, cash = %cash_after, "cash topped up");
        Ok(cash_after)
    }

    fn execute(
        &self,
        ctx: &TradeContext,
        symbol: &str,
        share_count: i64,
        side: TradeSide,
    ) -> Result<TradeReceipt, PapertradeError> {
        let shares = require_positive_shares(share_count)?;
        let quote = self.quote(symbol)?;
        let amount = quote
            .price
            .checked_mul(shares)
            .ok_or_else(|| PapertradeError::invalid_input("order value out of range"))?;

        let mut unit = self.ledger.begin(ctx.user_id)?;
        let cash_before = unit.user().cash;

        let (share_delta, cash_after) = match side {
            TradeSide::Buy => {
                if amount > cash_before {
                    tracing::info!(
                        user_id = ctx.user_id,
                        symbol = %quote.symbol,
                        required = %amount,
                        available = %cash_before,
                        "buy rejected: insufficient funds"
                    );
                    return Err(PapertradeError::InsufficientFunds {
                        required: amount,
                        available: cash_before,
                    });
                }
                (shares, cash_before.checked_sub(amount))
            }
            TradeSide::Sell => {
                let held = shares_held(&unit.transactions()?, &quote.symbol);
                if shares > held {
                    tracing::info!(
                        user_id = ctx.user_id,
                        symbol = %quote.symbol,
                        requested = shares,
                        held,
                        "sell rejected: insufficient shares"
                    );
                    return Err(PapertradeError::InsufficientShares {
                        symbol: quote.symbol.clone(),
                        requested: shares,
                        held,
                    });
                }
                (-shares, cash_before.checked_add(amount))
            }
        };
        let cash_after =
            cash_after.ok_or_else(|| PapertradeError::invalid_input("cash balance out of range"))?;

        let transaction = unit.insert_transaction(&NewTransaction {
            user_id: ctx.user_id,
            symbol: quote.symbol.clone(),
            share_delta,
            price: quote.price,
            transacted_at: Utc::now(),
        })?;
        unit.update_cash_balance(cash_after)?;
        unit.commit().inspect_err(|e| log_commit_failure(ctx, e))?;

        tracing::info!(
            user_id = ctx.user_id,
            side = side.as_str(),
            symbol = %quote.symbol,
            shares,
            price = %quote.price,
            cash = %cash_after,
            "trade executed"
        );

        Ok(TradeReceipt {
            transaction,
            quote,
            cash_before,
            cash_after,
        })
    }
}

fn log_commit_failure(ctx: &TradeContext, err: &PapertradeError) {
    if err.is_retryable() {
        tracing::warn!(user_id = ctx.user_id, error = %err, "ledger conflict on commit");
    } else {
        tracing::error!(user_id = ctx.user_id, error = %err, "ledger commit failed");
    }
}
