//! Ledger transaction records.

use chrono::{DateTime, Utc};

use super::account::UserId;
use super::money::Money;

pub type TransactionId = i64;

/// One immutable ledger row. Positive `share_delta` is a buy, negative a sell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub symbol: String,
    pub share_delta: i64,
    pub price: Money,
    pub transacted_at: DateTime<Utc>,
}

impl Transaction {
    pub fn side(&self) -> TradeSide {
        if self.share_delta < 0 {
            TradeSide::Sell
        } else {
            TradeSide::Buy
        }
    }

    /// Signed effect on the cash balance: negative for buys.
    pub fn cash_delta(&self) -> Option<Money> {
        self.price.checked_mul(self.share_delta)?.checked_mul(-1)
    }
}

/// A ledger row about to be appended; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub symbol: String,
    pub share_delta: i64,
    pub price: Money,
    pub transacted_at: DateTime<Utc>,
}

impl NewTransaction {
    pub fn into_transaction(self, id: TransactionId) -> Transaction {
        Transaction {
            id,
            user_id: self.user_id,
            symbol: self.symbol,
            share_delta: self.share_delta,
            price: self.price,
            transacted_at: self.transacted_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}
