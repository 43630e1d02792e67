//! Holdings derived from the transaction ledger.

use std::collections::BTreeMap;

use super::money::Money;
use super::transaction::Transaction;

/// Net shares held per symbol.
///
/// Only symbols with a strictly positive aggregate are included; the map
/// iterates in symbol order. Sums saturate at the `i64` bounds.
pub fn positions(transactions: &[Transaction]) -> BTreeMap<String, i64> {
    let mut totals: BTreeMap<String, i64> = BTreeMap::new();
    for tx in transactions {
        let total = totals.entry(tx.symbol.clone()).or_insert(0);
        *total = total.saturating_add(tx.share_delta);
    }
    totals.retain(|_, shares| *shares > 0);
    totals
}

/// Net shares held in a single symbol; zero when there is no history.
pub fn shares_held(transactions: &[Transaction], symbol: &str) -> i64 {
    transactions
        .iter()
        .filter(|tx| tx.symbol == symbol)
        .fold(0i64, |held, tx| held.saturating_add(tx.share_delta))
}

/// Price of the most recent trade per symbol, by ledger order.
pub fn last_trade_prices(transactions: &[Transaction]) -> BTreeMap<String, Money> {
    let mut prices = BTreeMap::new();
    for tx in transactions {
        prices.insert(tx.symbol.clone(), tx.price);
    }
    prices
}
