#![cfg(feature = "sqlite")]
//! Ledger invariants under arbitrary trade sequences and concurrent access.
//!
//! Tests cover:
//! - Cash always equals initial cash plus top-ups minus net trade value
//! - Positions never go negative
//! - Rejected trades leave cash and history untouched
//! - Concurrent buys that jointly exceed cash cannot all commit

mod common;

use std::sync::{Arc, Barrier};
use std::time::Duration;

use common::*;
use papertrade::adapters::fixed_quote_adapter::FixedQuoteAdapter;
use papertrade::adapters::sqlite_adapter::SqliteAdapter;
use papertrade::domain::error::PapertradeError;
use papertrade::domain::money::Money;
use papertrade::domain::position::positions;
use papertrade::domain::trade::{TradeContext, TradeExecutor};
use papertrade::ports::ledger_port::LedgerPort;
use proptest::prelude::*;

const SYMBOLS: [&str; 3] = ["AAPL", "MSFT", "NFLX"];

#[derive(Debug, Clone)]
enum Op {
    Buy { symbol: usize, shares: i64, price_cents: i64 },
    Sell { symbol: usize, shares: i64, price_cents: i64 },
    TopUp { cents: i64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..SYMBOLS.len(), 1i64..40, 100i64..50_000)
            .prop_map(|(symbol, shares, price_cents)| Op::Buy { symbol, shares, price_cents }),
        4 => (0..SYMBOLS.len(), 1i64..40, 100i64..50_000)
            .prop_map(|(symbol, shares, price_cents)| Op::Sell { symbol, shares, price_cents }),
        1 => (1i64..100_000).prop_map(|cents| Op::TopUp { cents }),
    ]
}

fn snapshot(ledger: &dyn LedgerPort, user_id: i64) -> (Money, usize) {
    let cash = ledger.find_user(user_id).unwrap().unwrap().cash;
    let count = ledger.list_transactions(user_id).unwrap().len();
    (cash, count)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ledger_stays_consistent(
        initial_cents in 0i64..2_000_000,
        ops in prop::collection::vec(op_strategy(), 1..30),
    ) {
        let ledger = memory_ledger();
        let quotes = Arc::new(FixedQuoteAdapter::new());
        let user = create_user(&*ledger, "prop", cents(initial_cents));
        let executor = TradeExecutor::new(ledger.clone(), quotes.clone());
        let ctx = TradeContext::new(user.id);
        let mut top_ups = 0i64;

        for op in ops {
            let before = snapshot(&*ledger, user.id);
            let result = match op {
                Op::Buy { symbol, shares, price_cents } => {
                    quotes.set_price(SYMBOLS[symbol], cents(price_cents));
                    executor.buy(&ctx, SYMBOLS[symbol], shares).map(|_| ())
                }
                Op::Sell { symbol, shares, price_cents } => {
                    quotes.set_price(SYMBOLS[symbol], cents(price_cents));
                    executor.sell(&ctx, SYMBOLS[symbol], shares).map(|_| ())
                }
                Op::TopUp { cents: amount } => executor
                    .top_up(&ctx, cents(amount))
                    .map(|_| top_ups += amount),
            };

            match result {
                Ok(()) => {}
                Err(PapertradeError::InsufficientFunds { .. })
                | Err(PapertradeError::InsufficientShares { .. }) => {
                    prop_assert_eq!(snapshot(&*ledger, user.id), before);
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }

            let history = ledger.list_transactions(user.id).unwrap();
            let traded: i64 = history
                .iter()
                .map(|tx| tx.cash_delta().map(|delta| delta.cents()))
                .sum::<Option<i64>>()
                .unwrap();
            let (cash, _) = snapshot(&*ledger, user.id);

            prop_assert_eq!(cash.cents(), initial_cents + top_ups + traded);
            prop_assert!(!cash.is_negative());
            for symbol in SYMBOLS {
                let net: i64 = history
                    .iter()
                    .filter(|tx| tx.symbol == symbol)
                    .map(|tx| tx.share_delta)
                    .sum();
                prop_assert!(net >= 0, "{} position went negative: {}", symbol, net);
            }
            prop_assert!(positions(&history).values().all(|shares| *shares > 0));
        }
    }
}

#[test]
fn worked_example_round_trip() {
    let ledger = memory_ledger();
    let quotes = fixed_quotes();
    let user = create_user(&*ledger, "alice", cents(1_000_00));
    let executor = executor(ledger.clone(), quotes.clone());
    let ctx = TradeContext::new(user.id);

    let receipt = executor.buy(&ctx, "aapl", 10).unwrap();
    assert_eq!(receipt.cash_after, cents(500_00));
    assert_eq!(receipt.transaction.symbol, "AAPL");

    quotes.set_price("AAPL", cents(6000));
    let receipt = executor.sell(&ctx, "AAPL", 4).unwrap();
    assert_eq!(receipt.cash_after, cents(740_00));
    assert_eq!(receipt.transaction.share_delta, -4);

    let history = ledger.list_transactions(user.id).unwrap();
    assert_eq!(positions(&history).get("AAPL"), Some(&6));

    match executor.sell(&ctx, "AAPL", 7) {
        Err(PapertradeError::InsufficientShares { requested, held, .. }) => {
            assert_eq!(requested, 7);
            assert_eq!(held, 6);
        }
        other => panic!("expected InsufficientShares, got {other:?}"),
    }
    assert_eq!(ledger.list_transactions(user.id).unwrap().len(), 2);
}

#[test]
fn concurrent_buys_cannot_overspend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let ledger = Arc::new(
        SqliteAdapter::open(path.to_str().unwrap(), 8, Duration::from_secs(10)).unwrap(),
    );
    ledger.initialize_schema().unwrap();
    let quotes = Arc::new(FixedQuoteAdapter::new().with_price("AAPL", cents(300_00)));
    let user = create_user(&*ledger, "racer", cents(1_000_00));
    let executor = Arc::new(TradeExecutor::new(ledger.clone(), quotes));

    const THREADS: usize = 8;
    let barrier = Arc::new(Barrier::new(THREADS));
    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let executor = executor.clone();
                let barrier = barrier.clone();
                scope.spawn(move || {
                    barrier.wait();
                    executor.buy(&TradeContext::new(user.id), "AAPL", 1)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let succeeded = results.iter().filter(|r| r.is_ok()).count() as i64;
    for result in &results {
        if let Err(e) = result {
            assert!(
                matches!(e, PapertradeError::InsufficientFunds { .. }) || e.is_retryable(),
                "unexpected error: {e}"
            );
        }
    }

    assert!(succeeded <= 3, "{succeeded} buys of $300.00 committed against $1,000.00");
    let cash = ledger.find_user(user.id).unwrap().unwrap().cash;
    assert_eq!(cash.cents(), 1_000_00 - succeeded * 300_00);
    assert_eq!(
        ledger.list_transactions(user.id).unwrap().len() as i64,
        succeeded
    );
}

#[test]
fn two_buys_jointly_exceeding_cash_commit_at_most_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let ledger = Arc::new(
        SqliteAdapter::open(path.to_str().unwrap(), 2, Duration::from_secs(10)).unwrap(),
    );
    ledger.initialize_schema().unwrap();
    let quotes = Arc::new(FixedQuoteAdapter::new().with_price("MSFT", cents(600_00)));
    let user = create_user(&*ledger, "pair", cents(1_000_00));
    let executor = Arc::new(TradeExecutor::new(ledger.clone(), quotes));
    let barrier = Arc::new(Barrier::new(2));

    let outcomes: Vec<bool> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let executor = executor.clone();
                let barrier = barrier.clone();
                scope.spawn(move || {
                    barrier.wait();
                    executor.buy(&TradeContext::new(user.id), "MSFT", 1).is_ok()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let succeeded = outcomes.iter().filter(|ok| **ok).count();
    assert!(succeeded <= 1);
    let cash = ledger.find_user(user.id).unwrap().unwrap().cash;
    assert!(!cash.is_negative());
    assert_eq!(cash.cents(), 1_000_00 - succeeded as i64 * 600_00);
}
