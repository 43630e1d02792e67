//! SQLite ledger adapter.
//!
//! Ledger units open with `BEGIN IMMEDIATE`, which takes the database write
//! lock before the unit reads anything. A second writer waits up to the
//! configured busy timeout and then fails with `Conflict`, so the
//! read-validate-write sequence of a trade can never interleave with another.

use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::domain::account::{NewUser, User, UserId};
use crate::domain::error::PapertradeError;
use crate::domain::money::Money;
use crate::domain::transaction::{NewTransaction, Transaction};
use crate::ports::config_port::ConfigPort;
use crate::ports::ledger_port::{LedgerPort, LedgerUnit};

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        cash_cents INTEGER NOT NULL CHECK (cash_cents >= 0)
    );
    CREATE TABLE IF NOT EXISTS transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        symbol TEXT NOT NULL,
        share_delta INTEGER NOT NULL CHECK (share_delta <> 0),
        price_cents INTEGER NOT NULL CHECK (price_cents > 0),
        transacted_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_transactions_user_symbol ON transactions(user_id, symbol);";

type SqliteConnection = PooledConnection<SqliteConnectionManager>;

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_error(e: r2d2::Error) -> PapertradeError {
    PapertradeError::Database {
        reason: e.to_string(),
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn query_error(e: rusqlite::Error) -> PapertradeError {
    if is_busy(&e) {
        PapertradeError::Conflict {
            reason: e.to_string(),
        }
    } else {
        PapertradeError::DatabaseQuery {
            reason: e.to_string(),
        }
    }
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PapertradeError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| PapertradeError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        if db_path == ":memory:" {
            return Self::in_memory();
        }

        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;
        let busy_timeout = config
            .get_int("sqlite", "busy_timeout_ms", DEFAULT_BUSY_TIMEOUT_MS as i64)
            .max(0) as u64;

        Self::open(&db_path, pool_size, Duration::from_millis(busy_timeout))
    }

    pub fn open(path: &str, pool_size: u32, busy_timeout: Duration) -> Result<Self, PapertradeError> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(move |conn: &mut Connection| configure_connection(conn, busy_timeout));
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_error)?;

        Ok(Self { pool })
    }

    /// Each in-memory connection is its own database, so the pool holds one.
    pub fn in_memory() -> Result<Self, PapertradeError> {
        let manager = SqliteConnectionManager::memory().with_init(|conn: &mut Connection| {
            configure_connection(conn, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
        });
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_error)?;

        Ok(Self { pool })
    }

    fn connection(&self) -> Result<SqliteConnection, PapertradeError> {
        self.pool.get().map_err(pool_error)
    }
}

fn configure_connection(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        cash: Money::from_cents(row.get(3)?),
    })
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let stamp: String = row.get(5)?;
    let transacted_at = DateTime::parse_from_rfc3339(&stamp)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?
        .with_timezone(&Utc);

    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        symbol: row.get(2)?,
        share_delta: row.get(3)?,
        price: Money::from_cents(row.get(4)?),
        transacted_at,
    })
}

fn load_user(conn: &Connection, user_id: UserId) -> Result<Option<User>, PapertradeError> {
    conn.query_row(
        "SELECT id, username, password_hash, cash_cents FROM users WHERE id = ?1",
        params![user_id],
        user_from_row,
    )
    .optional()
    .map_err(query_error)
}

fn load_transactions(
    conn: &Connection,
    user_id: UserId,
) -> Result<Vec<Transaction>, PapertradeError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, user_id, symbol, share_delta, price_cents, transacted_at
             FROM transactions
             WHERE user_id = ?1
             ORDER BY id ASC",
        )
        .map_err(query_error)?;

    let rows = stmt
        .query_map(params![user_id], transaction_from_row)
        .map_err(query_error)?;

    let mut transactions = Vec::new();
    for row in rows {
        transactions.push(row.map_err(query_error)?);
    }
    Ok(transactions)
}

impl LedgerPort for SqliteAdapter {
    fn initialize_schema(&self) -> Result<(), PapertradeError> {
        let conn = self.connection()?;
        conn.execute_batch(SCHEMA).map_err(query_error)
    }

    fn create_user(&self, new_user: &NewUser) -> Result<User, PapertradeError> {
        let conn = self.connection()?;
        let inserted = conn.execute(
            "INSERT INTO users (username, password_hash, cash_cents) VALUES (?1, ?2, ?3)",
            params![
                new_user.username,
                new_user.password_hash,
                new_user.cash.cents()
            ],
        );

        match inserted {
            Ok(_) => Ok(User {
                id: conn.last_insert_rowid(),
                username: new_user.username.clone(),
                password_hash: new_user.password_hash.clone(),
                cash: new_user.cash,
            }),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(PapertradeError::UsernameTaken {
                    username: new_user.username.clone(),
                })
            }
            Err(e) => Err(query_error(e)),
        }
    }

    fn find_user(&self, id: UserId) -> Result<Option<User>, PapertradeError> {
        let conn = self.connection()?;
        load_user(&conn, id)
    }

    fn find_user_by_username(&self, username: &str) -> Result<Option<User>, PapertradeError> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, username, password_hash, cash_cents FROM users WHERE username = ?1",
            params![username],
            user_from_row,
        )
        .optional()
        .map_err(query_error)
    }

    fn list_transactions(&self, user_id: UserId) -> Result<Vec<Transaction>, PapertradeError> {
        let conn = self.connection()?;
        load_transactions(&conn, user_id)
    }

    fn begin(&self, user_id: UserId) -> Result<Box<dyn LedgerUnit + '_>, PapertradeError> {
        let conn = self.connection()?;
        conn.execute_batch("BEGIN IMMEDIATE").map_err(query_error)?;

        let user = match load_user(&conn, user_id) {
            Ok(Some(user)) => user,
            Ok(None) => {
                rollback(&conn);
                return Err(PapertradeError::UserNotFound {
                    user: user_id.to_string(),
                });
            }
            Err(e) => {
                rollback(&conn);
                return Err(e);
            }
        };

        Ok(Box::new(SqliteLedgerUnit {
            conn,
            user,
            open: true,
        }))
    }
}

fn rollback(conn: &Connection) {
    if let Err(e) = conn.execute_batch("ROLLBACK") {
        tracing::warn!(error = %e, "sqlite rollback failed");
    }
}

struct SqliteLedgerUnit {
    conn: SqliteConnection,
    user: User,
    open: bool,
}

impl LedgerUnit for SqliteLedgerUnit {
    fn user(&self) -> &User {
        &self.user
    }

    fn transactions(&mut self) -> Result<Vec<Transaction>, PapertradeError> {
        load_transactions(&self.conn, self.user.id)
    }

    fn insert_transaction(
        &mut self,
        record: &NewTransaction,
    ) -> Result<Transaction, PapertradeError> {
        if record.user_id != self.user.id {
            return Err(PapertradeError::invalid_input(
                "transaction belongs to a different user",
            ));
        }
        self.conn
            .execute(
                "INSERT INTO transactions (user_id, symbol, share_delta, price_cents, transacted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.user_id,
                    record.symbol,
                    record.share_delta,
                    record.price.cents(),
                    record.transacted_at.to_rfc3339()
                ],
            )
            .map_err(query_error)?;

        Ok(record.clone().into_transaction(self.conn.last_insert_rowid()))
    }

    fn update_cash_balance(&mut self, new_balance: Money) -> Result<(), PapertradeError> {
        if new_balance.is_negative() {
            return Err(PapertradeError::invalid_input("cash balance cannot go negative"));
        }
        let updated = self
            .conn
            .execute(
                "UPDATE users SET cash_cents = ?1 WHERE id = ?2",
                params![new_balance.cents(), self.user.id],
            )
            .map_err(query_error)?;
        if updated != 1 {
            return Err(PapertradeError::UserNotFound {
                user: self.user.id.to_string(),
            });
        }
        self.user.cash = new_balance;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), PapertradeError> {
        self.conn.execute_batch("COMMIT").map_err(query_error)?;
        self.open = false;
        Ok(())
    }
}

impl Drop for SqliteLedgerUnit {
    fn drop(&mut self) {
        if self.open {
            rollback(&self.conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyConfig;

    impl ConfigPort for EmptyConfig {
        fn get_string(&self, _section: &str, _key: &str) -> Option<String> {
            None
        }
        fn get_int(&self, _section: &str, _key: &str, default: i64) -> i64 {
            default
        }
    }

    fn adapter_with_user(cash_cents: i64) -> (SqliteAdapter, User) {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.initialize_schema().unwrap();
        let user = adapter
            .create_user(&NewUser {
                username: "alice".into(),
                password_hash: "hash".into(),
                cash: Money::from_cents(cash_cents),
            })
            .unwrap();
        (adapter, user)
    }

    fn record(user_id: UserId, symbol: &str, share_delta: i64, price_cents: i64) -> NewTransaction {
        NewTransaction {
            user_id,
            symbol: symbol.into(),
            share_delta,
            price: Money::from_cents(price_cents),
            transacted_at: Utc::now(),
        }
    }

    #[test]
    fn from_config_missing_path() {
        let config = EmptyConfig;
        let result = SqliteAdapter::from_config(&config);
        match result {
            Err(PapertradeError::ConfigMissing { section, key }) => {
                assert_eq!(section, "sqlite");
                assert_eq!(key, "path");
            }
            Err(other) => panic!("expected ConfigMissing, got: {other}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn in_memory_initialization_is_idempotent() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.initialize_schema().unwrap();
        adapter.initialize_schema().unwrap();
    }

    #[test]
    fn create_and_find_user() {
        let (adapter, user) = adapter_with_user(1_000_00);
        assert_eq!(user.cash, Money::from_cents(1_000_00));

        let by_id = adapter.find_user(user.id).unwrap().unwrap();
        assert_eq!(by_id, user);
        let by_name = adapter.find_user_by_username("alice").unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
        assert!(adapter.find_user_by_username("bob").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_is_taken() {
        let (adapter, _) = adapter_with_user(0);
        let result = adapter.create_user(&NewUser {
            username: "alice".into(),
            password_hash: "other".into(),
            cash: Money::ZERO,
        });
        match result {
            Err(PapertradeError::UsernameTaken { username }) => assert_eq!(username, "alice"),
            other => panic!("expected UsernameTaken, got {other:?}"),
        }
    }

    #[test]
    fn committed_unit_persists_both_writes() {
        let (adapter, user) = adapter_with_user(1_000_00);

        let mut unit = adapter.begin(user.id).unwrap();
        let tx = unit.insert_transaction(&record(user.id, "AAPL", 10, 5000)).unwrap();
        unit.update_cash_balance(Money::from_cents(500_00)).unwrap();
        unit.commit().unwrap();

        let history = adapter.list_transactions(user.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0], tx);
        assert_eq!(
            adapter.find_user(user.id).unwrap().unwrap().cash,
            Money::from_cents(500_00)
        );
    }

    #[test]
    fn dropped_unit_rolls_back() {
        let (adapter, user) = adapter_with_user(1_000_00);

        {
            let mut unit = adapter.begin(user.id).unwrap();
            unit.insert_transaction(&record(user.id, "AAPL", 10, 5000)).unwrap();
            unit.update_cash_balance(Money::from_cents(500_00)).unwrap();
        }

        assert!(adapter.list_transactions(user.id).unwrap().is_empty());
        assert_eq!(
            adapter.find_user(user.id).unwrap().unwrap().cash,
            Money::from_cents(1_000_00)
        );
    }

    #[test]
    fn unit_sees_its_own_writes() {
        let (adapter, user) = adapter_with_user(1_000_00);
        let mut unit = adapter.begin(user.id).unwrap();
        unit.insert_transaction(&record(user.id, "AAPL", 3, 5000)).unwrap();
        assert_eq!(unit.transactions().unwrap().len(), 1);
        unit.update_cash_balance(Money::from_cents(850_00)).unwrap();
        assert_eq!(unit.user().cash, Money::from_cents(850_00));
    }

    #[test]
    fn begin_unknown_user() {
        let (adapter, user) = adapter_with_user(0);
        match adapter.begin(user.id + 1) {
            Err(PapertradeError::UserNotFound { .. }) => {}
            Err(other) => panic!("expected UserNotFound, got {other}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
        // The failed begin must not leave the pooled connection mid-transaction.
        adapter.begin(user.id).unwrap().commit().unwrap();
    }

    #[test]
    fn negative_balance_rejected() {
        let (adapter, user) = adapter_with_user(0);
        let mut unit = adapter.begin(user.id).unwrap();
        assert!(unit.update_cash_balance(Money::from_cents(-1)).is_err());
    }

    #[test]
    fn transactions_listed_in_id_order() {
        let (adapter, user) = adapter_with_user(1_000_00);
        let mut unit = adapter.begin(user.id).unwrap();
        unit.insert_transaction(&record(user.id, "MSFT", 1, 30000)).unwrap();
        unit.insert_transaction(&record(user.id, "AAPL", 2, 5000)).unwrap();
        unit.insert_transaction(&record(user.id, "MSFT", -1, 31000)).unwrap();
        unit.commit().unwrap();

        let history = adapter.list_transactions(user.id).unwrap();
        let ids: Vec<_> = history.iter().map(|t| t.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(history[2].share_delta, -1);
    }

    #[test]
    fn second_writer_gets_conflict_after_busy_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let adapter =
            SqliteAdapter::open(path.to_str().unwrap(), 2, Duration::from_millis(50)).unwrap();
        adapter.initialize_schema().unwrap();
        let user = adapter
            .create_user(&NewUser {
                username: "alice".into(),
                password_hash: "hash".into(),
                cash: Money::from_cents(100),
            })
            .unwrap();

        let held = adapter.begin(user.id).unwrap();
        match adapter.begin(user.id) {
            Err(e) => assert!(e.is_retryable(), "expected Conflict, got {e}"),
            Ok(_) => panic!("second unit should not acquire the write lock"),
        }
        drop(held);
        adapter.begin(user.id).unwrap().commit().unwrap();
    }
}
