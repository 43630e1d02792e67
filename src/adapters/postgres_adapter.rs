//! PostgreSQL ledger adapter.
//!
//! A ledger unit locks the user's row with `SELECT ... FOR UPDATE` inside an
//! explicit transaction. Units for different users proceed in parallel; a
//! second unit for the same user waits up to `lock_timeout_ms` and then fails
//! with `Conflict`.

use chrono::{DateTime, Utc};
use postgres::error::SqlState;
use postgres::{NoTls, Row};
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;

use crate::domain::account::{NewUser, User, UserId};
use crate::domain::error::PapertradeError;
use crate::domain::money::Money;
use crate::domain::transaction::{NewTransaction, Transaction};
use crate::ports::config_port::ConfigPort;
use crate::ports::ledger_port::{LedgerPort, LedgerUnit};

pub const DEFAULT_LOCK_TIMEOUT_MS: i64 = 5000;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        cash_cents BIGINT NOT NULL CHECK (cash_cents >= 0)
    );
    CREATE TABLE IF NOT EXISTS transactions (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL REFERENCES users(id),
        symbol TEXT NOT NULL,
        share_delta BIGINT NOT NULL CHECK (share_delta <> 0),
        price_cents BIGINT NOT NULL CHECK (price_cents > 0),
        transacted_at TIMESTAMPTZ NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_transactions_user_symbol ON transactions(user_id, symbol);";

const USER_COLUMNS: &str = "id, username, password_hash, cash_cents";
const TRANSACTION_COLUMNS: &str =
    "id, user_id, symbol, share_delta, price_cents, transacted_at";

type PgConnection = PooledConnection<PostgresConnectionManager<NoTls>>;

pub struct PostgresAdapter {
    pool: Pool<PostgresConnectionManager<NoTls>>,
    lock_timeout_ms: i64,
}

fn query_error(e: postgres::Error) -> PapertradeError {
    let retryable = matches!(
        e.code(),
        Some(code) if *code == SqlState::T_R_SERIALIZATION_FAILURE
            || *code == SqlState::T_R_DEADLOCK_DETECTED
            || *code == SqlState::LOCK_NOT_AVAILABLE
    );
    if retryable {
        PapertradeError::Conflict {
            reason: e.to_string(),
        }
    } else {
        PapertradeError::DatabaseQuery {
            reason: e.to_string(),
        }
    }
}

impl PostgresAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PapertradeError> {
        let connection_string = config
            .get_string("postgres", "connection_string")
            .ok_or_else(|| PapertradeError::ConfigMissing {
                section: "postgres".into(),
                key: "connection_string".into(),
            })?;
        let pool_size = config.get_int("postgres", "pool_size", 4).max(1) as u32;
        let lock_timeout_ms =
            config.get_int("postgres", "lock_timeout_ms", DEFAULT_LOCK_TIMEOUT_MS);
        if lock_timeout_ms < 1 {
            return Err(PapertradeError::ConfigInvalid {
                section: "postgres".into(),
                key: "lock_timeout_ms".into(),
                reason: "lock_timeout_ms must be at least 1".into(),
            });
        }

        let pg_config = connection_string
            .parse::<postgres::Config>()
            .map_err(|e| PapertradeError::ConfigInvalid {
                section: "postgres".into(),
                key: "connection_string".into(),
                reason: e.to_string(),
            })?;
        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e| PapertradeError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self {
            pool,
            lock_timeout_ms,
        })
    }

    fn connection(&self) -> Result<PgConnection, PapertradeError> {
        self.pool.get().map_err(|e| PapertradeError::Database {
            reason: e.to_string(),
        })
    }
}

fn user_from_row(row: &Row) -> User {
    User {
        id: row.get(0),
        username: row.get(1),
        password_hash: row.get(2),
        cash: Money::from_cents(row.get(3)),
    }
}

fn transaction_from_row(row: &Row) -> Transaction {
    let transacted_at: DateTime<Utc> = row.get(5);
    Transaction {
        id: row.get(0),
        user_id: row.get(1),
        symbol: row.get(2),
        share_delta: row.get(3),
        price: Money::from_cents(row.get(4)),
        transacted_at,
    }
}

fn load_transactions(
    conn: &mut PgConnection,
    user_id: UserId,
) -> Result<Vec<Transaction>, PapertradeError> {
    let query = format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = $1 ORDER BY id ASC"
    );
    let rows = conn.query(&query, &[&user_id]).map_err(query_error)?;
    Ok(rows.iter().map(transaction_from_row).collect())
}

fn rollback(conn: &mut PgConnection) {
    if let Err(e) = conn.batch_execute("ROLLBACK") {
        tracing::warn!(error = %e, "postgres rollback failed");
    }
}

impl LedgerPort for PostgresAdapter {
    fn initialize_schema(&self) -> Result<(), PapertradeError> {
        let mut conn = self.connection()?;
        conn.batch_execute(SCHEMA).map_err(query_error)
    }

    fn create_user(&self, new_user: &NewUser) -> Result<User, PapertradeError> {
        let mut conn = self.connection()?;
        let inserted = conn.query_one(
            "INSERT INTO users (username, password_hash, cash_cents) VALUES ($1, $2, $3) RETURNING id",
            &[&new_user.username, &new_user.password_hash, &new_user.cash.cents()],
        );

        match inserted {
            Ok(row) => Ok(User {
                id: row.get(0),
                username: new_user.username.clone(),
                password_hash: new_user.password_hash.clone(),
                cash: new_user.cash,
            }),
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                Err(PapertradeError::UsernameTaken {
                    username: new_user.username.clone(),
                })
            }
            Err(e) => Err(query_error(e)),
        }
    }

    fn find_user(&self, id: UserId) -> Result<Option<User>, PapertradeError> {
        let mut conn = self.connection()?;
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = conn.query_opt(&query, &[&id]).map_err(query_error)?;
        Ok(row.as_ref().map(user_from_row))
    }

    fn find_user_by_username(&self, username: &str) -> Result<Option<User>, PapertradeError> {
        let mut conn = self.connection()?;
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        let row = conn.query_opt(&query, &[&username]).map_err(query_error)?;
        Ok(row.as_ref().map(user_from_row))
    }

    fn list_transactions(&self, user_id: UserId) -> Result<Vec<Transaction>, PapertradeError> {
        let mut conn = self.connection()?;
        load_transactions(&mut conn, user_id)
    }

    fn begin(&self, user_id: UserId) -> Result<Box<dyn LedgerUnit + '_>, PapertradeError> {
        let mut conn = self.connection()?;
        conn.batch_execute(&format!(
            "BEGIN; SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout_ms
        ))
        .map_err(query_error)?;

        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE");
        let user = match conn.query_opt(&query, &[&user_id]) {
            Ok(Some(row)) => user_from_row(&row),
            Ok(None) => {
                rollback(&mut conn);
                return Err(PapertradeError::UserNotFound {
                    user: user_id.to_string(),
                });
            }
            Err(e) => {
                rollback(&mut conn);
                return Err(query_error(e));
            }
        };

        Ok(Box::new(PostgresLedgerUnit {
            conn,
            user,
            open: true,
        }))
    }
}

struct PostgresLedgerUnit {
    conn: PgConnection,
    user: User,
    open: bool,
}

impl LedgerUnit for PostgresLedgerUnit {
    fn user(&self) -> &User {
        &self.user
    }

    fn transactions(&mut self) -> Result<Vec<Transaction>, PapertradeError> {
        load_transactions(&mut self.conn, self.user.id)
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
        let row = self
            .conn
            .query_one(
                "INSERT INTO transactions (user_id, symbol, share_delta, price_cents, transacted_at)
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
                &[
                    &record.user_id,
                    &record.symbol,
                    &record.share_delta,
                    &record.price.cents(),
                    &record.transacted_at,
                ],
            )
            .map_err(query_error)?;

        Ok(record.clone().into_transaction(row.get(0)))
    }

    fn update_cash_balance(&mut self, new_balance: Money) -> Result<(), PapertradeError> {
        if new_balance.is_negative() {
            return Err(PapertradeError::invalid_input("cash balance cannot go negative"));
        }
        let updated = self
            .conn
            .execute(
                "UPDATE users SET cash_cents = $1 WHERE id = $2",
                &[&new_balance.cents(), &self.user.id],
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
        self.conn.batch_execute("COMMIT").map_err(query_error)?;
        self.open = false;
        Ok(())
    }
}

impl Drop for PostgresLedgerUnit {
    fn drop(&mut self) {
        if self.open {
            rollback(&mut self.conn);
        }
    }
}
