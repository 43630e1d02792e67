//! Ledger store port traits.

use crate::domain::account::{NewUser, User, UserId};
use crate::domain::error::PapertradeError;
use crate::domain::money::Money;
use crate::domain::transaction::{NewTransaction, Transaction};

/// Persistent users and their append-only transaction history.
pub trait LedgerPort: Send + Sync {
    fn initialize_schema(&self) -> Result<(), PapertradeError>;

    /// Fails with `UsernameTaken` when the username already exists.
    fn create_user(&self, new_user: &NewUser) -> Result<User, PapertradeError>;

    fn find_user(&self, id: UserId) -> Result<Option<User>, PapertradeError>;

    fn find_user_by_username(&self, username: &str) -> Result<Option<User>, PapertradeError>;

    /// All of a user's transactions, ordered by id.
    fn list_transactions(&self, user_id: UserId) -> Result<Vec<Transaction>, PapertradeError>;

    /// Open an atomic unit scoped to one user.
    ///
    /// While the unit is alive no other unit for the same user can commit a
    /// conflicting write. Fails with `UserNotFound` for unknown ids and with
    /// `Conflict` if the user could not be locked in time.
    fn begin(&self, user_id: UserId) -> Result<Box<dyn LedgerUnit + '_>, PapertradeError>;
}

/// A per-user read-validate-write scope.
///
/// Reads observe the state as of the lock. Writes become visible only on
/// [`LedgerUnit::commit`]; dropping the unit without committing rolls back.
pub trait LedgerUnit {
    /// The user row as locked by this unit.
    fn user(&self) -> &User;

    fn transactions(&mut self) -> Result<Vec<Transaction>, PapertradeError>;

    fn insert_transaction(
        &mut self,
        record: &NewTransaction,
    ) -> Result<Transaction, PapertradeError>;

    fn update_cash_balance(&mut self, new_balance: Money) -> Result<(), PapertradeError>;

    fn commit(self: Box<Self>) -> Result<(), PapertradeError>;
}
