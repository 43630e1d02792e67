//! User accounts, registration rules and account-level settings.

use std::str::FromStr;

use super::error::PapertradeError;
use super::money::Money;
use super::portfolio::MissingQuotePolicy;
use crate::ports::config_port::ConfigPort;
use crate::ports::ledger_port::LedgerPort;

pub type UserId = i64;

/// Starting cash for newly registered users when `[account] initial_cash` is unset.
pub const DEFAULT_INITIAL_CASH: Money = Money::from_cents(10_000_00);

/// Cash added by one top-up when `[account] top_up_amount` is unset.
pub const DEFAULT_TOP_UP_AMOUNT: Money = Money::from_cents(1_00);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
    pub cash: Money,
}

/// A user about to be inserted. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub cash: Money,
}

/// Raw registration form fields, before validation.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub confirmation: String,
}

impl Registration {
    /// Checks the form in the order users see errors: username, password,
    /// confirmation, then that both passwords match. Returns the trimmed
    /// username on success.
    pub fn validate(&self) -> Result<String, PapertradeError> {
        let username = self.username.trim();
        if username.is_empty() {
            return Err(PapertradeError::invalid_input("must provide username"));
        }
        if self.password.is_empty() {
            return Err(PapertradeError::invalid_input("must provide password"));
        }
        if self.confirmation.is_empty() {
            return Err(PapertradeError::invalid_input("must confirm password"));
        }
        if self.password != self.confirmation {
            return Err(PapertradeError::invalid_input("passwords must match"));
        }
        Ok(username.to_string())
    }
}

/// Account behaviour read from the `[account]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountSettings {
    pub initial_cash: Money,
    pub top_up_amount: Money,
    pub missing_quote_policy: MissingQuotePolicy,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            initial_cash: DEFAULT_INITIAL_CASH,
            top_up_amount: DEFAULT_TOP_UP_AMOUNT,
            missing_quote_policy: MissingQuotePolicy::Exclude,
        }
    }
}

impl AccountSettings {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PapertradeError> {
        let defaults = Self::default();

        let initial_cash = read_money(config, "initial_cash")?.unwrap_or(defaults.initial_cash);
        let top_up_amount =
            read_money(config, "top_up_amount")?.unwrap_or(defaults.top_up_amount);
        let missing_quote_policy = match config.get_string("account", "missing_quote_policy") {
            Some(raw) => MissingQuotePolicy::from_str(&raw).map_err(|reason| {
                PapertradeError::ConfigInvalid {
                    section: "account".into(),
                    key: "missing_quote_policy".into(),
                    reason,
                }
            })?,
            None => defaults.missing_quote_policy,
        };

        Ok(Self {
            initial_cash,
            top_up_amount,
            missing_quote_policy,
        })
    }
}

/// Validate a registration and create the account with `initial_cash`.
///
/// `hash_password` only runs once the form is valid and the username is free.
pub fn register_user(
    ledger: &dyn LedgerPort,
    registration: &Registration,
    initial_cash: Money,
    hash_password: impl FnOnce(&str) -> Result<String, PapertradeError>,
) -> Result<User, PapertradeError> {
    let username = registration.validate()?;
    if ledger.find_user_by_username(&username)?.is_some() {
        return Err(PapertradeError::UsernameTaken { username });
    }

    let password_hash = hash_password(&registration.password)?;
    let user = ledger.create_user(&NewUser {
        username,
        password_hash,
        cash: initial_cash,
    })?;
    tracing::info!(user_id = user.id, username = %user.username, "user registered");
    Ok(user)
}

fn read_money(config: &dyn ConfigPort, key: &str) -> Result<Option<Money>, PapertradeError> {
    match config.get_string("account", key) {
        Some(raw) => Money::parse(&raw)
            .map(Some)
            .map_err(|e| PapertradeError::ConfigInvalid {
                section: "account".into(),
                key: key.into(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}
