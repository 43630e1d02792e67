//! Domain error types.

use super::money::Money;

/// Top-level error type for papertrade.
#[derive(Debug, thiserror::Error)]
pub enum PapertradeError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    /// A concurrent write to the same account won the race. Safe to retry.
    #[error("conflicting update, please retry: {reason}")]
    Conflict { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("http client error: {reason}")]
    Http { reason: String },

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("invalid symbol: {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("price {required} exceeds current cash amount {available}")]
    InsufficientFunds { required: Money, available: Money },

    #[error("cannot sell {requested} shares of {symbol}: only {held} owned")]
    InsufficientShares {
        symbol: String,
        requested: i64,
        held: i64,
    },

    #[error("user not found: {user}")]
    UserNotFound { user: String },

    #[error("username is taken: {username}")]
    UsernameTaken { username: String },

    #[error("invalid username and/or password")]
    InvalidCredentials,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PapertradeError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// True for errors the caller may resolve by simply trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// True for user-facing validation failures that leave state untouched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. }
                | Self::UnknownSymbol { .. }
                | Self::InsufficientFunds { .. }
                | Self::InsufficientShares { .. }
                | Self::UsernameTaken { .. }
                | Self::InvalidCredentials
        )
    }
}

impl From<&PapertradeError> for std::process::ExitCode {
    fn from(err: &PapertradeError) -> Self {
        let code: u8 = match err {
            PapertradeError::Io(_) | PapertradeError::Http { .. } => 1,
            PapertradeError::ConfigParse { .. }
            | PapertradeError::ConfigMissing { .. }
            | PapertradeError::ConfigInvalid { .. } => 2,
            PapertradeError::Database { .. } | PapertradeError::DatabaseQuery { .. } => 3,
            PapertradeError::InvalidInput { .. }
            | PapertradeError::UnknownSymbol { .. }
            | PapertradeError::InsufficientFunds { .. }
            | PapertradeError::InsufficientShares { .. }
            | PapertradeError::UserNotFound { .. }
            | PapertradeError::UsernameTaken { .. }
            | PapertradeError::InvalidCredentials => 4,
            PapertradeError::Conflict { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
