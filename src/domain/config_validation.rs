//! Configuration validation.
//!
//! Validates every config value before the server or a CLI command starts,
//! so misconfiguration fails fast instead of on the first request.

use std::net::SocketAddr;

use crate::domain::account::AccountSettings;
use crate::domain::error::PapertradeError;
use crate::ports::config_port::ConfigPort;

/// Minimum signing key length accepted by the session cookie layer.
pub const SESSION_SECRET_MIN_BYTES: usize = 64;

pub fn validate_app_config(config: &dyn ConfigPort) -> Result<(), PapertradeError> {
    validate_database(config)?;
    validate_quotes(config)?;
    AccountSettings::from_config(config).and_then(|settings| {
        if settings.initial_cash.is_negative() {
            return Err(invalid("account", "initial_cash", "initial_cash must be non-negative"));
        }
        if !settings.top_up_amount.is_positive() {
            return Err(invalid("account", "top_up_amount", "top_up_amount must be positive"));
        }
        Ok(())
    })?;
    validate_web(config)?;
    validate_auth(config)?;
    Ok(())
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> PapertradeError {
    PapertradeError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn missing(section: &str, key: &str) -> PapertradeError {
    PapertradeError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn validate_database(config: &dyn ConfigPort) -> Result<(), PapertradeError> {
    let backend = config
        .get_string("database", "backend")
        .unwrap_or_else(|| "sqlite".to_string());

    match backend.as_str() {
        "sqlite" => {
            if config.get_string("sqlite", "path").is_none() {
                return Err(missing("sqlite", "path"));
            }
            if config.get_int("sqlite", "pool_size", 4) < 1 {
                return Err(invalid("sqlite", "pool_size", "pool_size must be at least 1"));
            }
            if config.get_int("sqlite", "busy_timeout_ms", 5000) < 0 {
                return Err(invalid(
                    "sqlite",
                    "busy_timeout_ms",
                    "busy_timeout_ms must be non-negative",
                ));
            }
        }
        "postgres" => {
            if config.get_string("postgres", "connection_string").is_none() {
                return Err(missing("postgres", "connection_string"));
            }
            if config.get_int("postgres", "pool_size", 4) < 1 {
                return Err(invalid("postgres", "pool_size", "pool_size must be at least 1"));
            }
            // Postgres treats a zero lock_timeout as "wait forever".
            if config.get_int("postgres", "lock_timeout_ms", 5000) < 1 {
                return Err(invalid(
                    "postgres",
                    "lock_timeout_ms",
                    "lock_timeout_ms must be at least 1",
                ));
            }
        }
        other => {
            return Err(invalid(
                "database",
                "backend",
                format!("unknown backend {other:?}, expected sqlite or postgres"),
            ));
        }
    }
    Ok(())
}

fn validate_quotes(config: &dyn ConfigPort) -> Result<(), PapertradeError> {
    let provider = config
        .get_string("quotes", "provider")
        .unwrap_or_else(|| "finnhub".to_string());

    match provider.as_str() {
        "finnhub" => {
            let timeout = config.get_int("quotes", "timeout_secs", 5);
            if !(1..=60).contains(&timeout) {
                return Err(invalid(
                    "quotes",
                    "timeout_secs",
                    "timeout_secs must be between 1 and 60",
                ));
            }
        }
        "fixed" => {
            if config.get_string("quotes", "fixed_prices").is_none() {
                return Err(missing("quotes", "fixed_prices"));
            }
        }
        other => {
            return Err(invalid(
                "quotes",
                "provider",
                format!("unknown provider {other:?}, expected finnhub or fixed"),
            ));
        }
    }
    Ok(())
}

fn validate_web(config: &dyn ConfigPort) -> Result<(), PapertradeError> {
    if let Some(listen) = config.get_string("web", "listen") {
        listen
            .parse::<SocketAddr>()
            .map_err(|e| invalid("web", "listen", e.to_string()))?;
    }
    Ok(())
}

fn validate_auth(config: &dyn ConfigPort) -> Result<(), PapertradeError> {
    if config.get_int("auth", "session_lifetime", 86400) <= 0 {
        return Err(invalid(
            "auth",
            "session_lifetime",
            "session_lifetime must be positive",
        ));
    }

    match config
        .get_string("auth", "session_store")
        .as_deref()
        .unwrap_or("memory")
    {
        "memory" => {}
        "sqlite" => {
            if config.get_string("auth", "session_path").is_none() {
                return Err(missing("auth", "session_path"));
            }
        }
        other => {
            return Err(invalid(
                "auth",
                "session_store",
                format!("unknown session store {other:?}, expected memory or sqlite"),
            ));
        }
    }

    if let Some(secret) = config.get_string("auth", "session_secret") {
        let bytes = hex::decode(secret.trim())
            .map_err(|_| invalid("auth", "session_secret", "session_secret must be hex"))?;
        if bytes.len() < SESSION_SECRET_MIN_BYTES {
            return Err(invalid(
                "auth",
                "session_secret",
                format!("session_secret must be at least {SESSION_SECRET_MIN_BYTES} bytes"),
            ));
        }
    }
    Ok(())
}
