//! Web server adapter.
//!
//! Axum router with askama pages, HTMX fragments and axum-login sessions.
//! Ledger and quote calls are blocking, so handlers run them through
//! [`run_blocking`].

mod auth;
mod error;
mod handlers;
mod templates;

pub use auth::{hash_password, verify_password, AuthSession, Backend, Credentials, SessionUser};
pub use error::{handle_error, status_from_error, WebError};

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue},
    routing::get,
    Router,
};
use axum_login::{login_required, AuthManagerLayerBuilder};
use rand::rngs::OsRng;
use rand::RngCore;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tower_sessions::cookie::Key;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, SessionStore};

use crate::domain::account::AccountSettings;
use crate::domain::config_validation::SESSION_SECRET_MIN_BYTES;
use crate::domain::error::PapertradeError;
use crate::domain::trade::TradeExecutor;
use crate::ports::config_port::ConfigPort;
use crate::ports::ledger_port::LedgerPort;
use crate::ports::quote_port::QuotePort;

pub const DEFAULT_SESSION_LIFETIME_SECS: i64 = 86400;

pub struct AppState {
    pub ledger: Arc<dyn LedgerPort>,
    pub quotes: Arc<dyn QuotePort>,
    pub executor: Arc<TradeExecutor>,
    pub settings: AccountSettings,
    pub config: Arc<dyn ConfigPort + Send + Sync>,
}

impl AppState {
    pub fn new(
        ledger: Arc<dyn LedgerPort>,
        quotes: Arc<dyn QuotePort>,
        settings: AccountSettings,
        config: Arc<dyn ConfigPort + Send + Sync>,
    ) -> Self {
        let executor = Arc::new(TradeExecutor::new(ledger.clone(), quotes.clone()));
        Self {
            ledger,
            quotes,
            executor,
            settings,
            config,
        }
    }
}

/// Build the application router with the session store named by
/// `[auth] session_store`.
pub async fn build_router(state: AppState) -> Result<Router, PapertradeError> {
    let store = state
        .config
        .get_string("auth", "session_store")
        .unwrap_or_else(|| "memory".to_string());

    match store.as_str() {
        "memory" => assemble_router(state, MemoryStore::default()),
        #[cfg(feature = "web-sqlite")]
        "sqlite" => {
            let store = sqlite_session_store(&*state.config).await?;
            assemble_router(state, store)
        }
        other => Err(PapertradeError::ConfigInvalid {
            section: "auth".into(),
            key: "session_store".into(),
            reason: format!("unsupported session store {other:?}"),
        }),
    }
}

#[cfg(feature = "web-sqlite")]
async fn sqlite_session_store(
    config: &dyn ConfigPort,
) -> Result<tower_sessions_rusqlite_store::RusqliteStore, PapertradeError> {
    use tower_sessions::ExpiredDeletion;
    use tower_sessions_rusqlite_store::RusqliteStore;

    let path = config
        .get_string("auth", "session_path")
        .ok_or_else(|| PapertradeError::ConfigMissing {
            section: "auth".into(),
            key: "session_path".into(),
        })?;
    let conn = tokio_rusqlite::Connection::open(&path)
        .await
        .map_err(|e| PapertradeError::Database {
            reason: format!("cannot open session store {path}: {e}"),
        })?;
    let store = RusqliteStore::new(conn);
    store.migrate().await.map_err(|e| PapertradeError::Database {
        reason: format!("cannot migrate session store: {e}"),
    })?;

    tokio::task::spawn(
        store
            .clone()
            .continuously_delete_expired(tokio::time::Duration::from_secs(60)),
    );
    Ok(store)
}

fn assemble_router<S>(state: AppState, store: S) -> Result<Router, PapertradeError>
where
    S: SessionStore + Clone,
{
    let key = session_key(&*state.config)?;
    let lifetime = state.config.get_int(
        "auth",
        "session_lifetime",
        DEFAULT_SESSION_LIFETIME_SECS,
    );

    let session_layer = SessionManagerLayer::new(store)
        .with_secure(false)
        .with_expiry(Expiry::OnInactivity(time::Duration::seconds(lifetime)))
        .with_signed(key);
    let backend = Backend::new(state.ledger.clone());
    let auth_layer = AuthManagerLayerBuilder::new(backend, session_layer).build();

    let protected = Router::new()
        .route("/", get(handlers::index))
        .route("/quote", get(handlers::quote_form).post(handlers::quote))
        .route("/buy", get(handlers::buy_form).post(handlers::buy))
        .route("/sell", get(handlers::sell_form).post(handlers::sell))
        .route("/history", get(handlers::history))
        .route("/addcash", get(handlers::addcash_form).post(handlers::addcash))
        .route_layer(login_required!(Backend, login_url = "/login"));

    Ok(Router::new()
        .merge(protected)
        .route("/login", get(handlers::login_form).post(handlers::login))
        .route(
            "/register",
            get(handlers::register_form).post(handlers::register),
        )
        .route("/logout", get(handlers::logout).post(handlers::logout))
        .nest_service("/static", ServeDir::new("static"))
        .fallback(handlers::not_found)
        .layer(auth_layer)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::EXPIRES,
            HeaderValue::from_static("0"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state)))
}

/// Signing key from `[auth] session_secret` (hex), or a random one.
fn session_key(config: &dyn ConfigPort) -> Result<Key, PapertradeError> {
    let invalid = |reason: String| PapertradeError::ConfigInvalid {
        section: "auth".into(),
        key: "session_secret".into(),
        reason,
    };

    match config.get_string("auth", "session_secret") {
        Some(secret) => {
            let bytes = hex::decode(secret.trim()).map_err(|e| invalid(e.to_string()))?;
            if bytes.len() < SESSION_SECRET_MIN_BYTES {
                return Err(invalid(format!(
                    "session_secret must be at least {SESSION_SECRET_MIN_BYTES} bytes"
                )));
            }
            Key::try_from(bytes.as_slice()).map_err(|e| invalid(e.to_string()))
        }
        None => {
            tracing::warn!("no session_secret configured, sessions will not survive a restart");
            let mut bytes = [0u8; SESSION_SECRET_MIN_BYTES];
            OsRng.fill_bytes(&mut bytes);
            Ok(Key::from(&bytes))
        }
    }
}

fn is_htmx_request(headers: &axum::http::HeaderMap) -> bool {
    headers.get("HX-Request").is_some()
}

/// Run blocking ledger or quote work off the async executor.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, PapertradeError>
where
    F: FnOnce() -> Result<T, PapertradeError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(std::io::Error::from)?
}
