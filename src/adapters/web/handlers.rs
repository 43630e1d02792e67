//! HTTP request handlers for web adapter.

use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;
use tower_sessions::Session;

use crate::domain::account::{register_user, Registration};
use crate::domain::error::PapertradeError;
use crate::domain::money::Money;
use crate::domain::portfolio::{load_portfolio, value_portfolio};
use crate::domain::position::positions;
use crate::domain::trade::{parse_share_count, TradeContext, TradeReceipt};
use crate::domain::transaction::TradeSide;

use super::auth::{hash_password, AuthSession, Credentials};
use super::templates::{
    AddCashTemplate, BasePage, BuyTemplate, FlashTemplate, HistoryRow, HistoryTemplate,
    LoginTemplate, OwnedShares, PortfolioTemplate, QuoteTemplate, QuotedTemplate,
    RegisterTemplate, SellTemplate,
};
use super::{handle_error, is_htmx_request, run_blocking, AppState, WebError};

const FLASH_KEY: &str = "papertrade.flash";

async fn set_flash(session: &Session, message: &str) {
    if let Err(e) = session.insert(FLASH_KEY, message).await {
        tracing::warn!(error = %e, "cannot store flash message");
    }
}

async fn take_flash(session: &Session) -> Option<String> {
    match session.remove::<String>(FLASH_KEY).await {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "cannot read flash message");
            None
        }
    }
}

/// Render a content template, wrapped in the layout unless HTMX asked.
async fn page(
    session: &Session,
    headers: &HeaderMap,
    username: Option<&str>,
    title: &str,
    status: StatusCode,
    view: &impl Template,
) -> Response {
    let content = match view.render() {
        Ok(html) => html,
        Err(e) => return WebError::internal(format!("template error: {e}")).into_response(),
    };
    let flash = take_flash(session).await;

    if is_htmx_request(headers) {
        let html = match flash {
            Some(message) => match (FlashTemplate { message: &message }).render() {
                Ok(notice) => notice + &content,
                Err(e) => {
                    return WebError::internal(format!("template error: {e}")).into_response();
                }
            },
            None => content,
        };
        return (status, Html(html)).into_response();
    }

    let layout = BasePage {
        title,
        content: &content,
        flash: flash.as_deref(),
        username,
    };
    match layout.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => WebError::internal(format!("template error: {e}")).into_response(),
    }
}

fn login_redirect() -> Response {
    Redirect::to("/login").into_response()
}

/// Only same-site absolute paths are accepted as post-login targets.
///
/// Browsers read `\` as `/`, so `/\host` is as much a foreign target as `//host`.
fn safe_next(next: Option<&str>) -> &str {
    let Some(path) = next else {
        return "/";
    };
    let mut chars = path.chars();
    let local = chars.next() == Some('/')
        && !matches!(chars.next(), Some('/' | '\\'))
        && !path.chars().any(|c| c.is_control())
        && path
            .parse::<Uri>()
            .is_ok_and(|uri| uri.scheme().is_none() && uri.authority().is_none());
    if local { path } else { "/" }
}

#[derive(Debug, Default, Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub next: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirmation: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SymbolForm {
    #[serde(default)]
    pub symbol: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TradeForm {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub shares: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AddCashForm {
    #[serde(default)]
    pub option: String,
}

pub async fn login_form(
    session: Session,
    headers: HeaderMap,
    Query(query): Query<NextQuery>,
) -> Response {
    let template = LoginTemplate {
        error: None,
        next: safe_next(query.next.as_deref()),
    };
    page(&session, &headers, None, "Log In", StatusCode::OK, &template).await
}

pub async fn login(
    mut auth_session: AuthSession,
    session: Session,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    if form.username.trim().is_empty() {
        return handle_error(PapertradeError::invalid_input("must provide username"), &headers);
    }
    if form.password.is_empty() {
        return handle_error(PapertradeError::invalid_input("must provide password"), &headers);
    }

    let creds = Credentials {
        username: form.username.clone(),
        password: form.password.clone(),
    };
    let user = match auth_session.authenticate(creds).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::info!(username = %form.username.trim(), "login rejected");
            let message = PapertradeError::InvalidCredentials.to_string();
            let template = LoginTemplate {
                error: Some(&message),
                next: safe_next(form.next.as_deref()),
            };
            return page(
                &session,
                &headers,
                None,
                "Log In",
                StatusCode::FORBIDDEN,
                &template,
            )
            .await;
        }
        Err(e) => {
            tracing::error!(error = %e, "authentication failed");
            return WebError::internal("authentication failed").into_response();
        }
    };

    if let Err(e) = auth_session.login(&user).await {
        tracing::error!(error = %e, "cannot start session");
        return WebError::internal("cannot start session").into_response();
    }
    tracing::info!(user_id = user.id, "user logged in");

    Redirect::to(safe_next(form.next.as_deref())).into_response()
}

pub async fn logout(mut auth_session: AuthSession) -> Response {
    match auth_session.logout().await {
        Ok(Some(user)) => tracing::info!(user_id = user.id, "user logged out"),
        Ok(None) => {}
        Err(e) => {
            tracing::error!(error = %e, "cannot end session");
            return WebError::internal("cannot end session").into_response();
        }
    }
    login_redirect()
}

pub async fn register_form(session: Session, headers: HeaderMap) -> Response {
    let template = RegisterTemplate { username: "" };
    page(&session, &headers, None, "Register", StatusCode::OK, &template).await
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    session: Session,
    headers: HeaderMap,
    Form(form): Form<RegisterForm>,
) -> Response {
    let ledger = state.ledger.clone();
    let initial_cash = state.settings.initial_cash;
    let registration = Registration {
        username: form.username,
        password: form.password,
        confirmation: form.confirmation,
    };

    let result = run_blocking(move || {
        register_user(&*ledger, &registration, initial_cash, hash_password)
    })
    .await;

    match result {
        Ok(_) => {
            set_flash(&session, "Registration successful!").await;
            login_redirect()
        }
        Err(err) => handle_error(err, &headers),
    }
}

pub async fn index(
    auth_session: AuthSession,
    session: Session,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let Some(user) = auth_session.user else {
        return login_redirect();
    };
    let ledger = state.ledger.clone();
    let quotes = state.quotes.clone();
    let policy = state.settings.missing_quote_policy;
    let user_id = user.id;

    match run_blocking(move || load_portfolio(&*ledger, &*quotes, user_id, policy)).await {
        Ok(summary) => {
            let template = PortfolioTemplate { summary: &summary };
            page(
                &session,
                &headers,
                Some(&user.username),
                "Portfolio",
                StatusCode::OK,
                &template,
            )
            .await
        }
        Err(err) => handle_error(err, &headers),
    }
}

pub async fn quote_form(
    auth_session: AuthSession,
    session: Session,
    headers: HeaderMap,
) -> Response {
    let username = auth_session.user.map(|u| u.username);
    let template = QuoteTemplate { symbol: "" };
    page(
        &session,
        &headers,
        username.as_deref(),
        "Quote",
        StatusCode::OK,
        &template,
    )
    .await
}

pub async fn quote(
    auth_session: AuthSession,
    session: Session,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<SymbolForm>,
) -> Response {
    let username = auth_session.user.map(|u| u.username);
    let executor = state.executor.clone();

    match run_blocking(move || executor.quote(&form.symbol)).await {
        Ok(quote) => {
            let template = QuotedTemplate { quote: &quote };
            page(
                &session,
                &headers,
                username.as_deref(),
                "Quoted",
                StatusCode::OK,
                &template,
            )
            .await
        }
        Err(err) => handle_error(err, &headers),
    }
}

pub async fn buy_form(
    auth_session: AuthSession,
    session: Session,
    headers: HeaderMap,
    Query(query): Query<SymbolForm>,
) -> Response {
    let username = auth_session.user.map(|u| u.username);
    let template = BuyTemplate {
        symbol: query.symbol.trim(),
    };
    page(
        &session,
        &headers,
        username.as_deref(),
        "Buy",
        StatusCode::OK,
        &template,
    )
    .await
}

async fn submit_trade(
    state: &AppState,
    ctx: TradeContext,
    form: TradeForm,
    side: TradeSide,
) -> Result<TradeReceipt, PapertradeError> {
    let executor = state.executor.clone();
    run_blocking(move || {
        if form.symbol.trim().is_empty() {
            return Err(PapertradeError::invalid_input("must provide symbol"));
        }
        let shares = parse_share_count(&form.shares)?;
        match side {
            TradeSide::Buy => executor.buy(&ctx, &form.symbol, shares),
            TradeSide::Sell => executor.sell(&ctx, &form.symbol, shares),
        }
    })
    .await
}

pub async fn buy(
    auth_session: AuthSession,
    session: Session,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<TradeForm>,
) -> Response {
    let Some(user) = auth_session.user else {
        return login_redirect();
    };

    match submit_trade(&state, TradeContext::new(user.id), form, TradeSide::Buy).await {
        Ok(_) => {
            set_flash(&session, "Bought!").await;
            Redirect::to("/").into_response()
        }
        Err(err) => handle_error(err, &headers),
    }
}

pub async fn sell_form(
    auth_session: AuthSession,
    session: Session,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let Some(user) = auth_session.user else {
        return login_redirect();
    };
    let ledger = state.ledger.clone();
    let quotes = state.quotes.clone();
    let policy = state.settings.missing_quote_policy;
    let user_id = user.id;

    let load = move || {
        let transactions = ledger.list_transactions(user_id)?;
        let summary = value_portfolio(&transactions, Money::ZERO, &*quotes, policy)?;
        Ok::<_, PapertradeError>((positions(&transactions), summary))
    };
    match run_blocking(load).await {
        Ok((held, summary)) => {
            let owned: Vec<OwnedShares> = held
                .into_iter()
                .map(|(symbol, shares)| {
                    let holding = summary.holdings.iter().find(|h| h.symbol == symbol);
                    OwnedShares {
                        price: holding.map(|h| h.price),
                        value: holding.map(|h| h.value),
                        symbol,
                        shares,
                    }
                })
                .collect();
            let template = SellTemplate { owned: &owned };
            page(
                &session,
                &headers,
                Some(&user.username),
                "Sell",
                StatusCode::OK,
                &template,
            )
            .await
        }
        Err(err) => handle_error(err, &headers),
    }
}

pub async fn sell(
    auth_session: AuthSession,
    session: Session,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<TradeForm>,
) -> Response {
    let Some(user) = auth_session.user else {
        return login_redirect();
    };

    match submit_trade(&state, TradeContext::new(user.id), form, TradeSide::Sell).await {
        Ok(_) => {
            set_flash(&session, "Sold!").await;
            Redirect::to("/").into_response()
        }
        Err(err) => handle_error(err, &headers),
    }
}

pub async fn history(
    auth_session: AuthSession,
    session: Session,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let Some(user) = auth_session.user else {
        return login_redirect();
    };
    let ledger = state.ledger.clone();
    let user_id = user.id;

    match run_blocking(move || ledger.list_transactions(user_id)).await {
        Ok(transactions) => {
            let rows: Vec<HistoryRow> = transactions.iter().map(HistoryRow::from).collect();
            let template = HistoryTemplate { rows: &rows };
            page(
                &session,
                &headers,
                Some(&user.username),
                "History",
                StatusCode::OK,
                &template,
            )
            .await
        }
        Err(err) => handle_error(err, &headers),
    }
}

pub async fn addcash_form(
    auth_session: AuthSession,
    session: Session,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let username = auth_session.user.map(|u| u.username);
    let template = AddCashTemplate {
        amount: state.settings.top_up_amount,
    };
    page(
        &session,
        &headers,
        username.as_deref(),
        "Add Cash",
        StatusCode::OK,
        &template,
    )
    .await
}

pub async fn addcash(
    auth_session: AuthSession,
    session: Session,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<AddCashForm>,
) -> Response {
    let Some(user) = auth_session.user else {
        return login_redirect();
    };
    if form.option != "yes" {
        return handle_error(
            PapertradeError::invalid_input("must fill out form correctly"),
            &headers,
        );
    }

    let executor = state.executor.clone();
    let ctx = TradeContext::new(user.id);
    let amount = state.settings.top_up_amount;

    match run_blocking(move || executor.top_up(&ctx, amount)).await {
        Ok(_) => {
            set_flash(&session, "Redeemed!").await;
            Redirect::to("/").into_response()
        }
        Err(err) => handle_error(err, &headers),
    }
}

pub async fn not_found() -> WebError {
    WebError::not_found("page not found")
}
