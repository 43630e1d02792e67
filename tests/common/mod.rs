#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;

use papertrade::adapters::fixed_quote_adapter::FixedQuoteAdapter;
use papertrade::adapters::sqlite_adapter::SqliteAdapter;
use papertrade::domain::account::{NewUser, User};
use papertrade::domain::money::Money;
use papertrade::domain::trade::TradeExecutor;
use papertrade::ports::ledger_port::LedgerPort;

/// 128 hex chars, the minimum accepted session secret.
pub const TEST_SESSION_SECRET: &str = "00000000000000000000000000000001\
                                       00000000000000000000000000000001\
                                       00000000000000000000000000000001\
                                       00000000000000000000000000000001";

pub fn cents(value: i64) -> Money {
    Money::from_cents(value)
}

pub fn memory_ledger() -> Arc<SqliteAdapter> {
    let ledger = SqliteAdapter::in_memory().unwrap();
    ledger.initialize_schema().unwrap();
    Arc::new(ledger)
}

/// AAPL at $50.00 and MSFT at $300.00.
pub fn fixed_quotes() -> Arc<FixedQuoteAdapter> {
    Arc::new(
        FixedQuoteAdapter::new()
            .with_price("AAPL", cents(5000))
            .with_price("MSFT", cents(30000)),
    )
}

pub fn create_user(ledger: &dyn LedgerPort, username: &str, cash: Money) -> User {
    ledger
        .create_user(&NewUser {
            username: username.to_string(),
            password_hash: "not-a-real-hash".to_string(),
            cash,
        })
        .unwrap()
}

pub fn executor(ledger: Arc<SqliteAdapter>, quotes: Arc<FixedQuoteAdapter>) -> TradeExecutor {
    TradeExecutor::new(ledger, quotes)
}

pub fn write_temp_ini(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[cfg(feature = "web")]
pub mod web {
    use std::collections::HashMap;
    use std::sync::{Arc, LazyLock};

    use axum::{
        body::Body,
        http::{header, HeaderMap, Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt;
    use papertrade::adapters::file_config_adapter::FileConfigAdapter;
    use papertrade::adapters::fixed_quote_adapter::FixedQuoteAdapter;
    use papertrade::adapters::sqlite_adapter::SqliteAdapter;
    use papertrade::adapters::web::{build_router, hash_password, AppState};
    use papertrade::domain::account::{AccountSettings, NewUser, User};
    use papertrade::ports::ledger_port::LedgerPort;
    use tower::ServiceExt;

    use super::*;

    pub const TEST_USERNAME: &str = "testuser";
    pub const TEST_PASSWORD: &str = "testpass123";

    static TEST_PASSWORD_HASH: LazyLock<String> =
        LazyLock::new(|| hash_password(TEST_PASSWORD).unwrap());

    pub struct TestApp {
        pub router: Router,
        pub ledger: Arc<SqliteAdapter>,
        pub quotes: Arc<FixedQuoteAdapter>,
        pub user: User,
    }

    /// Router over an in-memory ledger with one registered user holding $10,000.00.
    pub async fn create_app() -> TestApp {
        let ledger = memory_ledger();
        let quotes = fixed_quotes();
        let user = ledger
            .create_user(&NewUser {
                username: TEST_USERNAME.to_string(),
                password_hash: TEST_PASSWORD_HASH.clone(),
                cash: cents(10_000_00),
            })
            .unwrap();

        let config = FileConfigAdapter::from_string(&format!(
            "[auth]\nsession_secret = {TEST_SESSION_SECRET}\nsession_lifetime = 3600\n"
        ))
        .unwrap();
        let state = AppState::new(
            ledger.clone(),
            quotes.clone(),
            AccountSettings::default(),
            Arc::new(config),
        );
        let router = build_router(state).await.unwrap();

        TestApp {
            router,
            ledger,
            quotes,
            user,
        }
    }

    pub struct TestResponse {
        pub status: StatusCode,
        pub headers: HeaderMap,
        pub body: String,
    }

    impl TestResponse {
        pub fn location(&self) -> Option<&str> {
            self.headers
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
        }
    }

    /// Sends requests through the router, carrying cookies between them.
    pub struct TestClient {
        router: Router,
        cookies: HashMap<String, String>,
    }

    impl TestClient {
        pub fn new(router: Router) -> Self {
            Self {
                router,
                cookies: HashMap::new(),
            }
        }

        pub async fn logged_in(router: Router) -> Self {
            let mut client = Self::new(router);
            let response = client
                .post_form(
                    "/login",
                    &format!("username={TEST_USERNAME}&password={TEST_PASSWORD}"),
                )
                .await;
            assert_eq!(response.status, StatusCode::SEE_OTHER, "{}", response.body);
            client
        }

        pub async fn get(&mut self, uri: &str) -> TestResponse {
            let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
            self.send(request).await
        }

        pub async fn get_htmx(&mut self, uri: &str) -> TestResponse {
            let request = Request::builder()
                .uri(uri)
                .header("HX-Request", "true")
                .body(Body::empty())
                .unwrap();
            self.send(request).await
        }

        pub async fn post_form(&mut self, uri: &str, form: &str) -> TestResponse {
            let request = Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form.to_string()))
                .unwrap();
            self.send(request).await
        }

        pub async fn post_form_htmx(&mut self, uri: &str, form: &str) -> TestResponse {
            let request = Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header("HX-Request", "true")
                .body(Body::from(form.to_string()))
                .unwrap();
            self.send(request).await
        }

        async fn send(&mut self, mut request: Request<Body>) -> TestResponse {
            if !self.cookies.is_empty() {
                let cookie = self
                    .cookies
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                request
                    .headers_mut()
                    .insert(header::COOKIE, cookie.parse().unwrap());
            }

            let response = self.router.clone().oneshot(request).await.unwrap();
            for set_cookie in response.headers().get_all(header::SET_COOKIE) {
                let set_cookie = set_cookie.to_str().unwrap();
                let pair = set_cookie.split(';').next().unwrap_or("");
                if let Some((name, value)) = pair.split_once('=') {
                    if set_cookie.contains("Max-Age=0") || value.is_empty() {
                        self.cookies.remove(name.trim());
                    } else {
                        self.cookies
                            .insert(name.trim().to_string(), value.trim().to_string());
                    }
                }
            }

            let status = response.status();
            let headers = response.headers().clone();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            TestResponse {
                status,
                headers,
                body: String::from_utf8(bytes.to_vec()).unwrap(),
            }
        }
    }

    pub fn cash_of(ledger: &dyn LedgerPort, user: &User) -> papertrade::domain::money::Money {
        ledger.find_user(user.id).unwrap().unwrap().cash
    }
}
