//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::finnhub_adapter::FinnhubAdapter;
use crate::adapters::fixed_quote_adapter::FixedQuoteAdapter;
use crate::domain::account::{AccountSettings, User};
use crate::domain::config_validation::validate_app_config;
use crate::domain::error::PapertradeError;
use crate::domain::money::Money;
use crate::domain::portfolio::{load_portfolio, PortfolioSummary};
use crate::domain::trade::{parse_share_count, TradeContext, TradeExecutor, TradeReceipt};
use crate::domain::transaction::Transaction;
use crate::ports::config_port::ConfigPort;
use crate::ports::ledger_port::LedgerPort;
use crate::ports::quote_port::QuotePort;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:3000";

#[derive(Parser, Debug)]
#[command(name = "papertrade", about = "Play-money stock trading simulator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the web server
    Serve {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Create the ledger schema
    InitDb {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Create an account; the password is read from stdin
    Register {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        user: String,
    },
    /// Look up the current price of a symbol
    Quote {
        #[arg(short, long)]
        config: PathBuf,
        symbol: String,
    },
    /// Buy shares at the current price
    Buy {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        symbol: String,
        #[arg(long)]
        shares: String,
    },
    /// Sell owned shares at the current price
    Sell {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        symbol: String,
        #[arg(long)]
        shares: String,
    },
    /// Add play money to an account
    Deposit {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        user: String,
        /// Defaults to `[account] top_up_amount`
        #[arg(long)]
        amount: Option<String>,
    },
    /// Show holdings at current prices, cash and total
    Portfolio {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        user: String,
    },
    /// List an account's transactions
    History {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        user: String,
        /// Write CSV to stdout instead of a table
        #[arg(long)]
        csv: bool,
    },
    /// Output an argon2 hash for a password read from stdin
    HashPassword,
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Serve { config } => run_serve(&config),
        Command::InitDb { config } => run_init_db(&config),
        Command::Register { config, user } => run_register(&config, &user),
        Command::Quote { config, symbol } => run_quote(&config, &symbol),
        Command::Buy {
            config,
            user,
            symbol,
            shares,
        } => run_trade(&config, &user, &symbol, &shares, TradeDirection::Buy),
        Command::Sell {
            config,
            user,
            symbol,
            shares,
        } => run_trade(&config, &user, &symbol, &shares, TradeDirection::Sell),
        Command::Deposit {
            config,
            user,
            amount,
        } => run_deposit(&config, &user, amount.as_deref()),
        Command::Portfolio { config, user } => run_portfolio(&config, &user),
        Command::History { config, user, csv } => run_history(&config, &user, csv),
        Command::HashPassword => run_hash_password(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(&e)
        }
    }
}

/// Everything a command needs once the config file has been loaded and checked.
pub struct App {
    pub config: FileConfigAdapter,
    pub ledger: Arc<dyn LedgerPort>,
    pub quotes: Arc<dyn QuotePort>,
    pub settings: AccountSettings,
}

impl App {
    pub fn executor(&self) -> TradeExecutor {
        TradeExecutor::new(self.ledger.clone(), self.quotes.clone())
    }

    pub fn user(&self, username: &str) -> Result<User, PapertradeError> {
        self.ledger
            .find_user_by_username(username.trim())?
            .ok_or_else(|| PapertradeError::UserNotFound {
                user: username.trim().to_string(),
            })
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, PapertradeError> {
    tracing::debug!(path = %path.display(), "loading config");
    FileConfigAdapter::from_file(path)
}

/// Load, validate and wire up the app. The ledger schema is created if missing.
pub fn open_app(config_path: &Path) -> Result<App, PapertradeError> {
    let config = load_config(config_path)?;
    validate_app_config(&config)?;

    let ledger = build_ledger(&config)?;
    ledger.initialize_schema()?;
    let quotes = build_quotes(&config)?;
    let settings = AccountSettings::from_config(&config)?;

    Ok(App {
        config,
        ledger,
        quotes,
        settings,
    })
}

pub fn build_ledger(config: &dyn ConfigPort) -> Result<Arc<dyn LedgerPort>, PapertradeError> {
    let backend = config
        .get_string("database", "backend")
        .unwrap_or_else(|| "sqlite".to_string());

    match backend.as_str() {
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let adapter = crate::adapters::sqlite_adapter::SqliteAdapter::from_config(config)?;
            Ok(Arc::new(adapter))
        }
        #[cfg(feature = "postgres")]
        "postgres" => {
            let adapter = crate::adapters::postgres_adapter::PostgresAdapter::from_config(config)?;
            Ok(Arc::new(adapter))
        }
        other => Err(PapertradeError::ConfigInvalid {
            section: "database".into(),
            key: "backend".into(),
            reason: format!("backend {other:?} is not enabled in this build"),
        }),
    }
}

pub fn build_quotes(config: &dyn ConfigPort) -> Result<Arc<dyn QuotePort>, PapertradeError> {
    let provider = config
        .get_string("quotes", "provider")
        .unwrap_or_else(|| "finnhub".to_string());

    match provider.as_str() {
        "finnhub" => Ok(Arc::new(FinnhubAdapter::from_config(config)?)),
        "fixed" => Ok(Arc::new(FixedQuoteAdapter::from_config(config)?)),
        other => Err(PapertradeError::ConfigInvalid {
            section: "quotes".into(),
            key: "provider".into(),
            reason: format!("unknown provider {other:?}"),
        }),
    }
}

fn run_init_db(config_path: &Path) -> Result<(), PapertradeError> {
    open_app(config_path)?;
    eprintln!("Ledger schema ready");
    Ok(())
}

fn run_quote(config_path: &Path, symbol: &str) -> Result<(), PapertradeError> {
    let app = open_app(config_path)?;
    let quote = app.executor().quote(symbol)?;
    println!("{} ({}): {}", quote.name, quote.symbol, quote.price);
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum TradeDirection {
    Buy,
    Sell,
}

fn run_trade(
    config_path: &Path,
    username: &str,
    symbol: &str,
    shares: &str,
    direction: TradeDirection,
) -> Result<(), PapertradeError> {
    let app = open_app(config_path)?;
    let user = app.user(username)?;
    let shares = parse_share_count(shares)?;
    let ctx = TradeContext::new(user.id);
    let executor = app.executor();

    let receipt = match direction {
        TradeDirection::Buy => executor.buy(&ctx, symbol, shares)?,
        TradeDirection::Sell => executor.sell(&ctx, symbol, shares)?,
    };
    println!("{}", describe_receipt(&receipt));
    Ok(())
}

pub fn describe_receipt(receipt: &TradeReceipt) -> String {
    let tx = &receipt.transaction;
    format!(
        "{} {} {} @ {} (cash {} -> {})",
        if tx.share_delta > 0 { "Bought" } else { "Sold" },
        tx.share_delta.abs(),
        tx.symbol,
        tx.price,
        receipt.cash_before,
        receipt.cash_after
    )
}

fn run_deposit(
    config_path: &Path,
    username: &str,
    amount: Option<&str>,
) -> Result<(), PapertradeError> {
    let app = open_app(config_path)?;
    let user = app.user(username)?;
    let amount = match amount {
        Some(raw) => Money::parse(raw)?,
        None => app.settings.top_up_amount,
    };

    let cash = app.executor().top_up(&TradeContext::new(user.id), amount)?;
    println!("Deposited {amount}; cash is now {cash}");
    Ok(())
}

fn run_portfolio(config_path: &Path, username: &str) -> Result<(), PapertradeError> {
    let app = open_app(config_path)?;
    let user = app.user(username)?;
    let summary = load_portfolio(
        &*app.ledger,
        &*app.quotes,
        user.id,
        app.settings.missing_quote_policy,
    )?;
    print!("{}", format_portfolio(&summary));
    Ok(())
}

pub fn format_portfolio(summary: &PortfolioSummary) -> String {
    let mut out = format!(
        "{:<10} {:>8} {:>14} {:>16}\n",
        "SYMBOL", "SHARES", "PRICE", "VALUE"
    );
    for holding in &summary.holdings {
        let price = if holding.stale {
            format!("{}*", holding.price)
        } else {
            holding.price.to_string()
        };
        out.push_str(&format!(
            "{:<10} {:>8} {:>14} {:>16}\n",
            holding.symbol,
            holding.shares,
            price,
            holding.value.to_string()
        ));
    }
    out.push_str(&format!("{:<34} {:>16}\n", "CASH", summary.cash.to_string()));
    out.push_str(&format!("{:<34} {:>16}\n", "TOTAL", summary.total.to_string()));
    if !summary.excluded.is_empty() {
        out.push_str(&format!(
            "no current price for {}, not included\n",
            summary.excluded.join(", ")
        ));
    }
    out
}

#[derive(serde::Serialize)]
struct HistoryRecord<'a> {
    id: i64,
    symbol: &'a str,
    side: &'static str,
    shares: i64,
    price: String,
    transacted_at: String,
}

impl<'a> From<&'a Transaction> for HistoryRecord<'a> {
    fn from(tx: &'a Transaction) -> Self {
        Self {
            id: tx.id,
            symbol: &tx.symbol,
            side: tx.side().as_str(),
            shares: tx.share_delta.abs(),
            price: tx.price.to_decimal().to_string(),
            transacted_at: tx.transacted_at.to_rfc3339(),
        }
    }
}

fn run_history(config_path: &Path, username: &str, csv: bool) -> Result<(), PapertradeError> {
    let app = open_app(config_path)?;
    let user = app.user(username)?;
    let transactions = app.ledger.list_transactions(user.id)?;

    if csv {
        write_history_csv(&transactions, io::stdout().lock())?;
    } else {
        for tx in &transactions {
            println!(
                "{:>6} {:<10} {:<4} {:>8} {:>14} {}",
                tx.id,
                tx.symbol,
                tx.side().as_str(),
                tx.share_delta.abs(),
                tx.price.to_string(),
                tx.transacted_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
    Ok(())
}

pub fn write_history_csv<W: io::Write>(
    transactions: &[Transaction],
    out: W,
) -> Result<(), PapertradeError> {
    let mut writer = csv::Writer::from_writer(out);
    for tx in transactions {
        writer
            .serialize(HistoryRecord::from(tx))
            .map_err(io::Error::from)?;
    }
    writer.flush()?;
    Ok(())
}

fn read_password() -> Result<String, PapertradeError> {
    eprintln!("Enter password:");
    let line = io::stdin().lock().lines().next().transpose()?;
    Ok(line.unwrap_or_default().trim_end_matches('\r').to_string())
}

#[cfg(any(feature = "web-sqlite", feature = "web-postgres"))]
fn run_register(config_path: &Path, username: &str) -> Result<(), PapertradeError> {
    use crate::adapters::web::hash_password;
    use crate::domain::account::{register_user, Registration};

    let app = open_app(config_path)?;
    let password = read_password()?;
    let registration = Registration {
        username: username.to_string(),
        confirmation: password.clone(),
        password,
    };
    let user = register_user(
        &*app.ledger,
        &registration,
        app.settings.initial_cash,
        hash_password,
    )?;
    println!("Registered {} with {}", user.username, user.cash);
    Ok(())
}

#[cfg(not(any(feature = "web-sqlite", feature = "web-postgres")))]
fn run_register(_config_path: &Path, _username: &str) -> Result<(), PapertradeError> {
    Err(PapertradeError::invalid_input(
        "web feature is required for register",
    ))
}

#[cfg(any(feature = "web-sqlite", feature = "web-postgres"))]
fn run_hash_password() -> Result<(), PapertradeError> {
    let password = read_password()?;
    println!("{}", crate::adapters::web::hash_password(&password)?);
    Ok(())
}

#[cfg(not(any(feature = "web-sqlite", feature = "web-postgres")))]
fn run_hash_password() -> Result<(), PapertradeError> {
    Err(PapertradeError::invalid_input(
        "web feature is required for hash-password",
    ))
}

#[cfg(any(feature = "web-sqlite", feature = "web-postgres"))]
fn run_serve(config_path: &Path) -> Result<(), PapertradeError> {
    use crate::adapters::web::{build_router, AppState};
    use std::net::SocketAddr;

    eprintln!("Loading config from {}", config_path.display());
    let app = open_app(config_path)?;

    let listen = app
        .config
        .get_string("web", "listen")
        .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e: std::net::AddrParseError| PapertradeError::ConfigInvalid {
            section: "web".into(),
            key: "listen".into(),
            reason: e.to_string(),
        })?;

    // The blocking HTTP client must not be dropped inside the runtime.
    let quotes = app.quotes.clone();
    let state = AppState::new(app.ledger, app.quotes, app.settings, Arc::new(app.config));

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let router = build_router(state).await?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "web server listening");
        eprintln!("Starting web server on {addr}");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok::<(), PapertradeError>(())
    })?;
    drop(runtime);
    drop(quotes);

    tracing::info!("web server stopped");
    Ok(())
}

#[cfg(any(feature = "web-sqlite", feature = "web-postgres"))]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for shutdown signal");
    }
}

#[cfg(not(any(feature = "web-sqlite", feature = "web-postgres")))]
fn run_serve(_config_path: &Path) -> Result<(), PapertradeError> {
    Err(PapertradeError::invalid_input("web feature is required for serve"))
}
