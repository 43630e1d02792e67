//! Concrete adapter implementations for ports.

pub mod file_config_adapter;
pub mod finnhub_adapter;
pub mod fixed_quote_adapter;
#[cfg(feature = "postgres")]
pub mod postgres_adapter;
#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;
#[cfg(any(feature = "web-sqlite", feature = "web-postgres"))]
pub mod web;
