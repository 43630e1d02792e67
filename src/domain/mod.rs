//! Core domain types and logic.

pub mod account;
pub mod config_validation;
pub mod error;
pub mod money;
pub mod portfolio;
pub mod position;
pub mod quote;
pub mod trade;
pub mod transaction;
