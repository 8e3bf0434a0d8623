//! Core domain types and logic.

pub mod ohlcv;
pub mod position;
pub mod portfolio;
pub mod execution;
pub mod indicator;
pub mod indicator_helpers;
pub mod indicator_cache;
pub mod pattern;
pub mod exit;
pub mod rule;
pub mod rule_backtest;
pub mod day_trading;
pub mod symbol_series;
pub mod scanner;
pub mod exit_monitor;
pub mod metrics;
pub mod config_validation;
pub mod error;
