//! patterntrader: candlestick pattern detection, rule-based and
//! opening-range-breakout backtesting, and live exit monitoring.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], command dispatch in [`cli`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
