//! Live price port used by the exit monitor.

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::domain::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub price: f64,
    pub at: NaiveDateTime,
}

#[async_trait]
pub trait QuotePort: Send + Sync {
    /// Latest trade price for `symbol`.
    async fn latest_quote(&self, symbol: &str) -> Result<Quote, EngineError>;
}
