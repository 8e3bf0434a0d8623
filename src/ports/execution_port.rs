//! Broker/ledger port that fills execution requests.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;

use crate::domain::error::EngineError;
use crate::domain::scanner::ExecutionRequest;

/// A confirmed fill. Its price becomes the position's entry or exit price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Fill {
    pub price: f64,
    pub shares: i64,
    pub at: NaiveDateTime,
}

#[async_trait]
pub trait ExecutionPort: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> Result<Fill, EngineError>;
}
