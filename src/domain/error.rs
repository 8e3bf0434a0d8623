//! Domain error types.

use chrono::NaiveDate;

/// Top-level error type for patterntrader.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("unknown symbol {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("insufficient data for {symbol}: have {bars} bars, need {minimum}")]
    InsufficientData {
        symbol: String,
        bars: usize,
        minimum: usize,
    },

    #[error("no bars for {symbol} between {start} and {end}")]
    EmptyDateRange {
        symbol: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("data source error: {reason}")]
    DataSource { reason: String },

    #[error("no price observation for {symbol}: {reason}")]
    DataGap { symbol: String, reason: String },

    #[error("execution failed for {symbol}: {reason}")]
    Execution { symbol: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Configuration errors are raised to the caller and never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EngineError::ConfigParse { .. }
                | EngineError::ConfigMissing { .. }
                | EngineError::ConfigInvalid { .. }
                | EngineError::UnknownSymbol { .. }
                | EngineError::InsufficientData { .. }
                | EngineError::EmptyDateRange { .. }
        )
    }

    pub(crate) fn invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        EngineError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn missing(section: &str, key: &str) -> Self {
        EngineError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }
    }
}

impl From<&EngineError> for std::process::ExitCode {
    fn from(err: &EngineError) -> Self {
        let code: u8 = match err {
            EngineError::Io(_) => 1,
            EngineError::ConfigParse { .. }
            | EngineError::ConfigMissing { .. }
            | EngineError::ConfigInvalid { .. }
            | EngineError::UnknownSymbol { .. } => 2,
            EngineError::DataSource { .. } | EngineError::DataGap { .. } => 3,
            EngineError::Execution { .. } => 4,
            EngineError::InsufficientData { .. } | EngineError::EmptyDateRange { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
