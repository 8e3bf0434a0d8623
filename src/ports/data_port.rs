//! Bar feed port trait.

use crate::domain::error::EngineError;
use crate::domain::ohlcv::Bar;
use chrono::NaiveDate;

pub trait DataPort {
    /// Bars for `symbol` whose date falls within `[start, end]`, ascending.
    fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, EngineError>;

    fn list_symbols(&self) -> Result<Vec<String>, EngineError>;
}
