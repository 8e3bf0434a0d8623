//! CSV file bar feed adapter.
//!
//! One file per symbol, `<base_path>/<SYMBOL>.csv`, with header
//! `timestamp,open,high,low,close,volume`. Timestamps are either a date or a
//! date and time.

use crate::domain::error::EngineError;
use crate::domain::ohlcv::Bar;
use crate::ports::data_port::DataPort;
use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", symbol.to_uppercase()))
    }
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn field<T: std::str::FromStr>(
    record: &csv::StringRecord,
    index: usize,
    name: &str,
    line: u64,
) -> Result<T, EngineError>
where
    T::Err: std::fmt::Display,
{
    let raw = record.get(index).ok_or_else(|| EngineError::DataSource {
        reason: format!("line {line}: missing {name} column"),
    })?;
    raw.trim().parse().map_err(|e| EngineError::DataSource {
        reason: format!("line {line}: invalid {name} value {raw:?}: {e}"),
    })
}

impl DataPort for CsvAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, EngineError> {
        let path = self.csv_path(symbol);
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => EngineError::UnknownSymbol {
                symbol: symbol.to_string(),
            },
            _ => EngineError::DataSource {
                reason: format!("failed to read {}: {}", path.display(), e),
            },
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(|e| EngineError::DataSource {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })?;
            let line = record.position().map_or(0, |p| p.line());

            let raw_ts = record.get(0).ok_or_else(|| EngineError::DataSource {
                reason: format!("line {line}: missing timestamp column"),
            })?;
            let timestamp = parse_timestamp(raw_ts).ok_or_else(|| EngineError::DataSource {
                reason: format!("line {line}: invalid timestamp {raw_ts:?}"),
            })?;

            if !(start..=end).contains(&timestamp.date()) {
                continue;
            }

            bars.push(Bar {
                timestamp,
                open: field(&record, 1, "open", line)?,
                high: field(&record, 2, "high", line)?,
                low: field(&record, 3, "low", line)?,
                close: field(&record, 4, "close", line)?,
                volume: field(&record, 5, "volume", line)?,
            });
        }

        bars.sort_by_key(|b| b.timestamp);
        let before = bars.len();
        bars.dedup_by_key(|b| b.timestamp);
        if bars.len() < before {
            debug!(symbol, dropped = before - bars.len(), "duplicate timestamps dropped");
        }
        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, EngineError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| EngineError::DataSource {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::DataSource {
                reason: format!("directory entry error: {}", e),
            })?;
            let name = entry.file_name();
            if let Some(symbol) = name.to_string_lossy().strip_suffix(".csv") {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}
