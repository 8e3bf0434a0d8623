#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use patterntrader::domain::error::EngineError;
pub use patterntrader::domain::ohlcv::Bar;
use patterntrader::domain::scanner::ExecutionRequest;
use patterntrader::ports::data_port::DataPort;
use patterntrader::ports::execution_port::{ExecutionPort, Fill};
use patterntrader::ports::quote_port::{Quote, QuotePort};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at_midnight(d: NaiveDate) -> NaiveDateTime {
    d.and_hms_opt(0, 0, 0).unwrap()
}

pub fn bar(ts: NaiveDateTime, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
        timestamp: ts,
        open,
        high,
        low,
        close,
        volume: 10_000,
    }
}

/// One bar per calendar day from `start`, given as (open, high, low, close).
pub fn daily_bars(start: NaiveDate, ohlc: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
    ohlc.iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| bar(at_midnight(start + Duration::days(i as i64)), o, h, l, c))
        .collect()
}

/// A hammer closing at `close`: body 1, lower shadow 10, upper shadow 0.1.
pub fn hammer_ohlc(close: f64) -> (f64, f64, f64, f64) {
    (close - 1.0, close + 0.1, close - 11.0, close)
}

/// Every bar a hammer, closes rising by `step` from `first_close`.
pub fn rising_hammers(start: NaiveDate, count: usize, first_close: f64, step: f64) -> Vec<Bar> {
    let ohlc: Vec<_> = (0..count)
        .map(|i| hammer_ohlc(first_close + step * i as f64))
        .collect();
    daily_bars(start, &ohlc)
}

/// Small-bodied bars that match no pattern.
pub fn quiet_bars(start: NaiveDate, count: usize, close: f64) -> Vec<Bar> {
    let ohlc: Vec<_> = (0..count)
        .map(|_| (close - 0.2, close + 0.3, close - 0.5, close))
        .collect();
    daily_bars(start, &ohlc)
}

pub struct MockDataPort {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, EngineError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(EngineError::DataSource {
                reason: reason.clone(),
            });
        }
        let bars = self
            .data
            .get(symbol)
            .ok_or_else(|| EngineError::UnknownSymbol {
                symbol: symbol.to_string(),
            })?;
        Ok(bars
            .iter()
            .filter(|b| (start..=end).contains(&b.date()))
            .cloned()
            .collect())
    }

    fn list_symbols(&self) -> Result<Vec<String>, EngineError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}

/// Quotes set per symbol; symbols in `failing` return an error and symbols
/// in `delays` answer only after sleeping on the tokio clock.
pub struct MockQuotePort {
    pub prices: Mutex<HashMap<String, f64>>,
    pub failing: Mutex<HashSet<String>>,
    pub delays: Mutex<HashMap<String, std::time::Duration>>,
    pub calls: Mutex<Vec<String>>,
    pub at: NaiveDateTime,
}

impl MockQuotePort {
    pub fn new(at: NaiveDateTime) -> Self {
        Self {
            prices: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            at,
        }
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    pub fn set_failing(&self, symbol: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(symbol.to_string());
        } else {
            set.remove(symbol);
        }
    }

    /// `None` answers immediately again.
    pub fn set_delay(&self, symbol: &str, delay: Option<std::time::Duration>) {
        let mut delays = self.delays.lock().unwrap();
        match delay {
            Some(d) => delays.insert(symbol.to_string(), d),
            None => delays.remove(symbol),
        };
    }

    pub fn call_count(&self, symbol: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|s| *s == symbol).count()
    }
}

#[async_trait]
impl QuotePort for MockQuotePort {
    async fn latest_quote(&self, symbol: &str) -> Result<Quote, EngineError> {
        self.calls.lock().unwrap().push(symbol.to_string());
        let delay = self.delays.lock().unwrap().get(symbol).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(symbol) {
            return Err(EngineError::DataGap {
                symbol: symbol.to_string(),
                reason: "feed unavailable".into(),
            });
        }
        let price = self.prices.lock().unwrap().get(symbol).copied();
        price
            .map(|price| Quote { price, at: self.at })
            .ok_or_else(|| EngineError::DataGap {
                symbol: symbol.to_string(),
                reason: "no quote".into(),
            })
    }
}

/// Fills every request at its reference price unless told to reject.
pub struct MockExecutionPort {
    pub reject: Mutex<bool>,
    pub delay: Mutex<Option<std::time::Duration>>,
    pub requests: Mutex<Vec<ExecutionRequest>>,
    pub at: NaiveDateTime,
}

impl MockExecutionPort {
    pub fn new(at: NaiveDateTime) -> Self {
        Self {
            reject: Mutex::new(false),
            delay: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            at,
        }
    }

    pub fn set_reject(&self, reject: bool) {
        *self.reject.lock().unwrap() = reject;
    }

    pub fn set_delay(&self, delay: Option<std::time::Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionPort for MockExecutionPort {
    async fn execute(&self, request: &ExecutionRequest) -> Result<Fill, EngineError> {
        self.requests.lock().unwrap().push(request.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.reject.lock().unwrap() {
            return Err(EngineError::Execution {
                symbol: request.symbol.clone(),
                reason: "order rejected".into(),
            });
        }
        Ok(Fill {
            price: request.reference_price,
            shares: request.shares,
            at: self.at,
        })
    }
}
