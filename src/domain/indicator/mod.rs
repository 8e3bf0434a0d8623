//! Technical indicator implementations.
//!
//! Every indicator is a pure function over an immutable bar slice and returns
//! an [`IndicatorSeries`] aligned 1:1 with its input. Points inside the
//! warm-up period carry no value rather than a placeholder zero, and any
//! non-finite intermediate result is reported the same way, so chart display,
//! live alerting and backtests see identical series for identical bars.
//!
//! - `IndicatorPoint`: a single point in an indicator time series
//! - `IndicatorValue`: enum for different indicator output shapes
//! - `IndicatorType`: indicator identity + parameters (serves as a cache key)
//! - `IndicatorSeries`: a time series of indicator values

pub mod adx;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

pub use adx::{calculate_adx, latest_adx, ADX_RANGING_DEFAULT};
pub use bollinger::calculate_bollinger;
pub use ema::calculate_ema;
pub use macd::{calculate_macd, calculate_macd_default};
pub use rsi::calculate_rsi;
pub use sma::calculate_sma;

use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorPoint {
    pub timestamp: NaiveDateTime,
    pub value: Option<IndicatorValue>,
}

impl IndicatorPoint {
    /// Build a point, demoting non-finite values to unavailable.
    pub fn new(timestamp: NaiveDateTime, value: Option<IndicatorValue>) -> Self {
        let value = value.filter(IndicatorValue::is_finite);
        IndicatorPoint { timestamp, value }
    }

    pub fn unavailable(timestamp: NaiveDateTime) -> Self {
        IndicatorPoint {
            timestamp,
            value: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.value.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum IndicatorValue {
    Simple(f64),
    Macd {
        line: f64,
        signal: f64,
        histogram: f64,
    },
    Bollinger {
        upper: f64,
        middle: f64,
        lower: f64,
    },
}

impl IndicatorValue {
    pub fn is_finite(&self) -> bool {
        match *self {
            IndicatorValue::Simple(v) => v.is_finite(),
            IndicatorValue::Macd {
                line,
                signal,
                histogram,
            } => line.is_finite() && signal.is_finite() && histogram.is_finite(),
            IndicatorValue::Bollinger {
                upper,
                middle,
                lower,
            } => upper.is_finite() && middle.is_finite() && lower.is_finite(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IndicatorType {
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    Adx(usize),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Bollinger {
        period: usize,
        stddev_mult_x100: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub values: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value_at(&self, index: usize) -> Option<IndicatorValue> {
        self.values.get(index).and_then(|p| p.value)
    }

    /// Scalar value at `index` for single-valued indicators.
    pub fn simple_at(&self, index: usize) -> Option<f64> {
        match self.value_at(index)? {
            IndicatorValue::Simple(v) => Some(v),
            _ => None,
        }
    }

    pub fn latest(&self) -> Option<IndicatorValue> {
        self.values.last().and_then(|p| p.value)
    }

    /// Index of the first available point.
    pub fn warmup(&self) -> Option<usize> {
        self.values.iter().position(IndicatorPoint::is_available)
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma(period) => write!(f, "SMA({})", period),
            IndicatorType::Ema(period) => write!(f, "EMA({})", period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::Adx(period) => write!(f, "ADX({})", period),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => {
                let mult = *stddev_mult_x100 as f64 / 100.0;
                write!(f, "BOLLINGER({},{})", period, mult)
            }
        }
    }
}
