//! Bollinger Bands indicator.
//!
//! Bollinger Bands consist of:
//! - Middle: Simple Moving Average (SMA) over n periods
//! - Upper: Middle + (multiplier × StdDev)
//! - Lower: Middle - (multiplier × StdDev)
//!
//! Where StdDev is population standard deviation (divides by N, not N-1).
//!
//! Default parameters: period=20, multiplier=2.0
//! Warmup: first (period-1) bars are unavailable.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

pub const DEFAULT_PERIOD: usize = 20;
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

pub fn calculate_bollinger(bars: &[Bar], period: usize, multiplier: f64) -> IndicatorSeries {
    let warmup = period.saturating_sub(1);

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if period == 0 || i < warmup {
                return IndicatorPoint::unavailable(bar.timestamp);
            }

            let window = &bars[i + 1 - period..=i];
            let middle = window.iter().map(|b| b.close).sum::<f64>() / period as f64;
            let variance = window
                .iter()
                .map(|b| {
                    let diff = b.close - middle;
                    diff * diff
                })
                .sum::<f64>()
                / period as f64;
            let stddev = variance.sqrt();

            IndicatorPoint::new(
                bar.timestamp,
                Some(IndicatorValue::Bollinger {
                    upper: middle + multiplier * stddev,
                    middle,
                    lower: middle - multiplier * stddev,
                }),
            )
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Bollinger {
            period,
            stddev_mult_x100: (multiplier * 100.0).round() as u32,
        },
        values,
    }
}
