//! Simple Moving Average.
//!
//! SMA[i] = mean(C[i-n+1..=i]). Warmup: first (n-1) bars are unavailable.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

pub fn calculate_sma(bars: &[Bar], period: usize) -> IndicatorSeries {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let sma = sma_values(&closes, period);

    let values = bars
        .iter()
        .zip(sma)
        .map(|(bar, v)| IndicatorPoint::new(bar.timestamp, v.map(IndicatorValue::Simple)))
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Sma(period),
        values,
    }
}

/// Trailing mean over raw values. Each window is summed afresh so results do
/// not depend on how many values preceded it.
pub(crate) fn sma_values(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }

    (0..values.len())
        .map(|i| {
            if i + 1 < period {
                None
            } else {
                let window = &values[i + 1 - period..=i];
                Some(window.iter().sum::<f64>() / period as f64)
            }
        })
        .collect()
}
