//! RSI (Relative Strength Index) indicator.
//!
//! Uses Wilder's smoothing for average gain/loss calculation:
//! - First average: simple mean of gains/losses over the first n deltas
//! - Subsequent: avg = (prev_avg * (n-1) + current) / n
//!
//! Formula: RSI = 100 - (100 / (1 + avg_gain / avg_loss))
//! If avg_loss == 0: RSI = 100
//!
//! Warmup: first n bars are unavailable (need n price changes to seed).

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

pub const DEFAULT_RSI_PERIOD: usize = 14;

pub fn calculate_rsi(bars: &[Bar], period: usize) -> IndicatorSeries {
    let mut values: Vec<IndicatorPoint> = bars
        .iter()
        .map(|b| IndicatorPoint::unavailable(b.timestamp))
        .collect();

    if period == 0 || bars.len() <= period {
        return IndicatorSeries {
            indicator_type: IndicatorType::Rsi(period),
            values,
        };
    }

    let (gains, losses): (Vec<f64>, Vec<f64>) = bars
        .windows(2)
        .map(|w| {
            let change = w[1].close - w[0].close;
            if change > 0.0 {
                (change, 0.0)
            } else {
                (0.0, -change)
            }
        })
        .unzip();

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;
    values[period] = IndicatorPoint::new(
        bars[period].timestamp,
        Some(IndicatorValue::Simple(rsi_from(avg_gain, avg_loss))),
    );

    let weight = (period - 1) as f64;
    for i in (period + 1)..bars.len() {
        // delta i-1 is close[i] - close[i-1]
        avg_gain = (avg_gain * weight + gains[i - 1]) / period as f64;
        avg_loss = (avg_loss * weight + losses[i - 1]) / period as f64;
        values[i] = IndicatorPoint::new(
            bars[i].timestamp,
            Some(IndicatorValue::Simple(rsi_from(avg_gain, avg_loss))),
        );
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Rsi(period),
        values,
    }
}

fn rsi_from(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - (100.0 / (1.0 + avg_gain / avg_loss))
    }
}
