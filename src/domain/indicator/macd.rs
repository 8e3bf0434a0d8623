//! MACD (Moving Average Convergence Divergence) indicator.
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) over the defined MACD subsequence, re-aligned
//! to the original bar indices
//! Histogram = MACD Line - Signal Line
//!
//! Default parameters: fast=12, slow=26, signal=9
//! Warmup: max(fast, slow) - 1 + signal - 1 bars.

use crate::domain::indicator::ema::ema_values;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

pub fn calculate_macd(
    bars: &[Bar],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> IndicatorSeries {
    let indicator_type = IndicatorType::Macd {
        fast,
        slow,
        signal: signal_period,
    };
    let mut values: Vec<IndicatorPoint> = bars
        .iter()
        .map(|b| IndicatorPoint::unavailable(b.timestamp))
        .collect();

    if fast == 0 || slow == 0 || signal_period == 0 {
        return IndicatorSeries {
            indicator_type,
            values,
        };
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let ema_fast = ema_values(&closes, fast);
    let ema_slow = ema_values(&closes, slow);

    let macd_line: Vec<Option<f64>> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();

    // Signal EMA runs over the defined MACD values only.
    let (defined_idx, defined_macd): (Vec<usize>, Vec<f64>) = macd_line
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .unzip();
    let signal_line = ema_values(&defined_macd, signal_period);

    for (k, &i) in defined_idx.iter().enumerate() {
        if let Some(signal) = signal_line[k] {
            let line = defined_macd[k];
            values[i] = IndicatorPoint::new(
                bars[i].timestamp,
                Some(IndicatorValue::Macd {
                    line,
                    signal,
                    histogram: line - signal,
                }),
            );
        }
    }

    IndicatorSeries {
        indicator_type,
        values,
    }
}

pub fn calculate_macd_default(bars: &[Bar]) -> IndicatorSeries {
    calculate_macd(bars, DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::calculate_ema;
    use chrono::{Duration, NaiveDate};

    fn make_bars(prices: &[f64]) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: start + Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1000,
            })
            .collect()
    }

    fn trending_bars(n: usize) -> Vec<Bar> {
        let prices: Vec<f64> = (0..n)
            .map(|i| 100.0 + i as f64 + (i as f64 * 0.7).sin() * 3.0)
            .collect();
        make_bars(&prices)
    }

    #[test]
    fn macd_warmup_default() {
        let series = calculate_macd_default(&trending_bars(40));

        let warmup = DEFAULT_SLOW - 1 + DEFAULT_SIGNAL - 1;
        for i in 0..warmup {
            assert!(!series.values[i].is_available(), "index {} should be unavailable", i);
        }
        assert!(series.values[warmup].is_available());
        assert_eq!(series.warmup(), Some(warmup));
    }

    #[test]
    fn macd_histogram_equals_line_minus_signal() {
        let series = calculate_macd_default(&trending_bars(60));

        for point in &series.values {
            if let Some(IndicatorValue::Macd {
                line,
                signal,
                histogram,
            }) = point.value
            {
                assert!((histogram - (line - signal)).abs() < f64::EPSILON);
            }
        }
    }

    #[test]
    fn macd_line_is_ema_fast_minus_ema_slow() {
        let bars = trending_bars(20);
        let series = calculate_macd(&bars, 3, 5, 2);
        let fast = calculate_ema(&bars, 3);
        let slow = calculate_ema(&bars, 5);

        for i in 0..bars.len() {
            if let Some(IndicatorValue::Macd { line, .. }) = series.value_at(i) {
                let expected = fast.simple_at(i).unwrap() - slow.simple_at(i).unwrap();
                assert!((line - expected).abs() < f64::EPSILON, "mismatch at {}", i);
            }
        }
    }

    #[test]
    fn macd_signal_seeded_from_defined_macd() {
        let bars = trending_bars(20);
        let series = calculate_macd(&bars, 3, 5, 2);
        let fast = calculate_ema(&bars, 3);
        let slow = calculate_ema(&bars, 5);

        // First defined MACD at index 4, signal(2) seeds at index 5.
        let m4 = fast.simple_at(4).unwrap() - slow.simple_at(4).unwrap();
        let m5 = fast.simple_at(5).unwrap() - slow.simple_at(5).unwrap();
        assert!(!series.values[4].is_available());
        match series.value_at(5) {
            Some(IndicatorValue::Macd { signal, .. }) => {
                assert!((signal - (m4 + m5) / 2.0).abs() < 1e-12);
            }
            other => panic!("expected MACD value, got {:?}", other),
        }
    }

    #[test]
    fn macd_custom_parameters() {
        let series = calculate_macd(&trending_bars(20), 5, 10, 3);

        let warmup = 10 - 1 + 3 - 1;
        assert!(!series.values[warmup - 1].is_available());
        assert!(series.values[warmup].is_available());
    }

    #[test]
    fn macd_indicator_type() {
        let series = calculate_macd(&make_bars(&[100.0, 101.0, 102.0]), 5, 10, 3);
        assert_eq!(
            series.indicator_type,
            IndicatorType::Macd {
                fast: 5,
                slow: 10,
                signal: 3
            }
        );
    }

    #[test]
    fn macd_zero_period() {
        let bars = make_bars(&[100.0, 101.0, 102.0]);
        for series in [
            calculate_macd(&bars, 0, 26, 9),
            calculate_macd(&bars, 12, 0, 9),
            calculate_macd(&bars, 12, 26, 0),
        ] {
            assert_eq!(series.len(), 3);
            assert_eq!(series.warmup(), None);
        }
    }

    #[test]
    fn macd_empty_bars() {
        assert!(calculate_macd_default(&[]).is_empty());
    }

    #[test]
    fn macd_default_constants() {
        assert_eq!(DEFAULT_FAST, 12);
        assert_eq!(DEFAULT_SLOW, 26);
        assert_eq!(DEFAULT_SIGNAL, 9);
    }
}
