//! ADX (Average Directional Index), Wilder.
//!
//! Steps:
//! 1. Compute +DM, -DM and true range from consecutive bars
//! 2. Wilder-smooth +DM, -DM and TR over `period`
//! 3. +DI = 100 * smoothed(+DM) / smoothed(TR), -DI likewise
//! 4. DX = 100 * |+DI - -DI| / (+DI + -DI)
//! 5. ADX = Wilder-smoothed DX
//!
//! Warmup: first (2 * period - 1) bars are unavailable.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::indicator_helpers::wilder_smooth;
use crate::domain::ohlcv::Bar;

pub const DEFAULT_ADX_PERIOD: usize = 14;

/// ADX reported when history is too short; read as "ranging".
pub const ADX_RANGING_DEFAULT: f64 = 20.0;

pub fn calculate_adx(bars: &[Bar], period: usize) -> IndicatorSeries {
    let n = bars.len();
    let mut values: Vec<IndicatorPoint> = bars
        .iter()
        .map(|b| IndicatorPoint::unavailable(b.timestamp))
        .collect();

    if period == 0 || n < 2 * period {
        return IndicatorSeries {
            indicator_type: IndicatorType::Adx(period),
            values,
        };
    }

    let mut tr = vec![0.0; n];
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];

    for i in 1..n {
        let up_move = bars[i].high - bars[i - 1].high;
        let down_move = bars[i - 1].low - bars[i].low;

        tr[i] = bars[i].true_range(bars[i - 1].close);
        plus_dm[i] = if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        };
        minus_dm[i] = if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };
    }

    // Directional movement starts at bar 1.
    let smooth_tr = wilder_smooth(&tr, 1, period);
    let smooth_plus = wilder_smooth(&plus_dm, 1, period);
    let smooth_minus = wilder_smooth(&minus_dm, 1, period);

    let mut dx = vec![0.0; n];
    for i in period..n {
        let (Some(str_), Some(sp), Some(sm)) = (smooth_tr[i], smooth_plus[i], smooth_minus[i])
        else {
            continue;
        };
        let plus_di = 100.0 * sp / str_;
        let minus_di = 100.0 * sm / str_;
        let di_sum = plus_di + minus_di;
        dx[i] = if di_sum == 0.0 {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / di_sum
        };
    }

    let adx = wilder_smooth(&dx, period, period);
    for (i, value) in adx.into_iter().enumerate() {
        if let Some(v) = value {
            values[i] = IndicatorPoint::new(bars[i].timestamp, Some(IndicatorValue::Simple(v)));
        }
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Adx(period),
        values,
    }
}

/// Most recent ADX, or [`ADX_RANGING_DEFAULT`] when unavailable.
pub fn latest_adx(bars: &[Bar], period: usize) -> f64 {
    let series = calculate_adx(bars, period);
    match series.latest() {
        Some(IndicatorValue::Simple(v)) => v,
        _ => ADX_RANGING_DEFAULT,
    }
}
