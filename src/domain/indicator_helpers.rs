//! Shared helper functions for indicator calculations.

use crate::domain::ohlcv::Bar;

/// Wilder smoothing of `values[start..]`.
///
/// The seed at `start + period - 1` is the simple mean of the first `period`
/// values; after that `s = (s_prev * (period - 1) + v) / period`. Indices
/// before the seed are `None`.
pub fn wilder_smooth(values: &[f64], start: usize, period: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let mut out = vec![None; n];
    if period == 0 || start + period > n {
        return out;
    }

    let seed_idx = start + period - 1;
    let mut smoothed = values[start..=seed_idx].iter().sum::<f64>() / period as f64;
    out[seed_idx] = Some(smoothed);

    for i in (seed_idx + 1)..n {
        smoothed = (smoothed * (period - 1) as f64 + values[i]) / period as f64;
        out[i] = Some(smoothed);
    }
    out
}

/// Mean volume of the `period` bars preceding `index` (the bar at `index`
/// itself is excluded). `None` when fewer than `period` bars precede it.
pub fn average_volume_before(bars: &[Bar], index: usize, period: usize) -> Option<f64> {
    if period == 0 || index < period || index > bars.len() {
        return None;
    }
    let window = &bars[index - period..index];
    Some(window.iter().map(|b| b.volume as f64).sum::<f64>() / period as f64)
}

/// Mean of `range_pct` over a slice of bars, ignoring non-finite entries.
pub fn average_range_pct(bars: &[Bar]) -> Option<f64> {
    let ranges: Vec<f64> = bars
        .iter()
        .map(Bar::range_pct)
        .filter(|r| r.is_finite())
        .collect();
    if ranges.is_empty() {
        return None;
    }
    Some(ranges.iter().sum::<f64>() / ranges.len() as f64)
}
