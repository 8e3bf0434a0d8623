//! Candlestick pattern detection.
//!
//! Only the last bar of the supplied window is classified; earlier bars give
//! context for the multi-candle patterns and breakouts. All matching patterns
//! are reported, in a fixed order: single-candle, two-candle, three-candle,
//! then breakout.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::ohlcv::Bar;

pub const HAMMER_SHADOW_TO_BODY: f64 = 2.0;
pub const HAMMER_OPPOSITE_SHADOW_TO_BODY: f64 = 0.3;
pub const HAMMER_BODY_TO_RANGE: f64 = 0.35;
pub const DOJI_BODY_TO_RANGE: f64 = 0.1;
pub const GRAVESTONE_UPPER_TO_RANGE: f64 = 0.6;
pub const GRAVESTONE_LOWER_TO_RANGE: f64 = 0.1;
pub const ENGULFING_BODY_RATIO: f64 = 1.1;
pub const STAR_OUTER_TO_MIDDLE_BODY: f64 = 2.0;
pub const STAR_MIDDLE_BODY_TO_RANGE: f64 = 0.3;
pub const BREAKOUT_LOOKBACK: usize = 5;
pub const BREAKOUT_MARGIN_PCT: f64 = 0.1;
pub const BREAKOUT_MOVE_PCT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Hammer,
    InvertedHammer,
    ShootingStar,
    GravestoneDoji,
    BullishEngulfing,
    BearishEngulfing,
    EveningStar,
    BullishBreakout,
    BearishBreakout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Buy,
    Sell,
}

impl PatternKind {
    pub const ALL: [PatternKind; 9] = [
        PatternKind::Hammer,
        PatternKind::InvertedHammer,
        PatternKind::ShootingStar,
        PatternKind::GravestoneDoji,
        PatternKind::BullishEngulfing,
        PatternKind::BearishEngulfing,
        PatternKind::EveningStar,
        PatternKind::BullishBreakout,
        PatternKind::BearishBreakout,
    ];

    pub fn signal(self) -> Signal {
        match self {
            PatternKind::Hammer
            | PatternKind::InvertedHammer
            | PatternKind::BullishEngulfing
            | PatternKind::BullishBreakout => Signal::Buy,
            PatternKind::ShootingStar
            | PatternKind::GravestoneDoji
            | PatternKind::BearishEngulfing
            | PatternKind::EveningStar
            | PatternKind::BearishBreakout => Signal::Sell,
        }
    }

    /// Fixed confidence score (0-100) for the pattern kind.
    pub fn confidence(self) -> u8 {
        match self {
            PatternKind::Hammer | PatternKind::InvertedHammer | PatternKind::ShootingStar => 70,
            PatternKind::GravestoneDoji => 75,
            PatternKind::BullishEngulfing | PatternKind::BearishEngulfing => 80,
            PatternKind::EveningStar => 85,
            PatternKind::BullishBreakout | PatternKind::BearishBreakout => 75,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PatternKind::Hammer => "hammer",
            PatternKind::InvertedHammer => "inverted_hammer",
            PatternKind::ShootingStar => "shooting_star",
            PatternKind::GravestoneDoji => "gravestone_doji",
            PatternKind::BullishEngulfing => "bullish_engulfing",
            PatternKind::BearishEngulfing => "bearish_engulfing",
            PatternKind::EveningStar => "evening_star",
            PatternKind::BullishBreakout => "bullish_breakout",
            PatternKind::BearishBreakout => "bearish_breakout",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        PatternKind::ALL
            .into_iter()
            .find(|k| k.as_str() == needle)
            .ok_or_else(|| format!("unknown pattern '{}'", s.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PatternMatch {
    pub kind: PatternKind,
    pub signal: Signal,
    pub confidence: u8,
    pub index: usize,
}

impl PatternMatch {
    fn new(kind: PatternKind, index: usize) -> Self {
        PatternMatch {
            kind,
            signal: kind.signal(),
            confidence: kind.confidence(),
            index,
        }
    }
}

/// Geometry thresholds. Defaults are the empirically tuned constants above.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternThresholds {
    pub hammer_shadow_to_body: f64,
    pub hammer_opposite_shadow_to_body: f64,
    pub hammer_body_to_range: f64,
    pub doji_body_to_range: f64,
    pub gravestone_upper_to_range: f64,
    pub gravestone_lower_to_range: f64,
    pub engulfing_body_ratio: f64,
    pub star_outer_to_middle_body: f64,
    pub star_middle_body_to_range: f64,
    pub breakout_lookback: usize,
    pub breakout_margin_pct: f64,
    pub breakout_move_pct: f64,
}

impl Default for PatternThresholds {
    fn default() -> Self {
        PatternThresholds {
            hammer_shadow_to_body: HAMMER_SHADOW_TO_BODY,
            hammer_opposite_shadow_to_body: HAMMER_OPPOSITE_SHADOW_TO_BODY,
            hammer_body_to_range: HAMMER_BODY_TO_RANGE,
            doji_body_to_range: DOJI_BODY_TO_RANGE,
            gravestone_upper_to_range: GRAVESTONE_UPPER_TO_RANGE,
            gravestone_lower_to_range: GRAVESTONE_LOWER_TO_RANGE,
            engulfing_body_ratio: ENGULFING_BODY_RATIO,
            star_outer_to_middle_body: STAR_OUTER_TO_MIDDLE_BODY,
            star_middle_body_to_range: STAR_MIDDLE_BODY_TO_RANGE,
            breakout_lookback: BREAKOUT_LOOKBACK,
            breakout_margin_pct: BREAKOUT_MARGIN_PCT,
            breakout_move_pct: BREAKOUT_MOVE_PCT,
        }
    }
}

/// Detect patterns on the last bar of `window` with default thresholds.
pub fn detect_patterns(window: &[Bar]) -> Vec<PatternMatch> {
    detect_patterns_with(window, &PatternThresholds::default())
}

/// Detect patterns on the last bar of `window`. Match indices refer to
/// positions in `window`.
pub fn detect_patterns_with(window: &[Bar], t: &PatternThresholds) -> Vec<PatternMatch> {
    let Some(current) = window.last() else {
        return Vec::new();
    };
    let index = window.len() - 1;
    let prev = index.checked_sub(1).map(|i| &window[i]);
    let mut matches = Vec::new();

    // Single candle
    if is_hammer(current, t) {
        matches.push(PatternMatch::new(PatternKind::Hammer, index));
    }
    if is_inverted_hammer(current, t) {
        matches.push(PatternMatch::new(PatternKind::InvertedHammer, index));
        if prev.is_some_and(Bar::is_bullish) {
            matches.push(PatternMatch::new(PatternKind::ShootingStar, index));
        }
    }
    if is_gravestone_doji(current, t) {
        matches.push(PatternMatch::new(PatternKind::GravestoneDoji, index));
    }

    // Two candle
    if let Some(prev) = prev {
        let engulfs = current.body() >= t.engulfing_body_ratio * prev.body();
        if prev.is_bearish() && current.is_bullish() && engulfs {
            matches.push(PatternMatch::new(PatternKind::BullishEngulfing, index));
        }
        if prev.is_bullish() && current.is_bearish() && engulfs {
            matches.push(PatternMatch::new(PatternKind::BearishEngulfing, index));
        }
    }

    // Three candle
    if index >= 2 && is_evening_star(&window[index - 2], &window[index - 1], current, t) {
        matches.push(PatternMatch::new(PatternKind::EveningStar, index));
    }

    // Breakout over lookback
    let lookback = t.breakout_lookback;
    if lookback > 0 && window.len() > lookback {
        let prior = &window[index - lookback..index];
        let prev_close = window[index - 1].close;
        let highest = prior.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let lowest = prior.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let move_pct = (current.close - prev_close) / prev_close * 100.0;

        if current.close >= highest * (1.0 + t.breakout_margin_pct / 100.0)
            && move_pct >= t.breakout_move_pct
        {
            matches.push(PatternMatch::new(PatternKind::BullishBreakout, index));
        }
        if current.close <= lowest * (1.0 - t.breakout_margin_pct / 100.0)
            && -move_pct >= t.breakout_move_pct
        {
            matches.push(PatternMatch::new(PatternKind::BearishBreakout, index));
        }
    }

    matches
}

/// Detect patterns at `bars[index]` using the trailing `window_len` bars.
/// Match indices refer to positions in `bars`.
pub fn detect_at(
    bars: &[Bar],
    index: usize,
    window_len: usize,
    t: &PatternThresholds,
) -> Vec<PatternMatch> {
    if index >= bars.len() {
        return Vec::new();
    }
    let start = (index + 1).saturating_sub(window_len.max(1));
    let offset = start;
    detect_patterns_with(&bars[start..=index], t)
        .into_iter()
        .map(|m| PatternMatch {
            index: m.index + offset,
            ..m
        })
        .collect()
}

fn is_hammer(bar: &Bar, t: &PatternThresholds) -> bool {
    let body = bar.body();
    body > 0.0
        && bar.lower_shadow() >= t.hammer_shadow_to_body * body
        && bar.upper_shadow() <= t.hammer_opposite_shadow_to_body * body
        && body <= t.hammer_body_to_range * bar.range()
}

fn is_inverted_hammer(bar: &Bar, t: &PatternThresholds) -> bool {
    let body = bar.body();
    body > 0.0
        && bar.upper_shadow() >= t.hammer_shadow_to_body * body
        && bar.lower_shadow() <= t.hammer_opposite_shadow_to_body * body
        && body <= t.hammer_body_to_range * bar.range()
}

fn is_gravestone_doji(bar: &Bar, t: &PatternThresholds) -> bool {
    let range = bar.range();
    range > 0.0
        && bar.body() <= t.doji_body_to_range * range
        && bar.upper_shadow() >= t.gravestone_upper_to_range * range
        && bar.lower_shadow() <= t.gravestone_lower_to_range * range
}

fn is_evening_star(first: &Bar, middle: &Bar, current: &Bar, t: &PatternThresholds) -> bool {
    let middle_body = middle.body();
    first.is_bullish()
        && first.body() > t.star_outer_to_middle_body * middle_body
        && middle_body < t.star_middle_body_to_range * middle.range()
        && middle.open.min(middle.close) > first.close
        && current.is_bearish()
        && current.body() > t.star_outer_to_middle_body * middle_body
        && current.close < first.body_midpoint()
}
