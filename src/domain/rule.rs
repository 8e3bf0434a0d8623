//! Pattern-triggered trading rules.
//!
//! A rule binds one pattern kind on one symbol to a directive, with entry
//! filters, sizing and risk targets. Rules are read-only during a run except
//! for `last_executed_at`, which the live scanner sets after a fill.

use chrono::{Duration, NaiveDateTime};
use std::fmt;
use std::str::FromStr;

use super::exit::RiskTargets;
use super::indicator_helpers::average_volume_before;
use super::ohlcv::Bar;
use super::pattern::PatternKind;
use super::position::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    Buy,
    Sell,
    Short,
    Cover,
}

/// What a directive does to the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Open(Direction),
    Close(Direction),
}

impl Directive {
    pub fn action(self) -> SignalAction {
        match self {
            Directive::Buy => SignalAction::Open(Direction::Long),
            Directive::Short => SignalAction::Open(Direction::Short),
            Directive::Sell => SignalAction::Close(Direction::Long),
            Directive::Cover => SignalAction::Close(Direction::Short),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Directive::Buy => "buy",
            Directive::Sell => "sell",
            Directive::Short => "short",
            Directive::Cover => "cover",
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Directive {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(Directive::Buy),
            "sell" => Ok(Directive::Sell),
            "short" => Ok(Directive::Short),
            "cover" => Ok(Directive::Cover),
            other => Err(format!("unknown directive '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RsiFilter {
    pub period: usize,
    pub oversold: f64,
    pub overbought: f64,
}

impl RsiFilter {
    /// Longs are refused when overbought, shorts when oversold. Closing
    /// actions and unavailable RSI always pass.
    pub fn allows(&self, action: SignalAction, rsi: Option<f64>) -> bool {
        let Some(rsi) = rsi else {
            return true;
        };
        match action {
            SignalAction::Open(Direction::Long) => rsi < self.overbought,
            SignalAction::Open(Direction::Short) => rsi > self.oversold,
            SignalAction::Close(_) => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeFilter {
    pub period: usize,
    pub min_ratio: f64,
}

impl VolumeFilter {
    /// Current volume over the mean of the preceding `period` bars.
    pub fn ratio(&self, bars: &[Bar], index: usize) -> Option<f64> {
        let avg = average_volume_before(bars, index, self.period)?;
        let current = bars.get(index)?.volume as f64;
        (avg > 0.0).then(|| current / avg)
    }

    pub fn allows(&self, ratio: Option<f64>) -> bool {
        ratio.is_none_or(|r| r >= self.min_ratio)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RuleFilters {
    pub min_confidence: u8,
    pub rsi: Option<RsiFilter>,
    pub volume: Option<VolumeFilter>,
}

/// Values the filters are checked against for one pattern match.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FilterInputs {
    pub confidence: u8,
    pub rsi: Option<f64>,
    pub volume_ratio: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterRejection {
    LowConfidence,
    Rsi,
    Volume,
    Cooldown,
}

impl fmt::Display for FilterRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterRejection::LowConfidence => "confidence below minimum",
            FilterRejection::Rsi => "rsi filter",
            FilterRejection::Volume => "volume filter",
            FilterRejection::Cooldown => "cooldown active",
        };
        f.write_str(s)
    }
}

impl RuleFilters {
    /// Minimum confidence is always checked; the RSI and volume filters only
    /// when `indicator_filters` is set.
    pub fn evaluate(
        &self,
        action: SignalAction,
        inputs: &FilterInputs,
        indicator_filters: bool,
    ) -> Result<(), FilterRejection> {
        if inputs.confidence < self.min_confidence {
            return Err(FilterRejection::LowConfidence);
        }
        if !indicator_filters {
            return Ok(());
        }
        if let Some(rsi) = &self.rsi
            && !rsi.allows(action, inputs.rsi)
        {
            return Err(FilterRejection::Rsi);
        }
        if let Some(volume) = &self.volume
            && !volume.allows(inputs.volume_ratio)
        {
            return Err(FilterRejection::Volume);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: String,
    pub symbol: String,
    pub pattern: PatternKind,
    pub directive: Directive,
    pub position_size_pct: f64,
    pub filters: RuleFilters,
    pub risk: RiskTargets,
    pub cooldown: Option<Duration>,
    pub enabled: bool,
    pub auto_trade_enabled: bool,
    pub last_executed_at: Option<NaiveDateTime>,
}

impl Rule {
    pub fn new(id: &str, symbol: &str, pattern: PatternKind, directive: Directive) -> Self {
        Rule {
            id: id.to_string(),
            symbol: symbol.to_string(),
            pattern,
            directive,
            position_size_pct: 10.0,
            filters: RuleFilters::default(),
            risk: RiskTargets::default(),
            cooldown: None,
            enabled: true,
            auto_trade_enabled: false,
            last_executed_at: None,
        }
    }

    pub fn triggers_on(&self, symbol: &str, pattern: PatternKind) -> bool {
        self.enabled && self.pattern == pattern && self.symbol.eq_ignore_ascii_case(symbol)
    }

    pub fn action(&self) -> SignalAction {
        self.directive.action()
    }

    pub fn in_cooldown(&self, now: NaiveDateTime) -> bool {
        match (self.cooldown, self.last_executed_at) {
            (Some(cooldown), Some(last)) => now - last < cooldown,
            _ => false,
        }
    }

    pub fn has_risk_targets(&self) -> bool {
        !self.risk.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, 1)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn bars_with_volume(volumes: &[i64]) -> Vec<Bar> {
        volumes
            .iter()
            .enumerate()
            .map(|(i, &volume)| Bar {
                timestamp: ts(i as u32, 0),
                open: 10.0,
                high: 11.0,
                low: 9.0,
                close: 10.0,
                volume,
            })
            .collect()
    }

    #[test]
    fn directive_actions_are_exhaustive() {
        assert_eq!(Directive::Buy.action(), SignalAction::Open(Direction::Long));
        assert_eq!(Directive::Short.action(), SignalAction::Open(Direction::Short));
        assert_eq!(Directive::Sell.action(), SignalAction::Close(Direction::Long));
        assert_eq!(Directive::Cover.action(), SignalAction::Close(Direction::Short));
    }

    #[test]
    fn directive_parse() {
        assert_eq!("BUY".parse::<Directive>(), Ok(Directive::Buy));
        assert_eq!(" cover ".parse::<Directive>(), Ok(Directive::Cover));
        assert!("hold".parse::<Directive>().is_err());
    }

    #[test]
    fn rsi_filter_directional() {
        let f = RsiFilter {
            period: 14,
            oversold: 30.0,
            overbought: 70.0,
        };
        let long = SignalAction::Open(Direction::Long);
        let short = SignalAction::Open(Direction::Short);
        assert!(f.allows(long, Some(50.0)));
        assert!(!f.allows(long, Some(75.0)));
        assert!(f.allows(short, Some(50.0)));
        assert!(!f.allows(short, Some(25.0)));
        assert!(f.allows(SignalAction::Close(Direction::Long), Some(99.0)));
        assert!(f.allows(long, None));
    }

    #[test]
    fn volume_ratio_and_filter() {
        let bars = bars_with_volume(&[100, 100, 100, 250]);
        let f = VolumeFilter {
            period: 3,
            min_ratio: 2.0,
        };
        let ratio = f.ratio(&bars, 3);
        assert_eq!(ratio, Some(2.5));
        assert!(f.allows(ratio));
        assert!(!f.allows(Some(1.5)));
        assert_eq!(f.ratio(&bars, 2), None);
        assert!(f.allows(None));
    }

    #[test]
    fn filters_confidence_always_applies() {
        let filters = RuleFilters {
            min_confidence: 75,
            rsi: None,
            volume: None,
        };
        let inputs = FilterInputs {
            confidence: 70,
            ..FilterInputs::default()
        };
        let action = SignalAction::Open(Direction::Long);
        assert_eq!(
            filters.evaluate(action, &inputs, false),
            Err(FilterRejection::LowConfidence)
        );
    }

    #[test]
    fn indicator_filters_toggle() {
        let filters = RuleFilters {
            min_confidence: 0,
            rsi: Some(RsiFilter {
                period: 14,
                oversold: 30.0,
                overbought: 70.0,
            }),
            volume: Some(VolumeFilter {
                period: 3,
                min_ratio: 1.5,
            }),
        };
        let action = SignalAction::Open(Direction::Long);
        let hot = FilterInputs {
            confidence: 80,
            rsi: Some(80.0),
            volume_ratio: Some(2.0),
        };
        assert_eq!(filters.evaluate(action, &hot, false), Ok(()));
        assert_eq!(filters.evaluate(action, &hot, true), Err(FilterRejection::Rsi));

        let quiet = FilterInputs {
            confidence: 80,
            rsi: Some(50.0),
            volume_ratio: Some(1.0),
        };
        assert_eq!(
            filters.evaluate(action, &quiet, true),
            Err(FilterRejection::Volume)
        );
    }

    #[test]
    fn rule_triggers_and_cooldown() {
        let mut rule = Rule::new("r1", "AAPL", PatternKind::Hammer, Directive::Buy);
        assert!(rule.triggers_on("aapl", PatternKind::Hammer));
        assert!(!rule.triggers_on("AAPL", PatternKind::EveningStar));
        assert!(!rule.triggers_on("MSFT", PatternKind::Hammer));

        rule.cooldown = Some(Duration::minutes(30));
        assert!(!rule.in_cooldown(ts(10, 0)));
        rule.last_executed_at = Some(ts(10, 0));
        assert!(rule.in_cooldown(ts(10, 29)));
        assert!(!rule.in_cooldown(ts(10, 30)));

        rule.enabled = false;
        assert!(!rule.triggers_on("AAPL", PatternKind::Hammer));
    }

    #[test]
    fn risk_targets_presence() {
        let mut rule = Rule::new("r1", "AAPL", PatternKind::Hammer, Directive::Buy);
        assert!(!rule.has_risk_targets());
        rule.risk.stop_loss_pct = Some(2.0);
        assert!(rule.has_risk_targets());
    }
}
