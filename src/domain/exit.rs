//! Exit-condition state machine shared by the rule-based simulator and the
//! live exit monitor.
//!
//! A position is OPEN until one observation closes it. Each observation first
//! updates the best/worst price seen since entry, then tests, in order:
//! take-profit, trailing stop, stop-loss, time stop.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::position::{Direction, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    TimeStop,
    EndOfPeriod,
    RegimeChange,
    Signal,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::TimeStop => "time_stop",
            ExitReason::EndOfPeriod => "end_of_period",
            ExitReason::RegimeChange => "regime_change",
            ExitReason::Signal => "signal",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk parameters attached to a position. Percentages are in percent
/// (5.0 = 5%); `None` disables the check.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RiskTargets {
    pub take_profit_pct: Option<f64>,
    pub stop_loss_pct: Option<f64>,
    pub trailing_stop_pct: Option<f64>,
    pub max_holding: Option<Duration>,
}

impl RiskTargets {
    pub fn is_empty(&self) -> bool {
        self.take_profit_pct.is_none()
            && self.stop_loss_pct.is_none()
            && self.trailing_stop_pct.is_none()
            && self.max_holding.is_none()
    }
}

/// Where a price observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationSource {
    HistoricalClose,
    PolledQuote,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceObservation {
    pub price: f64,
    pub at: NaiveDateTime,
    pub source: ObservationSource,
}

impl PriceObservation {
    pub fn historical(price: f64, at: NaiveDateTime) -> Self {
        PriceObservation {
            price,
            at,
            source: ObservationSource::HistoricalClose,
        }
    }

    pub fn polled(price: f64, at: NaiveDateTime) -> Self {
        PriceObservation {
            price,
            at,
            source: ObservationSource::PolledQuote,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    Hold,
    Close(ExitReason),
}

impl ExitDecision {
    pub fn is_close(self) -> bool {
        matches!(self, ExitDecision::Close(_))
    }
}

/// Apply one observation to an open position.
///
/// Non-finite prices are ignored and leave the position untouched.
pub fn evaluate_exit(position: &mut Position, obs: &PriceObservation) -> ExitDecision {
    if !obs.price.is_finite() {
        return ExitDecision::Hold;
    }
    position.observe(obs.price);
    check_exit(position, obs)
}

/// Exit test without mutating the position's extremes.
pub fn check_exit(position: &Position, obs: &PriceObservation) -> ExitDecision {
    let price = obs.price;
    let entry = position.entry_price;
    let targets = &position.targets;

    let long = position.direction == Direction::Long;

    if let Some(tp) = targets.take_profit_pct {
        let hit = if long {
            price >= entry * (1.0 + tp / 100.0)
        } else {
            price <= entry * (1.0 - tp / 100.0)
        };
        if hit {
            return ExitDecision::Close(ExitReason::TakeProfit);
        }
    }

    if let Some(trail) = targets.trailing_stop_pct {
        let hit = if long {
            position.highest_price > entry
                && price <= position.highest_price * (1.0 - trail / 100.0)
        } else {
            position.lowest_price < entry && price >= position.lowest_price * (1.0 + trail / 100.0)
        };
        if hit {
            return ExitDecision::Close(ExitReason::TrailingStop);
        }
    }

    if let Some(sl) = targets.stop_loss_pct {
        let hit = if long {
            price <= entry * (1.0 - sl / 100.0)
        } else {
            price >= entry * (1.0 + sl / 100.0)
        };
        if hit {
            return ExitDecision::Close(ExitReason::StopLoss);
        }
    }

    if let Some(max_holding) = targets.max_holding
        && obs.at - position.entry_timestamp >= max_holding
    {
        return ExitDecision::Close(ExitReason::TimeStop);
    }

    ExitDecision::Hold
}
