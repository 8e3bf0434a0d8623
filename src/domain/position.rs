//! Open positions and completed trades.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::exit::{ExitReason, RiskTargets};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => f.write_str("long"),
            Direction::Short => f.write_str("short"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub rule_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub shares: i64,
    pub entry_price: f64,
    pub entry_timestamp: NaiveDateTime,
    pub highest_price: f64,
    pub lowest_price: f64,
    pub targets: RiskTargets,
    pub entry_commission: f64,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rule_id: &str,
        symbol: &str,
        direction: Direction,
        shares: i64,
        entry_price: f64,
        entry_timestamp: NaiveDateTime,
        targets: RiskTargets,
        entry_commission: f64,
    ) -> Self {
        Position {
            rule_id: rule_id.to_string(),
            symbol: symbol.to_string(),
            direction,
            shares,
            entry_price,
            entry_timestamp,
            highest_price: entry_price,
            lowest_price: entry_price,
            targets,
            entry_commission,
        }
    }

    pub fn is_long(&self) -> bool {
        self.direction == Direction::Long
    }

    pub fn is_short(&self) -> bool {
        self.direction == Direction::Short
    }

    /// Track best and worst prices seen since entry.
    pub fn observe(&mut self, price: f64) {
        self.highest_price = self.highest_price.max(price);
        self.lowest_price = self.lowest_price.min(price);
    }

    pub fn entry_notional(&self) -> f64 {
        self.shares as f64 * self.entry_price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.direction.sign() * self.shares as f64 * (price - self.entry_price)
    }

    /// Cash that closing at `price` would return, before exit costs. A short
    /// returns its escrowed notional plus the price difference.
    pub fn mark_to_market(&self, price: f64) -> f64 {
        self.entry_notional() + self.unrealized_pnl(price)
    }

    pub fn holding_duration(&self, at: NaiveDateTime) -> Duration {
        at - self.entry_timestamp
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub rule_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub shares: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_timestamp: NaiveDateTime,
    pub exit_timestamp: NaiveDateTime,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub holding_minutes: i64,
    pub exit_reason: ExitReason,
}

impl Trade {
    /// Close `position` at `exit_price`. P&L is net of entry and exit
    /// commissions; P&L% is relative to entry notional.
    pub fn from_position(
        position: &Position,
        exit_price: f64,
        exit_timestamp: NaiveDateTime,
        exit_commission: f64,
        exit_reason: ExitReason,
    ) -> Self {
        let pnl = position.unrealized_pnl(exit_price) - position.entry_commission - exit_commission;
        let notional = position.entry_notional();
        let pnl_pct = if notional > 0.0 {
            pnl / notional * 100.0
        } else {
            0.0
        };
        Trade {
            rule_id: position.rule_id.clone(),
            symbol: position.symbol.clone(),
            direction: position.direction,
            shares: position.shares,
            entry_price: position.entry_price,
            exit_price,
            entry_timestamp: position.entry_timestamp,
            exit_timestamp,
            pnl,
            pnl_pct,
            holding_minutes: position.holding_duration(exit_timestamp).num_minutes(),
            exit_reason,
        }
    }

    pub fn holding_duration(&self) -> Duration {
        self.exit_timestamp - self.entry_timestamp
    }

    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}
