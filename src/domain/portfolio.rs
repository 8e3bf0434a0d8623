//! Simulation cash, open positions and equity tracking.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::position::{Position, Trade};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub equity: f64,
}

/// Positions are keyed by rule id, so a rule holds at most one at a time.
/// Ordered map keeps exit order deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_capital: f64,
    pub positions: BTreeMap<String, Position>,
    pub closed_trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Portfolio {
            cash: initial_capital,
            initial_capital,
            positions: BTreeMap::new(),
            closed_trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn add_position(&mut self, position: Position) {
        self.positions.insert(position.rule_id.clone(), position);
    }

    pub fn get_position(&self, rule_id: &str) -> Option<&Position> {
        self.positions.get(rule_id)
    }

    pub fn has_position(&self, rule_id: &str) -> bool {
        self.positions.contains_key(rule_id)
    }

    pub fn remove_position(&mut self, rule_id: &str) -> Option<Position> {
        self.positions.remove(rule_id)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn record_trade(&mut self, trade: Trade) {
        self.closed_trades.push(trade);
    }

    pub fn record_equity(&mut self, timestamp: NaiveDateTime, equity: f64) {
        self.equity_curve.push(EquityPoint { timestamp, equity });
    }

    /// Cash plus mark-to-market of open positions. Positions without a price
    /// are valued at entry.
    pub fn total_equity<F>(&self, price_of: F) -> f64
    where
        F: Fn(&str) -> Option<f64>,
    {
        let position_value: f64 = self
            .positions
            .values()
            .map(|pos| {
                let price = price_of(&pos.symbol).unwrap_or(pos.entry_price);
                pos.mark_to_market(price)
            })
            .sum();
        self.cash + position_value
    }

    pub fn realized_pnl(&self) -> f64 {
        self.closed_trades.iter().map(|t| t.pnl).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::exit::{ExitReason, RiskTargets};
    use crate::domain::position::Direction;
    use chrono::NaiveDate;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn sample_position(rule_id: &str, symbol: &str, direction: Direction) -> Position {
        Position::new(
            rule_id,
            symbol,
            direction,
            100,
            100.0,
            ts(15),
            RiskTargets::default(),
            0.0,
        )
    }

    #[test]
    fn new_portfolio() {
        let portfolio = Portfolio::new(100000.0);
        assert!((portfolio.cash - 100000.0).abs() < f64::EPSILON);
        assert!((portfolio.initial_capital - 100000.0).abs() < f64::EPSILON);
        assert!(portfolio.positions.is_empty());
        assert!(portfolio.closed_trades.is_empty());
        assert!(portfolio.equity_curve.is_empty());
    }

    #[test]
    fn add_and_get_position() {
        let mut portfolio = Portfolio::new(100000.0);
        portfolio.add_position(sample_position("r1", "AAPL", Direction::Long));

        assert!(portfolio.has_position("r1"));
        assert_eq!(portfolio.get_position("r1").map(|p| p.shares), Some(100));
        assert!(!portfolio.has_position("AAPL"));
    }

    #[test]
    fn remove_position() {
        let mut portfolio = Portfolio::new(100000.0);
        portfolio.add_position(sample_position("r1", "AAPL", Direction::Long));

        assert!(portfolio.remove_position("r1").is_some());
        assert!(!portfolio.has_position("r1"));
        assert!(portfolio.remove_position("r1").is_none());
    }

    #[test]
    fn positions_iterate_in_rule_order() {
        let mut portfolio = Portfolio::new(100000.0);
        for id in ["zeta", "alpha", "mid"] {
            portfolio.add_position(sample_position(id, "AAPL", Direction::Long));
        }
        let ids: Vec<&str> = portfolio.positions.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
        assert_eq!(portfolio.position_count(), 3);
    }

    #[test]
    fn record_equity_and_trades() {
        let mut portfolio = Portfolio::new(100000.0);
        portfolio.record_equity(ts(1), 100000.0);
        portfolio.record_equity(ts(2), 101000.0);
        assert_eq!(portfolio.equity_curve.len(), 2);
        assert!((portfolio.equity_curve[1].equity - 101000.0).abs() < f64::EPSILON);

        let pos = sample_position("r1", "AAPL", Direction::Long);
        portfolio.record_trade(Trade::from_position(
            &pos,
            110.0,
            ts(20),
            0.0,
            ExitReason::TakeProfit,
        ));
        assert!((portfolio.realized_pnl() - 1000.0).abs() < 1e-10);
    }

    #[test]
    fn total_equity_marks_long_and_short() {
        let mut portfolio = Portfolio::new(100000.0);
        portfolio.cash = 80000.0;
        portfolio.add_position(sample_position("r1", "AAPL", Direction::Long));
        portfolio.add_position(sample_position("r2", "MSFT", Direction::Short));

        let equity = portfolio.total_equity(|symbol| match symbol {
            "AAPL" => Some(110.0),
            "MSFT" => Some(90.0),
            _ => None,
        });
        // long 100*110 + short 100*(200-90)
        assert!((equity - (80000.0 + 11000.0 + 11000.0)).abs() < 1e-10);
    }

    #[test]
    fn total_equity_missing_price_uses_entry() {
        let mut portfolio = Portfolio::new(100000.0);
        portfolio.cash = 90000.0;
        portfolio.add_position(sample_position("r1", "AAPL", Direction::Long));
        let equity = portfolio.total_equity(|_| None);
        assert!((equity - 100000.0).abs() < 1e-10);
    }
}
