//! Simulated fills for the rule-based backtest.
//!
//! Entry debits the share cost plus commission from cash; a short escrows its
//! entry notional the same way. Exit credits the proceeds (long) or the
//! escrow plus the price difference (short), minus commission. Realized P&L is
//! net of both commissions, so cash always equals initial capital plus
//! realized P&L once every position is closed.

use chrono::NaiveDateTime;

use super::exit::{ExitReason, RiskTargets};
use super::portfolio::Portfolio;
use super::position::{Direction, Position, Trade};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionConfig {
    pub commission_per_trade: f64,
    pub slippage_pct: f64,
}

pub fn calculate_commission(config: &ExecutionConfig) -> f64 {
    config.commission_per_trade
}

/// Fill price after adverse slippage. Buying (long entry, short exit) pays
/// more; selling (long exit, short entry) receives less.
pub fn apply_slippage(market_price: f64, direction: Direction, is_entry: bool, pct: f64) -> f64 {
    let buying = matches!(
        (direction, is_entry),
        (Direction::Long, true) | (Direction::Short, false)
    );
    if buying {
        market_price * (1.0 + pct / 100.0)
    } else {
        market_price * (1.0 - pct / 100.0)
    }
}

/// Floor share count for `pct` percent of `cash` at `price`.
pub fn shares_for(cash: f64, pct: f64, price: f64) -> i64 {
    if price.is_nan() || price <= 0.0 || cash <= 0.0 || pct <= 0.0 {
        return 0;
    }
    (cash * pct / 100.0 / price).floor() as i64
}

#[derive(Debug, Clone)]
pub struct EntryOrder<'a> {
    pub rule_id: &'a str,
    pub symbol: &'a str,
    pub direction: Direction,
    pub market_price: f64,
    pub at: NaiveDateTime,
    pub position_size_pct: f64,
    pub targets: RiskTargets,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryResult {
    Entered {
        shares: i64,
        execution_price: f64,
        cost: f64,
        commission: f64,
    },
    InsufficientCapital,
}

pub fn enter_position(
    portfolio: &mut Portfolio,
    order: &EntryOrder<'_>,
    config: &ExecutionConfig,
) -> EntryResult {
    let execution_price = apply_slippage(
        order.market_price,
        order.direction,
        true,
        config.slippage_pct,
    );
    let shares = shares_for(portfolio.cash, order.position_size_pct, execution_price);
    if shares == 0 {
        return EntryResult::InsufficientCapital;
    }

    let cost = shares as f64 * execution_price;
    let commission = calculate_commission(config);
    if cost + commission > portfolio.cash {
        return EntryResult::InsufficientCapital;
    }
    portfolio.cash -= cost + commission;

    portfolio.add_position(Position::new(
        order.rule_id,
        order.symbol,
        order.direction,
        shares,
        execution_price,
        order.at,
        order.targets,
        commission,
    ));

    EntryResult::Entered {
        shares,
        execution_price,
        cost,
        commission,
    }
}

/// Close the position held by `rule_id`, credit cash and record the trade.
pub fn exit_position(
    portfolio: &mut Portfolio,
    rule_id: &str,
    market_price: f64,
    at: NaiveDateTime,
    reason: ExitReason,
    config: &ExecutionConfig,
) -> Option<Trade> {
    let position = portfolio.remove_position(rule_id)?;
    let exit_price = apply_slippage(market_price, position.direction, false, config.slippage_pct);
    let exit_commission = calculate_commission(config);

    portfolio.cash += position.mark_to_market(exit_price) - exit_commission;

    let trade = Trade::from_position(&position, exit_price, at, exit_commission, reason);
    portfolio.record_trade(trade.clone());
    Some(trade)
}
