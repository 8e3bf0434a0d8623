//! Rule-based backtest over one symbol's bar history.
//!
//! Each bar, once enough history exists: detect patterns on the trailing
//! window, act on matching rules, then run the exit state machine on every
//! open position at the bar's close and record equity. Whatever is still open
//! after the last bar is closed at its close with `end_of_period`.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

use super::error::EngineError;
use super::execution::{EntryOrder, EntryResult, ExecutionConfig, enter_position, exit_position};
use super::exit::{ExitDecision, ExitReason, PriceObservation, evaluate_exit};
use super::indicator::{ADX_RANGING_DEFAULT, IndicatorSeries, calculate_adx, calculate_rsi};
use super::metrics::Metrics;
use super::ohlcv::Bar;
use super::pattern::{PatternThresholds, detect_at};
use super::portfolio::{EquityPoint, Portfolio};
use super::position::{Direction, Trade};
use super::rule::{FilterInputs, Rule, SignalAction};

pub const DEFAULT_MIN_HISTORY_BARS: usize = 10;
pub const DEFAULT_PATTERN_WINDOW: usize = 20;

/// Close everything once the trend fades below `min_adx`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeExit {
    pub adx_period: usize,
    pub min_adx: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub symbol: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub commission_per_trade: f64,
    pub slippage_pct: f64,
    /// Apply the RSI and volume filters as the live scanner does.
    pub apply_filters_in_backtest: bool,
    pub min_history_bars: usize,
    pub pattern_window: usize,
    pub risk_free_rate: f64,
    pub regime_exit: Option<RegimeExit>,
    pub thresholds: PatternThresholds,
}

impl BacktestConfig {
    pub fn new(symbol: &str, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        BacktestConfig {
            symbol: symbol.to_string(),
            start_date,
            end_date,
            initial_capital: 100_000.0,
            commission_per_trade: 0.0,
            slippage_pct: 0.0,
            apply_filters_in_backtest: false,
            min_history_bars: DEFAULT_MIN_HISTORY_BARS,
            pattern_window: DEFAULT_PATTERN_WINDOW,
            risk_free_rate: 0.0,
            regime_exit: None,
            thresholds: PatternThresholds::default(),
        }
    }

    fn execution(&self) -> ExecutionConfig {
        ExecutionConfig {
            commission_per_trade: self.commission_per_trade,
            slippage_pct: self.slippage_pct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub symbol: String,
    pub initial_capital: f64,
    pub final_capital: f64,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: Metrics,
}

/// Bars whose date falls within `[start, end]`.
pub fn bars_in_range(bars: &[Bar], start: NaiveDate, end: NaiveDate) -> Vec<Bar> {
    bars.iter()
        .filter(|b| (start..=end).contains(&b.date()))
        .cloned()
        .collect()
}

pub fn run_rule_backtest(
    bars: &[Bar],
    rules: &[Rule],
    config: &BacktestConfig,
) -> Result<BacktestResult, EngineError> {
    let bars = bars_in_range(bars, config.start_date, config.end_date);
    if bars.is_empty() {
        return Err(EngineError::EmptyDateRange {
            symbol: config.symbol.clone(),
            start: config.start_date,
            end: config.end_date,
        });
    }
    if bars.len() < config.min_history_bars {
        return Err(EngineError::InsufficientData {
            symbol: config.symbol.clone(),
            bars: bars.len(),
            minimum: config.min_history_bars,
        });
    }

    let rules: Vec<&Rule> = rules
        .iter()
        .filter(|r| r.enabled && r.symbol.eq_ignore_ascii_case(&config.symbol))
        .collect();

    info!(
        symbol = %config.symbol,
        bars = bars.len(),
        rules = rules.len(),
        filters = config.apply_filters_in_backtest,
        "starting rule backtest"
    );

    let rsi_by_period: HashMap<usize, IndicatorSeries> = if config.apply_filters_in_backtest {
        rules
            .iter()
            .filter_map(|r| r.filters.rsi.map(|f| f.period))
            .map(|p| (p, calculate_rsi(&bars, p)))
            .collect()
    } else {
        HashMap::new()
    };
    let adx = config
        .regime_exit
        .map(|regime| calculate_adx(&bars, regime.adx_period));

    let exec = config.execution();
    let mut portfolio = Portfolio::new(config.initial_capital);

    for (i, bar) in bars.iter().enumerate() {
        if i >= config.min_history_bars {
            let matches = detect_at(&bars, i, config.pattern_window, &config.thresholds);
            for m in &matches {
                for rule in rules.iter().filter(|r| r.pattern == m.kind) {
                    let inputs = FilterInputs {
                        confidence: m.confidence,
                        rsi: rule
                            .filters
                            .rsi
                            .and_then(|f| rsi_by_period.get(&f.period))
                            .and_then(|s| s.simple_at(i)),
                        volume_ratio: rule.filters.volume.and_then(|f| f.ratio(&bars, i)),
                    };
                    if let Err(rejection) = rule.filters.evaluate(
                        rule.action(),
                        &inputs,
                        config.apply_filters_in_backtest,
                    ) {
                        debug!(rule = %rule.id, pattern = %m.kind, %rejection, "signal filtered");
                        continue;
                    }
                    apply_signal(&mut portfolio, rule, bar, &exec);
                }
            }
        }

        let observation = PriceObservation::historical(bar.close, bar.timestamp);
        let open_ids: Vec<String> = portfolio.positions.keys().cloned().collect();
        for id in open_ids {
            let decision = match portfolio.positions.get_mut(&id) {
                Some(position) => evaluate_exit(position, &observation),
                None => continue,
            };
            if let ExitDecision::Close(reason) = decision {
                close(&mut portfolio, &id, bar, reason, &exec);
            }
        }

        if let (Some(regime), Some(adx)) = (config.regime_exit, &adx)
            && portfolio.position_count() > 0
        {
            let value = adx.simple_at(i).unwrap_or(ADX_RANGING_DEFAULT);
            if value < regime.min_adx {
                debug!(adx = value, min = regime.min_adx, "regime change, closing all");
                let open_ids: Vec<String> = portfolio.positions.keys().cloned().collect();
                for id in open_ids {
                    close(&mut portfolio, &id, bar, ExitReason::RegimeChange, &exec);
                }
            }
        }

        let equity = portfolio.total_equity(|_| Some(bar.close));
        portfolio.record_equity(bar.timestamp, equity);
    }

    if let Some(last) = bars.last()
        && portfolio.position_count() > 0
    {
        let open_ids: Vec<String> = portfolio.positions.keys().cloned().collect();
        for id in open_ids {
            close(&mut portfolio, &id, last, ExitReason::EndOfPeriod, &exec);
        }
        // Exit costs of the final close belong in the last equity point.
        if let Some(point) = portfolio.equity_curve.last_mut() {
            point.equity = portfolio.cash;
        }
    }

    let metrics = Metrics::compute(&portfolio, config.risk_free_rate);
    info!(
        symbol = %config.symbol,
        trades = portfolio.closed_trades.len(),
        final_capital = portfolio.cash,
        "rule backtest complete"
    );

    Ok(BacktestResult {
        symbol: config.symbol.clone(),
        initial_capital: config.initial_capital,
        final_capital: portfolio.cash,
        trades: portfolio.closed_trades,
        equity_curve: portfolio.equity_curve,
        metrics,
    })
}

fn apply_signal(portfolio: &mut Portfolio, rule: &Rule, bar: &Bar, exec: &ExecutionConfig) {
    match rule.action() {
        SignalAction::Open(direction) => {
            if portfolio.has_position(&rule.id) {
                return;
            }
            let order = EntryOrder {
                rule_id: &rule.id,
                symbol: &rule.symbol,
                direction,
                market_price: bar.close,
                at: bar.timestamp,
                position_size_pct: rule.position_size_pct,
                targets: rule.risk,
            };
            match enter_position(portfolio, &order, exec) {
                EntryResult::Entered {
                    shares,
                    execution_price,
                    ..
                } => debug!(
                    rule = %rule.id,
                    %direction,
                    shares,
                    price = execution_price,
                    at = %bar.timestamp,
                    "opened position"
                ),
                EntryResult::InsufficientCapital => {
                    debug!(rule = %rule.id, price = bar.close, "insufficient capital")
                }
            }
        }
        SignalAction::Close(direction) => {
            let ids = positions_to_close(portfolio, &rule.symbol, direction);
            for id in ids {
                close(portfolio, &id, bar, ExitReason::Signal, exec);
            }
        }
    }
}

fn positions_to_close(portfolio: &Portfolio, symbol: &str, direction: Direction) -> Vec<String> {
    portfolio
        .positions
        .values()
        .filter(|p| p.direction == direction && p.symbol.eq_ignore_ascii_case(symbol))
        .map(|p| p.rule_id.clone())
        .collect()
}

fn close(
    portfolio: &mut Portfolio,
    rule_id: &str,
    bar: &Bar,
    reason: ExitReason,
    exec: &ExecutionConfig,
) {
    if let Some(trade) = exit_position(portfolio, rule_id, bar.close, bar.timestamp, reason, exec) {
        debug!(
            rule = %trade.rule_id,
            reason = %trade.exit_reason,
            pnl = trade.pnl,
            at = %bar.timestamp,
            "closed position"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::exit::RiskTargets;
    use crate::domain::pattern::PatternKind;
    use crate::domain::rule::Directive;
    use chrono::{Duration, NaiveDateTime};

    fn day(i: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + Duration::days(i)
    }

    fn bar(i: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: day(i),
            open,
            high,
            low,
            close,
            volume: 1000,
        }
    }

    /// Flat doji-free bars with a hammer at `hammer_at`, rising afterwards.
    fn series_with_hammer(n: i64, hammer_at: i64) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                if i == hammer_at {
                    bar(i, 99.0, 100.1, 89.0, 100.0)
                } else if i > hammer_at {
                    let c = 100.0 + (i - hammer_at) as f64;
                    bar(i, c - 0.5, c + 0.6, c - 0.6, c)
                } else {
                    bar(i, 100.5, 101.0, 99.4, 100.0)
                }
            })
            .collect()
    }

    fn config() -> BacktestConfig {
        BacktestConfig::new(
            "AAPL",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        )
    }

    fn hammer_rule() -> Rule {
        let mut rule = Rule::new("hammer-long", "AAPL", PatternKind::Hammer, Directive::Buy);
        rule.position_size_pct = 50.0;
        rule.risk = RiskTargets {
            take_profit_pct: Some(3.0),
            ..RiskTargets::default()
        };
        rule
    }

    #[test]
    fn empty_date_range_is_error() {
        let bars = series_with_hammer(20, 12);
        let mut cfg = config();
        cfg.start_date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        cfg.end_date = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        let err = run_rule_backtest(&bars, &[], &cfg).unwrap_err();
        assert!(matches!(err, EngineError::EmptyDateRange { .. }));
    }

    #[test]
    fn insufficient_history_is_error() {
        let bars = series_with_hammer(9, 5);
        let err = run_rule_backtest(&bars, &[], &config()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientData {
                bars: 9,
                minimum: 10,
                ..
            }
        ));
    }

    #[test]
    fn empty_rules_keep_equity_flat() {
        let bars = series_with_hammer(30, 15);
        let result = run_rule_backtest(&bars, &[], &config()).unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.equity_curve.len(), 30);
        assert!(
            result
                .equity_curve
                .iter()
                .all(|p| (p.equity - 100_000.0).abs() < f64::EPSILON)
        );
        assert!((result.final_capital - 100_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn hammer_opens_and_take_profit_closes() {
        let bars = series_with_hammer(30, 15);
        let result = run_rule_backtest(&bars, &[hammer_rule()], &config()).unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.entry_timestamp, day(15));
        assert!((trade.entry_price - 100.0).abs() < 1e-10);
        // 3% take profit first reached at close 103.
        assert_eq!(trade.exit_timestamp, day(18));
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
        assert_eq!(trade.shares, 500);
        assert!((result.final_capital - (100_000.0 + trade.pnl)).abs() < 1e-6);
    }

    #[test]
    fn open_position_forced_closed_at_end() {
        let bars = series_with_hammer(20, 15);
        let mut rule = hammer_rule();
        rule.risk = RiskTargets::default();
        let result = run_rule_backtest(&bars, &[rule], &config()).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::EndOfPeriod);
        assert_eq!(result.trades[0].exit_timestamp, day(19));
    }

    #[test]
    fn forced_close_costs_reach_metrics() {
        let bars = series_with_hammer(30, 15);
        let mut rule = hammer_rule();
        rule.risk = RiskTargets::default();
        let mut cfg = config();
        cfg.commission_per_trade = 50.0;
        cfg.slippage_pct = 1.0;
        let result = run_rule_backtest(&bars, &[rule], &cfg).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::EndOfPeriod);
        let last = result.equity_curve.last().unwrap();
        assert_eq!(last.timestamp, day(29));
        assert!((last.equity - result.final_capital).abs() < 1e-6);
        let implied = result.initial_capital * (1.0 + result.metrics.total_return);
        assert!((implied - result.final_capital).abs() < 1e-6);
    }

    #[test]
    fn rules_for_other_symbols_ignored() {
        let bars = series_with_hammer(30, 15);
        let mut rule = hammer_rule();
        rule.symbol = "MSFT".to_string();
        let result = run_rule_backtest(&bars, &[rule], &config()).unwrap();
        assert!(result.trades.is_empty());
    }

    #[test]
    fn min_confidence_blocks_entry() {
        let bars = series_with_hammer(30, 15);
        let mut rule = hammer_rule();
        rule.filters.min_confidence = 71;
        let result = run_rule_backtest(&bars, &[rule], &config()).unwrap();
        assert!(result.trades.is_empty());
    }

    #[test]
    fn pattern_before_min_history_is_ignored() {
        let bars = series_with_hammer(30, 5);
        let result = run_rule_backtest(&bars, &[hammer_rule()], &config()).unwrap();
        assert!(result.trades.is_empty());
    }

    #[test]
    fn costs_are_conserved() {
        let bars = series_with_hammer(30, 15);
        let mut cfg = config();
        cfg.commission_per_trade = 7.5;
        cfg.slippage_pct = 0.2;
        let result = run_rule_backtest(&bars, &[hammer_rule()], &cfg).unwrap();
        let realized: f64 = result.trades.iter().map(|t| t.pnl).sum();
        assert!((result.final_capital - (100_000.0 + realized)).abs() < 1e-6);
    }

    #[test]
    fn deterministic_output() {
        let bars = series_with_hammer(30, 15);
        let a = run_rule_backtest(&bars, &[hammer_rule()], &config()).unwrap();
        let b = run_rule_backtest(&bars, &[hammer_rule()], &config()).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn regime_exit_closes_in_flat_market() {
        let bars = series_with_hammer(20, 15);
        let mut rule = hammer_rule();
        rule.risk = RiskTargets::default();
        let mut cfg = config();
        cfg.regime_exit = Some(RegimeExit {
            adx_period: 14,
            min_adx: 25.0,
        });
        let result = run_rule_backtest(&bars, &[rule], &cfg).unwrap();
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::RegimeChange);
    }
}
