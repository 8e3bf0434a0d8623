//! Opening-range-breakout day-trading simulator.
//!
//! Daily bars across a symbol universe. A setup exists when today's high
//! clears yesterday's high without an excessive gap and today's range is wide
//! enough; entry is at yesterday's high and the trade is resolved inside the
//! same bar against a fixed target and stop.

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::Serialize;
use std::cmp::Ordering;
use tracing::{debug, info, warn};

use super::error::EngineError;
use super::exit::ExitReason;
use super::indicator_helpers::average_range_pct;
use super::metrics::Metrics;
use super::ohlcv::Bar;
use super::portfolio::EquityPoint;
use super::position::{Direction, Trade};
use super::symbol_series::{SymbolSeries, build_unified_timeline};

pub const ORB_RULE_ID: &str = "orb";

/// Average daily range (percent) treated as a normal regime.
pub const NORMAL_RANGE_PCT: f64 = 1.5;

/// (upper bound of range ratio, slippage multiplier)
const VOLATILITY_TIERS: [(f64, f64); 4] = [(1.0, 1.0), (1.5, 1.5), (2.0, 2.5), (3.0, 5.0)];
const EXTREME_MULTIPLIER: f64 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub struct DayTradingConfig {
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub position_pct: f64,
    pub taper_start_capital: Option<f64>,
    pub taper_end_capital: Option<f64>,
    pub floor_position_pct: f64,
    pub goal_capital: Option<f64>,
    pub profit_target_pct: f64,
    pub stop_loss_pct: f64,
    pub max_gap_pct: f64,
    pub min_range_pct: f64,
    pub max_setups_per_day: usize,
    pub commission_per_round_trip: f64,
    pub base_slippage_pct: f64,
    pub volatility_lookback_days: usize,
    pub yearly_drawdown_limit_pct: Option<f64>,
    pub risk_free_rate: f64,
}

impl DayTradingConfig {
    pub fn new(symbols: Vec<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        DayTradingConfig {
            symbols,
            start_date,
            end_date,
            initial_capital: 10_000.0,
            position_pct: 20.0,
            taper_start_capital: None,
            taper_end_capital: None,
            floor_position_pct: 5.0,
            goal_capital: None,
            profit_target_pct: 2.0,
            stop_loss_pct: 1.0,
            max_gap_pct: 5.0,
            min_range_pct: 0.5,
            max_setups_per_day: 5,
            commission_per_round_trip: 0.0,
            base_slippage_pct: 0.05,
            volatility_lookback_days: 20,
            yearly_drawdown_limit_pct: None,
            risk_free_rate: 0.0,
        }
    }

    /// Percent of capital to commit per setup.
    ///
    /// Full `position_pct` up to `taper_start_capital`, linear down to
    /// `floor_position_pct` at `taper_end_capital`, floor beyond.
    pub fn position_pct_for(&self, capital: f64) -> f64 {
        let (Some(start), Some(end)) = (self.taper_start_capital, self.taper_end_capital) else {
            return self.position_pct;
        };
        if capital <= start {
            self.position_pct
        } else if capital >= end || end <= start {
            self.floor_position_pct
        } else {
            let t = (capital - start) / (end - start);
            self.position_pct + t * (self.floor_position_pct - self.position_pct)
        }
    }
}

/// Slippage multiplier for the universe's trailing average daily range.
pub fn volatility_multiplier(avg_range_pct: f64) -> f64 {
    if !avg_range_pct.is_finite() {
        return 1.0;
    }
    let ratio = avg_range_pct / NORMAL_RANGE_PCT;
    VOLATILITY_TIERS
        .iter()
        .find(|(bound, _)| ratio <= *bound)
        .map(|&(_, m)| m)
        .unwrap_or(EXTREME_MULTIPLIER)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Setup<'a> {
    pub symbol: &'a str,
    pub bar: &'a Bar,
    pub entry_price: f64,
    pub score: f64,
}

/// Check one symbol's day for a breakout setup.
pub fn find_setup<'a>(
    symbol: &'a str,
    today: &'a Bar,
    prev: &Bar,
    config: &DayTradingConfig,
) -> Option<Setup<'a>> {
    if prev.high <= 0.0 || today.high <= prev.high {
        return None;
    }
    let gap_pct = (today.open - prev.high) / prev.high * 100.0;
    if gap_pct.is_nan() || gap_pct >= config.max_gap_pct {
        return None;
    }
    let range_pct = today.range_pct();
    if range_pct.is_nan() || range_pct < config.min_range_pct {
        return None;
    }
    let strength = (today.high - prev.high) / prev.high * 100.0;
    Some(Setup {
        symbol,
        bar: today,
        entry_price: prev.high,
        score: strength * range_pct,
    })
}

/// Resolve a long entry inside one bar. When target and stop are both
/// touched the close decides: below entry means the stop came first.
pub fn resolve_exit(bar: &Bar, entry: f64, config: &DayTradingConfig) -> (f64, ExitReason) {
    let target = entry * (1.0 + config.profit_target_pct / 100.0);
    let stop = entry * (1.0 - config.stop_loss_pct / 100.0);
    let hit_target = bar.high >= target;
    let hit_stop = bar.low <= stop;

    match (hit_target, hit_stop) {
        (true, true) if bar.close < entry => (stop, ExitReason::StopLoss),
        (true, _) => (target, ExitReason::TakeProfit),
        (false, true) => (stop, ExitReason::StopLoss),
        (false, false) => (bar.close, ExitReason::TimeStop),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayTradingResult {
    pub initial_capital: f64,
    pub final_capital: f64,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: Metrics,
    pub total_costs: f64,
    pub breaker_triggered: bool,
    pub breaker_years: Vec<i32>,
    pub goal_reached: bool,
    pub goal_reached_on: Option<NaiveDate>,
}

struct YearGuard {
    year: i32,
    start_capital: f64,
    tripped: bool,
}

pub fn run_day_trading(
    series: &[SymbolSeries],
    config: &DayTradingConfig,
) -> Result<DayTradingResult, EngineError> {
    let timeline: Vec<NaiveDate> = build_unified_timeline(series)
        .into_iter()
        .filter(|d| (config.start_date..=config.end_date).contains(d))
        .collect();
    let Some(&first_day) = timeline.first() else {
        return Err(EngineError::EmptyDateRange {
            symbol: config.symbols.join(","),
            start: config.start_date,
            end: config.end_date,
        });
    };

    info!(
        symbols = series.len(),
        days = timeline.len(),
        capital = config.initial_capital,
        "starting day-trading simulation"
    );

    let mut capital = config.initial_capital;
    let mut trades: Vec<Trade> = Vec::new();
    let mut equity_curve: Vec<EquityPoint> = Vec::new();
    let mut total_costs = 0.0;
    let mut breaker_years: Vec<i32> = Vec::new();
    let mut goal_reached_on: Option<NaiveDate> = None;
    let mut guard = YearGuard {
        year: first_day.year(),
        start_capital: capital,
        tripped: false,
    };

    for &date in &timeline {
        if date.year() != guard.year {
            guard = YearGuard {
                year: date.year(),
                start_capital: capital,
                tripped: false,
            };
        }

        if goal_reached_on.is_none()
            && config.goal_capital.is_some_and(|goal| capital >= goal)
        {
            goal_reached_on = Some(date);
        }

        let multiplier = volatility_multiplier(
            trailing_universe_range(series, date, config.volatility_lookback_days)
                .unwrap_or(NORMAL_RANGE_PCT),
        );

        let mut setups: Vec<Setup<'_>> = series
            .iter()
            .filter_map(|s| {
                let (today, prev) = s.with_prior(date)?;
                find_setup(&s.symbol, today, prev, config)
            })
            .collect();
        setups.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.symbol.cmp(b.symbol))
        });
        setups.truncate(config.max_setups_per_day);

        let day_capital = capital;
        let mut committed = 0.0;

        for setup in &setups {
            if goal_reached_on.is_some() || guard.tripped {
                break;
            }

            let pct = config.position_pct_for(day_capital);
            let notional = (day_capital * pct / 100.0).min(day_capital - committed);
            let shares = if setup.entry_price > 0.0 && notional > 0.0 {
                (notional / setup.entry_price).floor() as i64
            } else {
                0
            };
            if shares == 0 {
                continue;
            }

            let entry = setup.entry_price;
            let (exit, reason) = resolve_exit(setup.bar, entry, config);
            let entry_notional = shares as f64 * entry;
            let exit_notional = shares as f64 * exit;
            let slip_rate = config.base_slippage_pct / 100.0 * multiplier;
            let cost =
                config.commission_per_round_trip + (entry_notional + exit_notional) * slip_rate;
            let pnl = shares as f64 * (exit - entry) - cost;

            committed += entry_notional;
            capital += pnl;
            total_costs += cost;

            debug!(
                symbol = setup.symbol,
                %date,
                shares,
                entry,
                exit,
                %reason,
                pnl,
                multiplier,
                "day trade"
            );

            trades.push(Trade {
                rule_id: ORB_RULE_ID.to_string(),
                symbol: setup.symbol.to_string(),
                direction: Direction::Long,
                shares,
                entry_price: entry,
                exit_price: exit,
                entry_timestamp: setup.bar.timestamp,
                exit_timestamp: setup.bar.timestamp,
                pnl,
                pnl_pct: pnl / entry_notional * 100.0,
                holding_minutes: 0,
                exit_reason: reason,
            });

            if let Some(goal) = config.goal_capital
                && capital >= goal
            {
                info!(%date, capital, goal, "goal capital reached, trading stopped");
                goal_reached_on = Some(date);
            }

            if let Some(limit) = config.yearly_drawdown_limit_pct
                && guard.start_capital > 0.0
                && (guard.start_capital - capital) / guard.start_capital * 100.0 > limit
            {
                warn!(
                    year = guard.year,
                    capital,
                    year_start = guard.start_capital,
                    limit,
                    "yearly drawdown breaker tripped"
                );
                guard.tripped = true;
                breaker_years.push(guard.year);
            }
        }

        equity_curve.push(EquityPoint {
            timestamp: date.and_time(NaiveTime::MIN),
            equity: capital,
        });
    }

    let metrics = Metrics::from_parts(
        &trades,
        &equity_curve,
        config.initial_capital,
        config.risk_free_rate,
    );

    info!(
        trades = trades.len(),
        final_capital = capital,
        total_costs,
        "day-trading simulation complete"
    );

    Ok(DayTradingResult {
        initial_capital: config.initial_capital,
        final_capital: capital,
        trades,
        equity_curve,
        metrics,
        total_costs,
        breaker_triggered: !breaker_years.is_empty(),
        breaker_years,
        goal_reached: goal_reached_on.is_some(),
        goal_reached_on,
    })
}

/// Mean daily range (percent) over each symbol's last `lookback` bars
/// strictly before `date`, pooled across the universe.
fn trailing_universe_range(
    series: &[SymbolSeries],
    date: NaiveDate,
    lookback: usize,
) -> Option<f64> {
    if lookback == 0 {
        return None;
    }
    let pooled: Vec<Bar> = series
        .iter()
        .flat_map(|s| {
            let end = s.bars.partition_point(|b| b.date() < date);
            let start = end.saturating_sub(lookback);
            s.bars[start..end].iter().cloned()
        })
        .collect();
    average_range_pct(&pooled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn d(i: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(i)
    }

    fn bar(date: NaiveDate, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: date.and_hms_opt(0, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 1000,
        }
    }

    fn config(symbols: &[&str]) -> DayTradingConfig {
        let mut c = DayTradingConfig::new(
            symbols.iter().map(|s| s.to_string()).collect(),
            d(0),
            d(400),
        );
        c.base_slippage_pct = 0.0;
        c
    }

    /// Alternating days: a quiet reference day, then a breakout day that
    /// hits +2% from the prior high.
    fn winning_series(symbol: &str, days: i64) -> SymbolSeries {
        let bars = (0..days)
            .map(|i| {
                if i % 2 == 0 {
                    bar(d(i), 100.0, 100.5, 99.5, 100.0)
                } else {
                    bar(d(i), 100.0, 103.0, 99.8, 102.5)
                }
            })
            .collect();
        SymbolSeries::new(symbol, bars)
    }

    fn losing_series(symbol: &str, days: i64) -> SymbolSeries {
        let bars = (0..days)
            .map(|i| {
                if i % 2 == 0 {
                    bar(d(i), 100.0, 100.5, 99.5, 100.0)
                } else {
                    bar(d(i), 100.0, 100.8, 98.0, 98.5)
                }
            })
            .collect();
        SymbolSeries::new(symbol, bars)
    }

    #[test]
    fn volatility_tiers() {
        assert_eq!(volatility_multiplier(1.5), 1.0);
        assert_eq!(volatility_multiplier(1.0), 1.0);
        assert_eq!(volatility_multiplier(2.0), 1.5);
        assert_eq!(volatility_multiplier(3.0), 2.5);
        assert_eq!(volatility_multiplier(4.5), 5.0);
        assert_eq!(volatility_multiplier(4.6), 10.0);
        assert_eq!(volatility_multiplier(f64::NAN), 1.0);
    }

    #[test]
    fn taper_is_linear_between_bounds() {
        let mut c = config(&["A"]);
        c.position_pct = 20.0;
        c.floor_position_pct = 5.0;
        c.taper_start_capital = Some(10_000.0);
        c.taper_end_capital = Some(20_000.0);
        assert_eq!(c.position_pct_for(5_000.0), 20.0);
        assert!((c.position_pct_for(15_000.0) - 12.5).abs() < 1e-10);
        assert_eq!(c.position_pct_for(25_000.0), 5.0);

        c.taper_start_capital = None;
        assert_eq!(c.position_pct_for(25_000.0), 20.0);
    }

    #[test]
    fn setup_filters() {
        let c = config(&["A"]);
        let prev = bar(d(0), 100.0, 100.5, 99.5, 100.0);

        let ok = bar(d(1), 100.0, 103.0, 99.8, 102.5);
        let s = find_setup("A", &ok, &prev, &c).unwrap();
        assert_eq!(s.entry_price, 100.5);

        let no_break = bar(d(1), 100.0, 100.4, 99.0, 100.0);
        assert!(find_setup("A", &no_break, &prev, &c).is_none());

        let gap = bar(d(1), 106.0, 108.0, 105.5, 107.0);
        assert!(find_setup("A", &gap, &prev, &c).is_none());

        let narrow = bar(d(1), 100.5, 100.7, 100.4, 100.6);
        assert!(find_setup("A", &narrow, &prev, &c).is_none());
    }

    #[test]
    fn both_touched_close_disambiguates() {
        let c = config(&["A"]);
        let entry = 100.0;
        let up_close = bar(d(1), 100.0, 103.0, 98.0, 101.0);
        assert_eq!(resolve_exit(&up_close, entry, &c), (102.0, ExitReason::TakeProfit));
        let down_close = bar(d(1), 100.0, 103.0, 98.0, 99.0);
        assert_eq!(resolve_exit(&down_close, entry, &c), (99.0, ExitReason::StopLoss));
        let neither = bar(d(1), 100.0, 101.0, 99.5, 100.7);
        assert_eq!(resolve_exit(&neither, entry, &c), (100.7, ExitReason::TimeStop));
    }

    #[test]
    fn top_setups_ranked_and_capped() {
        let mut c = config(&["A", "B", "C"]);
        c.max_setups_per_day = 2;
        c.end_date = d(1);
        let mk = |sym: &str, high: f64| {
            SymbolSeries::new(
                sym,
                vec![
                    bar(d(0), 100.0, 100.5, 99.5, 100.0),
                    bar(d(1), 100.0, high, 99.0, 100.2),
                ],
            )
        };
        let series = vec![mk("A", 101.0), mk("B", 104.0), mk("C", 102.0)];
        let result = run_day_trading(&series, &c).unwrap();
        let symbols: Vec<&str> = result.trades.iter().map(|t| t.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["B", "C"]);
    }

    #[test]
    fn goal_stops_all_entries() {
        let mut c = config(&["A"]);
        c.position_pct = 100.0;
        c.goal_capital = Some(10_300.0);
        let result = run_day_trading(&[winning_series("A", 40)], &c).unwrap();

        assert!(result.goal_reached);
        let reached = result.goal_reached_on.unwrap();
        assert!(result.trades.iter().all(|t| t.entry_timestamp.date() <= reached));
        assert!(result.trades.len() < 20);
        let last = result.equity_curve.last().unwrap().equity;
        assert!((last - result.final_capital).abs() < f64::EPSILON);
    }

    #[test]
    fn yearly_breaker_suppresses_until_next_year() {
        let mut c = config(&["A"]);
        c.position_pct = 100.0;
        c.yearly_drawdown_limit_pct = Some(2.5);
        c.end_date = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        let days = (NaiveDate::from_ymd_opt(2025, 1, 31).unwrap() - d(0)).num_days() + 1;
        let result = run_day_trading(&[losing_series("A", days)], &c).unwrap();

        assert!(result.breaker_triggered);
        assert_eq!(result.breaker_years, vec![2024, 2025]);
        let in_2024 = result
            .trades
            .iter()
            .filter(|t| t.entry_timestamp.date().year() == 2024)
            .count();
        assert!(in_2024 <= 3, "entries after breaker: {}", in_2024);
        assert!(
            result
                .trades
                .iter()
                .any(|t| t.entry_timestamp.date().year() == 2025)
        );
    }

    #[test]
    fn costs_accumulate() {
        let mut c = config(&["A"]);
        c.commission_per_round_trip = 2.0;
        c.base_slippage_pct = 0.1;
        c.end_date = d(9);
        let result = run_day_trading(&[winning_series("A", 10)], &c).unwrap();
        assert_eq!(result.trades.len(), 5);
        assert!(result.total_costs > 10.0);
        let pnl: f64 = result.trades.iter().map(|t| t.pnl).sum();
        assert!((result.final_capital - (c.initial_capital + pnl)).abs() < 1e-6);
    }

    #[test]
    fn empty_range_is_error() {
        let mut c = config(&["A"]);
        c.start_date = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        c.end_date = NaiveDate::from_ymd_opt(2030, 2, 1).unwrap();
        let err = run_day_trading(&[winning_series("A", 10)], &c).unwrap_err();
        assert!(matches!(err, EngineError::EmptyDateRange { .. }));
    }
}
