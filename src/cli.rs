//! CLI definition and dispatch.

use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::config_validation::{
    RULE_SECTION_PREFIX, parse_date, parse_symbol_list, rule_sections, validate_backtest_config,
    validate_day_trading_config, validate_monitor_config, validate_pattern_thresholds,
    validate_rules,
};
use crate::domain::day_trading::{DayTradingConfig, run_day_trading};
use crate::domain::error::EngineError;
use crate::domain::exit::RiskTargets;
use crate::domain::exit_monitor::MonitorConfig;
use crate::domain::indicator_cache::{DEFAULT_CACHE_TTL, IndicatorCache};
use crate::domain::pattern::{PatternKind, PatternThresholds};
use crate::domain::rule::{Directive, RsiFilter, Rule, RuleFilters, VolumeFilter};
use crate::domain::rule_backtest::{BacktestConfig, RegimeExit, run_rule_backtest};
use crate::domain::scanner::{Alert, ExecutionRequest, PatternScanner, ScannerConfig};
use crate::domain::symbol_series::SymbolSeries;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;

/// Bars handed to the scanner per symbol.
const SCAN_HISTORY_BARS: usize = 250;

#[derive(Parser, Debug)]
#[command(
    name = "patterntrader",
    about = "Candlestick pattern backtester and scanner"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a rule-based pattern backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run the opening-range-breakout day-trading simulation
    DayTrade {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Scan the latest bars of each rule symbol for patterns
    Scan {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List symbols available in the data directory
    ListSymbols {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Backtest {
            config,
            symbol,
            output,
        } => run_backtest(&config, symbol.as_deref(), output.as_deref()),
        Command::DayTrade { config, output } => run_day_trade(&config, output.as_deref()),
        Command::Scan { config, symbol } => run_scan(&config, symbol.as_deref()),
        Command::Validate { config } => run_validate(&config),
        Command::ListSymbols { config } => run_list_symbols(&config),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, EngineError> {
    FileConfigAdapter::from_file(path).map_err(|e| EngineError::ConfigParse {
        file: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// `data_dir` from `section`, falling back to `[backtest]`, then the
/// working directory.
pub fn data_dir(config: &dyn ConfigPort, section: &str) -> PathBuf {
    config
        .get_string(section, "data_dir")
        .or_else(|| config.get_string("backtest", "data_dir"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn run_backtest(
    config_path: &Path,
    symbol_override: Option<&str>,
    output_path: Option<&Path>,
) -> Result<(), EngineError> {
    info!(path = %config_path.display(), "loading config");
    let adapter = load_config(config_path)?;
    validate_backtest_config(&adapter)?;
    validate_rules(&adapter)?;

    let mut bt_config = build_backtest_config(&adapter)?;
    if let Some(symbol) = symbol_override {
        bt_config.symbol = symbol.to_uppercase();
    }
    let rules = build_rules(&adapter)?;
    info!(
        symbol = %bt_config.symbol,
        rules = rules.len(),
        start = %bt_config.start_date,
        end = %bt_config.end_date,
        "running backtest"
    );

    let data = CsvAdapter::new(data_dir(&adapter, "backtest"));
    let bars = data.fetch_bars(&bt_config.symbol, bt_config.start_date, bt_config.end_date)?;
    let result = run_rule_backtest(&bars, &rules, &bt_config)?;

    info!(
        trades = result.trades.len(),
        final_capital = result.final_capital,
        total_return = result.metrics.total_return,
        "backtest complete"
    );
    write_json(&result, output_path)
}

fn run_day_trade(config_path: &Path, output_path: Option<&Path>) -> Result<(), EngineError> {
    info!(path = %config_path.display(), "loading config");
    let adapter = load_config(config_path)?;
    validate_day_trading_config(&adapter)?;
    let dt_config = build_day_trading_config(&adapter)?;

    // Extra history ahead of the window feeds the volatility lookback.
    let history_days = dt_config.volatility_lookback_days as i64 * 2 + 10;
    let fetch_start = dt_config.start_date - ChronoDuration::days(history_days);

    let data = CsvAdapter::new(data_dir(&adapter, "day_trading"));
    let mut series = Vec::with_capacity(dt_config.symbols.len());
    for symbol in &dt_config.symbols {
        match data.fetch_bars(symbol, fetch_start, dt_config.end_date) {
            Ok(bars) if bars.is_empty() => warn!(symbol, "no bars in range, skipping"),
            Ok(bars) => series.push(SymbolSeries::new(symbol.clone(), bars)),
            Err(EngineError::UnknownSymbol { symbol }) => {
                warn!(%symbol, "no data file, skipping");
            }
            Err(e) => return Err(e),
        }
    }

    let result = run_day_trading(&series, &dt_config)?;
    info!(
        trades = result.trades.len(),
        final_capital = result.final_capital,
        breaker_triggered = result.breaker_triggered,
        goal_reached = result.goal_reached,
        "day-trading simulation complete"
    );
    write_json(&result, output_path)
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ScanLine<'a> {
    Alert(&'a Alert),
    Request(&'a ExecutionRequest),
}

fn run_scan(config_path: &Path, symbol_filter: Option<&str>) -> Result<(), EngineError> {
    let adapter = load_config(config_path)?;
    validate_rules(&adapter)?;
    validate_monitor_config(&adapter)?;
    validate_pattern_thresholds(&adapter)?;

    let rules = build_rules(&adapter)?;
    let symbols: BTreeSet<String> = rules
        .iter()
        .filter(|r| r.enabled)
        .map(|r| r.symbol.clone())
        .filter(|s| symbol_filter.is_none_or(|f| f.eq_ignore_ascii_case(s)))
        .collect();
    let capital = adapter.get_double("backtest", "initial_capital", 100_000.0);

    let scanner_config = ScannerConfig {
        pattern_window: adapter.get_int("backtest", "pattern_window", 20).max(1) as usize,
        thresholds: build_thresholds(&adapter),
    };
    let cache = IndicatorCache::new(build_cache_ttl(&adapter));
    let mut scanner = PatternScanner::new(rules, cache, scanner_config);
    let data = CsvAdapter::new(data_dir(&adapter, "backtest"));
    let now = Local::now().naive_local();

    for symbol in &symbols {
        let bars = data.fetch_bars(symbol, NaiveDate::MIN, NaiveDate::MAX)?;
        let recent = &bars[bars.len().saturating_sub(SCAN_HISTORY_BARS)..];
        let outcome = scanner.scan(symbol, recent, capital, now, Instant::now());
        for alert in &outcome.alerts {
            print_line(&ScanLine::Alert(alert))?;
        }
        for request in &outcome.requests {
            print_line(&ScanLine::Request(request))?;
        }
    }
    info!(
        symbols = symbols.len(),
        cache_hit_rate = scanner.cache().stats().hit_rate(),
        "scan complete"
    );
    Ok(())
}

fn run_validate(config_path: &Path) -> Result<(), EngineError> {
    let adapter = load_config(config_path)?;
    let sections = adapter.sections();
    let mut checked = 0;

    if sections.iter().any(|s| s == "backtest") {
        validate_backtest_config(&adapter)?;
        checked += 1;
    }
    if !rule_sections(&adapter).is_empty() {
        validate_rules(&adapter)?;
        build_rules(&adapter)?;
        checked += 1;
    }
    if sections.iter().any(|s| s == "day_trading") {
        validate_day_trading_config(&adapter)?;
        checked += 1;
    }
    if sections.iter().any(|s| s == "monitor") {
        validate_monitor_config(&adapter)?;
        checked += 1;
    }
    if sections.iter().any(|s| s == "patterns") {
        validate_pattern_thresholds(&adapter)?;
        checked += 1;
    }
    if checked == 0 {
        return Err(EngineError::missing("backtest", "symbol"));
    }
    info!(sections = checked, "configuration is valid");
    println!("configuration is valid");
    Ok(())
}

fn run_list_symbols(config_path: &Path) -> Result<(), EngineError> {
    let adapter = load_config(config_path)?;
    let data = CsvAdapter::new(data_dir(&adapter, "backtest"));
    let symbols = data.list_symbols()?;
    for symbol in &symbols {
        println!("{}", symbol);
    }
    info!(count = symbols.len(), "symbols listed");
    Ok(())
}

fn write_json<T: Serialize>(value: &T, output_path: Option<&Path>) -> Result<(), EngineError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| EngineError::Io(e.into()))?;
    match output_path {
        Some(path) => {
            fs::write(path, json)?;
            info!(path = %path.display(), "results written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn print_line<T: Serialize>(value: &T) -> Result<(), EngineError> {
    let line = serde_json::to_string(value).map_err(|e| EngineError::Io(e.into()))?;
    println!("{line}");
    Ok(())
}

pub fn build_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, EngineError> {
    const S: &str = "backtest";
    let symbol = config
        .get_string(S, "symbol")
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::missing(S, "symbol"))?;
    let start_date = parse_date(config, S, "start_date")?;
    let end_date = parse_date(config, S, "end_date")?;

    let mut bt = BacktestConfig::new(&symbol, start_date, end_date);
    bt.initial_capital = config.get_double(S, "initial_capital", bt.initial_capital);
    bt.commission_per_trade = config.get_double(S, "commission_per_trade", 0.0);
    bt.slippage_pct = config.get_double(S, "slippage_pct", 0.0);
    bt.apply_filters_in_backtest = config.get_bool(S, "apply_filters_in_backtest", false);
    bt.min_history_bars = usize_key(config, S, "min_history_bars", bt.min_history_bars);
    bt.pattern_window = usize_key(config, S, "pattern_window", bt.pattern_window);
    bt.risk_free_rate = config.get_double(S, "risk_free_rate", 0.0);
    if config.get_bool(S, "regime_exit", false) {
        bt.regime_exit = Some(RegimeExit {
            adx_period: usize_key(config, S, "regime_adx_period", 14),
            min_adx: config.get_double(S, "regime_min_adx", 20.0),
        });
    }
    bt.thresholds = build_thresholds(config);
    Ok(bt)
}

/// Pattern geometry with `[patterns]` overrides applied.
pub fn build_thresholds(config: &dyn ConfigPort) -> PatternThresholds {
    const S: &str = "patterns";
    let d = PatternThresholds::default();
    PatternThresholds {
        hammer_shadow_to_body: config.get_double(
            S,
            "hammer_shadow_to_body",
            d.hammer_shadow_to_body,
        ),
        hammer_opposite_shadow_to_body: config.get_double(
            S,
            "hammer_opposite_shadow_to_body",
            d.hammer_opposite_shadow_to_body,
        ),
        hammer_body_to_range: config.get_double(S, "hammer_body_to_range", d.hammer_body_to_range),
        doji_body_to_range: config.get_double(S, "doji_body_to_range", d.doji_body_to_range),
        gravestone_upper_to_range: config.get_double(
            S,
            "gravestone_upper_to_range",
            d.gravestone_upper_to_range,
        ),
        gravestone_lower_to_range: config.get_double(
            S,
            "gravestone_lower_to_range",
            d.gravestone_lower_to_range,
        ),
        engulfing_body_ratio: config.get_double(S, "engulfing_body_ratio", d.engulfing_body_ratio),
        star_outer_to_middle_body: config.get_double(
            S,
            "star_outer_to_middle_body",
            d.star_outer_to_middle_body,
        ),
        star_middle_body_to_range: config.get_double(
            S,
            "star_middle_body_to_range",
            d.star_middle_body_to_range,
        ),
        breakout_lookback: usize_key(config, S, "breakout_lookback", d.breakout_lookback),
        breakout_margin_pct: config.get_double(S, "breakout_margin_pct", d.breakout_margin_pct),
        breakout_move_pct: config.get_double(S, "breakout_move_pct", d.breakout_move_pct),
    }
}

/// One [`Rule`] per `[rule.<id>]` section.
pub fn build_rules(config: &dyn ConfigPort) -> Result<Vec<Rule>, EngineError> {
    rule_sections(config)
        .iter()
        .map(|section| build_rule(config, section))
        .collect()
}

pub fn build_rule(config: &dyn ConfigPort, section: &str) -> Result<Rule, EngineError> {
    let id = section.strip_prefix(RULE_SECTION_PREFIX).unwrap_or(section);
    let symbol = config
        .get_string(section, "symbol")
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::missing(section, "symbol"))?;
    let pattern: PatternKind = config
        .get_string(section, "pattern")
        .ok_or_else(|| EngineError::missing(section, "pattern"))?
        .parse()
        .map_err(|e: String| EngineError::invalid(section, "pattern", e))?;
    let directive: Directive = config
        .get_string(section, "directive")
        .ok_or_else(|| EngineError::missing(section, "directive"))?
        .parse()
        .map_err(|e: String| EngineError::invalid(section, "directive", e))?;

    let mut rule = Rule::new(id, &symbol, pattern, directive);
    rule.position_size_pct =
        config.get_double(section, "position_size_pct", rule.position_size_pct);
    rule.filters = RuleFilters {
        min_confidence: config.get_int(section, "min_confidence", 0).clamp(0, 100) as u8,
        rsi: config.has_key(section, "rsi_period").then(|| RsiFilter {
            period: usize_key(config, section, "rsi_period", 14),
            oversold: config.get_double(section, "rsi_oversold", 30.0),
            overbought: config.get_double(section, "rsi_overbought", 70.0),
        }),
        volume: config.has_key(section, "volume_period").then(|| VolumeFilter {
            period: usize_key(config, section, "volume_period", 20),
            min_ratio: config.get_double(section, "volume_min_ratio", 1.0),
        }),
    };
    rule.risk = RiskTargets {
        take_profit_pct: config.get_optional_double(section, "take_profit_pct"),
        stop_loss_pct: config.get_optional_double(section, "stop_loss_pct"),
        trailing_stop_pct: config.get_optional_double(section, "trailing_stop_pct"),
        max_holding: config
            .get_optional_double(section, "max_holding_hours")
            .map(|h| ChronoDuration::seconds((h * 3600.0).round() as i64)),
    };
    rule.cooldown = config
        .get_optional_double(section, "cooldown_minutes")
        .filter(|m| *m > 0.0)
        .map(|m| ChronoDuration::seconds((m * 60.0).round() as i64));
    rule.enabled = config.get_bool(section, "enabled", true);
    rule.auto_trade_enabled = config.get_bool(section, "auto_trade_enabled", false);
    Ok(rule)
}

pub fn build_day_trading_config(config: &dyn ConfigPort) -> Result<DayTradingConfig, EngineError> {
    const S: &str = "day_trading";
    let symbols = config
        .get_string(S, "symbols")
        .map(|s| parse_symbol_list(&s))
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::missing(S, "symbols"))?;
    let start_date = parse_date(config, S, "start_date")?;
    let end_date = parse_date(config, S, "end_date")?;

    let mut dt = DayTradingConfig::new(symbols, start_date, end_date);
    dt.initial_capital = config.get_double(S, "initial_capital", dt.initial_capital);
    dt.position_pct = config.get_double(S, "position_pct", dt.position_pct);
    dt.taper_start_capital = config.get_optional_double(S, "taper_start_capital");
    dt.taper_end_capital = config.get_optional_double(S, "taper_end_capital");
    dt.floor_position_pct = config.get_double(S, "floor_position_pct", dt.floor_position_pct);
    dt.goal_capital = config.get_optional_double(S, "goal_capital");
    dt.profit_target_pct = config.get_double(S, "profit_target_pct", dt.profit_target_pct);
    dt.stop_loss_pct = config.get_double(S, "stop_loss_pct", dt.stop_loss_pct);
    dt.max_gap_pct = config.get_double(S, "max_gap_pct", dt.max_gap_pct);
    dt.min_range_pct = config.get_double(S, "min_range_pct", dt.min_range_pct);
    dt.max_setups_per_day = usize_key(config, S, "max_setups_per_day", dt.max_setups_per_day);
    dt.commission_per_round_trip =
        config.get_double(S, "commission_per_round_trip", dt.commission_per_round_trip);
    dt.base_slippage_pct = config.get_double(S, "base_slippage_pct", dt.base_slippage_pct);
    dt.volatility_lookback_days =
        usize_key(config, S, "volatility_lookback_days", dt.volatility_lookback_days);
    dt.yearly_drawdown_limit_pct = config.get_optional_double(S, "yearly_drawdown_limit_pct");
    dt.risk_free_rate = config.get_double(S, "risk_free_rate", dt.risk_free_rate);
    Ok(dt)
}

pub fn build_monitor_config(config: &dyn ConfigPort) -> MonitorConfig {
    const S: &str = "monitor";
    let d = MonitorConfig::default();
    MonitorConfig {
        poll_interval: secs_key(config, S, "poll_interval_secs", d.poll_interval),
        symbol_delay: config
            .get_string(S, "symbol_delay_ms")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(d.symbol_delay, Duration::from_millis),
        request_timeout: secs_key(config, S, "request_timeout_secs", d.request_timeout),
    }
}

pub fn build_cache_ttl(config: &dyn ConfigPort) -> Duration {
    secs_key(config, "monitor", "cache_ttl_secs", DEFAULT_CACHE_TTL)
}

fn usize_key(config: &dyn ConfigPort, section: &str, key: &str, default: usize) -> usize {
    usize::try_from(config.get_int(section, key, default as i64)).unwrap_or(default)
}

fn secs_key(config: &dyn ConfigPort, section: &str, key: &str, default: Duration) -> Duration {
    config
        .get_string(section, key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}
