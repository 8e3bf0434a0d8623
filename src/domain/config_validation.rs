//! Configuration validation.
//!
//! Validates every section a run reads before anything is simulated, so bad
//! input fails fast with the offending section and key.

use chrono::NaiveDate;

use crate::domain::error::EngineError;
use crate::domain::pattern::PatternKind;
use crate::domain::rule::Directive;
use crate::ports::config_port::ConfigPort;

pub const RULE_SECTION_PREFIX: &str = "rule.";

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), EngineError> {
    const S: &str = "backtest";
    require_string(config, S, "symbol")?;
    validate_date_range(config, S)?;
    positive(config, S, "initial_capital", 100_000.0)?;
    non_negative(config, S, "commission_per_trade", 0.0)?;
    percent(config, S, "slippage_pct", 0.0, false)?;
    validate_risk_free_rate(config, S)?;
    at_least(config, S, "min_history_bars", 10, 1)?;
    at_least(config, S, "pattern_window", 20, 1)?;
    if config.get_bool(S, "regime_exit", false) {
        at_least(config, S, "regime_adx_period", 14, 1)?;
        percent(config, S, "regime_min_adx", 20.0, true)?;
    }
    validate_pattern_thresholds(config)
}

/// Every `[rule.<id>]` section. At least one rule must be defined.
pub fn validate_rules(config: &dyn ConfigPort) -> Result<(), EngineError> {
    let sections = rule_sections(config);
    if sections.is_empty() {
        return Err(EngineError::missing("rule.<id>", "pattern"));
    }
    for section in &sections {
        validate_rule(config, section)?;
    }
    Ok(())
}

fn validate_rule(config: &dyn ConfigPort, s: &str) -> Result<(), EngineError> {
    require_string(config, s, "symbol")?;

    let pattern = require_string(config, s, "pattern")?;
    pattern
        .parse::<PatternKind>()
        .map_err(|e| EngineError::invalid(s, "pattern", e))?;
    let directive = require_string(config, s, "directive")?;
    directive
        .parse::<Directive>()
        .map_err(|e| EngineError::invalid(s, "directive", e))?;

    let size = config.get_double(s, "position_size_pct", 10.0);
    if !(size > 0.0 && size <= 100.0) {
        return Err(EngineError::invalid(
            s,
            "position_size_pct",
            "position_size_pct must be in (0, 100]",
        ));
    }

    let confidence = config.get_int(s, "min_confidence", 0);
    if !(0..=100).contains(&confidence) {
        return Err(EngineError::invalid(
            s,
            "min_confidence",
            "min_confidence must be between 0 and 100",
        ));
    }

    if config.has_key(s, "rsi_period") {
        at_least(config, s, "rsi_period", 14, 1)?;
        let oversold = percent(config, s, "rsi_oversold", 30.0, true)?;
        let overbought = percent(config, s, "rsi_overbought", 70.0, true)?;
        if oversold >= overbought {
            return Err(EngineError::invalid(
                s,
                "rsi_oversold",
                "rsi_oversold must be below rsi_overbought",
            ));
        }
    }
    if config.has_key(s, "volume_period") {
        at_least(config, s, "volume_period", 20, 1)?;
        non_negative(config, s, "volume_min_ratio", 1.0)?;
    }

    for key in ["take_profit_pct", "stop_loss_pct", "trailing_stop_pct"] {
        optional_positive(config, s, key)?;
    }
    if let Some(sl) = config.get_optional_double(s, "stop_loss_pct")
        && sl >= 100.0
    {
        return Err(EngineError::invalid(s, "stop_loss_pct", "stop_loss_pct must be below 100"));
    }
    if let Some(ts) = config.get_optional_double(s, "trailing_stop_pct")
        && ts >= 100.0
    {
        return Err(EngineError::invalid(
            s,
            "trailing_stop_pct",
            "trailing_stop_pct must be below 100",
        ));
    }
    optional_positive(config, s, "max_holding_hours")?;
    non_negative(config, s, "cooldown_minutes", 0.0)?;
    Ok(())
}

pub fn validate_day_trading_config(config: &dyn ConfigPort) -> Result<(), EngineError> {
    const S: &str = "day_trading";
    let symbols = require_string(config, S, "symbols")?;
    if parse_symbol_list(&symbols).is_empty() {
        return Err(EngineError::invalid(S, "symbols", "no symbols listed"));
    }
    validate_date_range(config, S)?;
    let capital = positive(config, S, "initial_capital", 10_000.0)?;
    let position = percent(config, S, "position_pct", 20.0, true)?;
    if position <= 0.0 {
        return Err(EngineError::invalid(S, "position_pct", "position_pct must be positive"));
    }
    let floor = percent(config, S, "floor_position_pct", 5.0, true)?;
    if floor > position {
        return Err(EngineError::invalid(
            S,
            "floor_position_pct",
            "floor_position_pct must not exceed position_pct",
        ));
    }

    let taper_start = optional_positive(config, S, "taper_start_capital")?;
    let taper_end = optional_positive(config, S, "taper_end_capital")?;
    match (taper_start, taper_end) {
        (Some(start), Some(end)) if start >= end => {
            return Err(EngineError::invalid(
                S,
                "taper_start_capital",
                "taper_start_capital must be below taper_end_capital",
            ));
        }
        (Some(_), None) => return Err(EngineError::missing(S, "taper_end_capital")),
        (None, Some(_)) => return Err(EngineError::missing(S, "taper_start_capital")),
        _ => {}
    }
    if let Some(goal) = optional_positive(config, S, "goal_capital")?
        && goal <= capital
    {
        return Err(EngineError::invalid(
            S,
            "goal_capital",
            "goal_capital must exceed initial_capital",
        ));
    }

    positive(config, S, "profit_target_pct", 2.0)?;
    let stop = positive(config, S, "stop_loss_pct", 1.0)?;
    if stop >= 100.0 {
        return Err(EngineError::invalid(S, "stop_loss_pct", "stop_loss_pct must be below 100"));
    }
    non_negative(config, S, "max_gap_pct", 5.0)?;
    non_negative(config, S, "min_range_pct", 0.5)?;
    at_least(config, S, "max_setups_per_day", 5, 1)?;
    non_negative(config, S, "commission_per_round_trip", 0.0)?;
    percent(config, S, "base_slippage_pct", 0.05, false)?;
    at_least(config, S, "volatility_lookback_days", 20, 1)?;
    if let Some(limit) = optional_positive(config, S, "yearly_drawdown_limit_pct")?
        && limit > 100.0
    {
        return Err(EngineError::invalid(
            S,
            "yearly_drawdown_limit_pct",
            "yearly_drawdown_limit_pct must not exceed 100",
        ));
    }
    validate_risk_free_rate(config, S)
}

pub fn validate_monitor_config(config: &dyn ConfigPort) -> Result<(), EngineError> {
    const S: &str = "monitor";
    at_least(config, S, "poll_interval_secs", 30, 1)?;
    at_least(config, S, "symbol_delay_ms", 250, 0)?;
    at_least(config, S, "request_timeout_secs", 10, 1)?;
    at_least(config, S, "cache_ttl_secs", 60, 0)?;
    Ok(())
}

/// Overrides in `[patterns]`. Every ratio must be positive.
pub fn validate_pattern_thresholds(config: &dyn ConfigPort) -> Result<(), EngineError> {
    const S: &str = "patterns";
    for key in [
        "hammer_shadow_to_body",
        "hammer_opposite_shadow_to_body",
        "hammer_body_to_range",
        "doji_body_to_range",
        "gravestone_upper_to_range",
        "gravestone_lower_to_range",
        "engulfing_body_ratio",
        "star_outer_to_middle_body",
        "star_middle_body_to_range",
        "breakout_margin_pct",
        "breakout_move_pct",
    ] {
        optional_positive(config, S, key)?;
    }
    if config.has_key(S, "breakout_lookback") {
        at_least(config, S, "breakout_lookback", 5, 1)?;
    }
    Ok(())
}

/// Section names of the form `rule.<id>`, in file order.
pub fn rule_sections(config: &dyn ConfigPort) -> Vec<String> {
    config
        .sections()
        .into_iter()
        .filter(|s| s.starts_with(RULE_SECTION_PREFIX) && s.len() > RULE_SECTION_PREFIX.len())
        .collect()
}

pub fn parse_symbol_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn parse_date(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<NaiveDate, EngineError> {
    let value = require_string(config, section, key)?;
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        EngineError::invalid(section, key, format!("invalid {key} format, expected YYYY-MM-DD"))
    })
}

fn validate_date_range(config: &dyn ConfigPort, section: &str) -> Result<(), EngineError> {
    let start = parse_date(config, section, "start_date")?;
    let end = parse_date(config, section, "end_date")?;
    if start > end {
        return Err(EngineError::invalid(
            section,
            "start_date",
            "start_date must not be after end_date",
        ));
    }
    Ok(())
}

fn validate_risk_free_rate(config: &dyn ConfigPort, section: &str) -> Result<(), EngineError> {
    let value = config.get_double(section, "risk_free_rate", 0.0);
    if !(0.0..1.0).contains(&value) {
        return Err(EngineError::invalid(
            section,
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }
    Ok(())
}

fn require_string(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<String, EngineError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(EngineError::missing(section, key)),
    }
}

/// Reads a number, rejecting values that are present but unparseable.
fn number(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, EngineError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| EngineError::invalid(section, key, format!("{key} is not a number"))),
    }
}

fn positive(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, EngineError> {
    let value = number(config, section, key, default)?;
    if value <= 0.0 {
        return Err(EngineError::invalid(section, key, format!("{key} must be positive")));
    }
    Ok(value)
}

fn non_negative(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, EngineError> {
    let value = number(config, section, key, default)?;
    if value < 0.0 {
        return Err(EngineError::invalid(section, key, format!("{key} must be non-negative")));
    }
    Ok(value)
}

fn optional_positive(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<f64>, EngineError> {
    if !config.has_key(section, key) {
        return Ok(None);
    }
    positive(config, section, key, 0.0).map(Some)
}

/// A percentage in `[0, 100]`, or `[0, 100)` when `inclusive` is false.
fn percent(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
    inclusive: bool,
) -> Result<f64, EngineError> {
    let value = number(config, section, key, default)?;
    let in_range = value >= 0.0 && if inclusive { value <= 100.0 } else { value < 100.0 };
    if !in_range {
        return Err(EngineError::invalid(
            section,
            key,
            format!("{key} must be a percentage between 0 and 100"),
        ));
    }
    Ok(value)
}

fn at_least(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
    minimum: i64,
) -> Result<i64, EngineError> {
    let value = match config.get_string(section, key) {
        None => default,
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| EngineError::invalid(section, key, format!("{key} is not an integer")))?,
    };
    if value < minimum {
        return Err(EngineError::invalid(
            section,
            key,
            format!("{key} must be at least {minimum}"),
        ));
    }
    Ok(value)
}
