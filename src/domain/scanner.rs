//! Live pattern scanner.
//!
//! Classifies the latest bar of a symbol against the rule set with every
//! filter applied (confidence, RSI, volume, cooldown), emitting alerts for
//! all matches and execution requests for rules allowed to auto-trade.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

use super::exit::ExitReason;
use super::exit_monitor::MonitoredPosition;
use super::indicator::macd::{DEFAULT_FAST, DEFAULT_SIGNAL, DEFAULT_SLOW};
use super::indicator::{IndicatorType, IndicatorValue, calculate_macd, calculate_rsi};
use super::indicator_cache::IndicatorCache;
use super::execution::shares_for;
use super::ohlcv::Bar;
use super::pattern::{PatternKind, PatternThresholds, Signal, detect_at};
use super::position::{Direction, Position};
use super::rule::{FilterInputs, FilterRejection, Rule, SignalAction};
use crate::ports::execution_port::Fill;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub symbol: String,
    pub pattern: PatternKind,
    pub signal: Signal,
    pub confidence: u8,
    pub timestamp: NaiveDateTime,
    pub macd_histogram: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// Open a new position of `shares`.
    Open,
    /// Close exactly `shares` of a tracked position.
    Close,
    /// Close whatever the book holds in `direction` for the symbol.
    CloseAll,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRequest {
    pub rule_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub shares: i64,
    pub order_kind: OrderKind,
    pub reference_price: f64,
    pub exit_reason: Option<ExitReason>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScannerConfig {
    pub pattern_window: usize,
    pub thresholds: PatternThresholds,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            pattern_window: 20,
            thresholds: PatternThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOutcome {
    pub alerts: Vec<Alert>,
    pub requests: Vec<ExecutionRequest>,
    pub rejections: Vec<(String, FilterRejection)>,
}

#[derive(Debug)]
pub struct PatternScanner {
    rules: Vec<Rule>,
    cache: IndicatorCache,
    config: ScannerConfig,
}

impl PatternScanner {
    pub fn new(rules: Vec<Rule>, cache: IndicatorCache, config: ScannerConfig) -> Self {
        PatternScanner {
            rules,
            cache,
            config,
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn cache(&self) -> &IndicatorCache {
        &self.cache
    }

    /// Evaluate the latest bar of `bars`. `now` is the wall-clock time used
    /// for cooldowns and `clock` drives the indicator cache TTL.
    pub fn scan(
        &mut self,
        symbol: &str,
        bars: &[Bar],
        capital: f64,
        now: NaiveDateTime,
        clock: Instant,
    ) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        let Some(last) = bars.last() else {
            return outcome;
        };
        let index = bars.len() - 1;
        let matches = detect_at(
            bars,
            index,
            self.config.pattern_window,
            &self.config.thresholds,
        );
        if matches.is_empty() {
            return outcome;
        }

        let as_of = Some(last.timestamp);
        let macd_type = IndicatorType::Macd {
            fast: DEFAULT_FAST,
            slow: DEFAULT_SLOW,
            signal: DEFAULT_SIGNAL,
        };
        let macd_histogram = match self
            .cache
            .get_or_compute(symbol, macd_type, as_of, clock, || {
                calculate_macd(bars, DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL)
            })
            .latest()
        {
            Some(IndicatorValue::Macd { histogram, .. }) => Some(histogram),
            _ => None,
        };

        for m in &matches {
            info!(
                symbol,
                pattern = %m.kind,
                signal = ?m.signal,
                confidence = m.confidence,
                at = %last.timestamp,
                "pattern detected"
            );
            outcome.alerts.push(Alert {
                symbol: symbol.to_string(),
                pattern: m.kind,
                signal: m.signal,
                confidence: m.confidence,
                timestamp: last.timestamp,
                macd_histogram,
            });

            for rule in self.rules.iter().filter(|r| r.triggers_on(symbol, m.kind)) {
                let rsi = rule.filters.rsi.and_then(|f| {
                    self.cache
                        .get_or_compute(symbol, IndicatorType::Rsi(f.period), as_of, clock, || {
                            calculate_rsi(bars, f.period)
                        })
                        .simple_at(index)
                });
                let inputs = FilterInputs {
                    confidence: m.confidence,
                    rsi,
                    volume_ratio: rule.filters.volume.and_then(|f| f.ratio(bars, index)),
                };

                let verdict = if rule.in_cooldown(now) {
                    Err(FilterRejection::Cooldown)
                } else {
                    rule.filters.evaluate(rule.action(), &inputs, true)
                };
                if let Err(rejection) = verdict {
                    debug!(rule = %rule.id, %rejection, "rule filtered");
                    outcome.rejections.push((rule.id.clone(), rejection));
                    continue;
                }

                if !rule.auto_trade_enabled {
                    continue;
                }
                if let Some(request) = request_for(rule, last.close, capital) {
                    info!(
                        rule = %rule.id,
                        symbol,
                        direction = %request.direction,
                        shares = request.shares,
                        "execution requested"
                    );
                    outcome.requests.push(request);
                }
            }
        }

        outcome
    }

    /// Mark `rule_id` as executed at `at`, starting its cooldown.
    pub fn record_fill(&mut self, rule_id: &str, at: NaiveDateTime) {
        if let Some(rule) = self.rules.iter_mut().find(|r| r.id == rule_id) {
            rule.last_executed_at = Some(at);
        }
    }

    /// Record a confirmed fill. Opening fills for rules with risk targets
    /// yield a position for the exit monitor.
    pub fn on_fill(
        &mut self,
        request: &ExecutionRequest,
        fill: &Fill,
    ) -> Option<MonitoredPosition> {
        self.record_fill(&request.rule_id, fill.at);
        if request.order_kind != OrderKind::Open {
            return None;
        }
        let rule = self.rule(&request.rule_id)?;
        if !rule.has_risk_targets() {
            return None;
        }
        Some(MonitoredPosition::new(Position::new(
            &rule.id,
            &request.symbol,
            request.direction,
            fill.shares,
            fill.price,
            fill.at,
            rule.risk,
            0.0,
        )))
    }
}

fn request_for(rule: &Rule, price: f64, capital: f64) -> Option<ExecutionRequest> {
    let (direction, shares, order_kind) = match rule.action() {
        SignalAction::Open(direction) => {
            let shares = shares_for(capital, rule.position_size_pct, price);
            if shares == 0 {
                debug!(rule = %rule.id, price, capital, "position size rounds to zero");
                return None;
            }
            (direction, shares, OrderKind::Open)
        }
        SignalAction::Close(direction) => (direction, 0, OrderKind::CloseAll),
    };
    Some(ExecutionRequest {
        rule_id: rule.id.clone(),
        symbol: rule.symbol.clone(),
        direction,
        shares,
        order_kind,
        reference_price: price,
        exit_reason: matches!(order_kind, OrderKind::CloseAll).then_some(ExitReason::Signal),
    })
}
