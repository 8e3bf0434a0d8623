//! Background exit monitor for live positions.
//!
//! A single tokio task polls the quote port on a fixed interval, evaluates
//! each registered position with [`evaluate_exit`] and submits closing
//! orders through the execution port. Registrations and removals are queued
//! and applied at the start of the next poll. Ticks that fall due while a
//! poll is still running are skipped, so at most one poll is ever in flight.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::error::EngineError;
use super::exit::{ExitDecision, ExitReason, PriceObservation, evaluate_exit};
use super::position::{Position, Trade};
use super::scanner::{ExecutionRequest, OrderKind};
use crate::ports::execution_port::ExecutionPort;
use crate::ports::quote_port::QuotePort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// Pause between symbols within one poll.
    pub symbol_delay: Duration,
    /// Upper bound on any single quote or execution call.
    pub request_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            poll_interval: Duration::from_secs(30),
            symbol_delay: Duration::from_millis(250),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredPosition {
    pub id: String,
    pub position: Position,
}

impl MonitoredPosition {
    pub fn new(position: Position) -> Self {
        let id = format!(
            "{}:{}:{}",
            position.rule_id,
            position.symbol,
            position.entry_timestamp.format("%Y%m%dT%H%M%S")
        );
        MonitoredPosition { id, position }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Polling,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    PositionClosed {
        position_id: String,
        trade: Trade,
    },
    ExecutionFailed {
        position_id: String,
        symbol: String,
        reason: String,
    },
    QuoteUnavailable {
        symbol: String,
        reason: String,
    },
}

#[derive(Debug)]
enum Command {
    Register(Box<MonitoredPosition>),
    Deregister(String),
}

/// Control surface for a running monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<watch::Sender<MonitorState>>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Queue a position for monitoring from the next poll on.
    pub fn register(&self, position: MonitoredPosition) -> Result<(), EngineError> {
        self.commands
            .send(Command::Register(Box::new(position)))
            .map_err(|_| stopped_error())
    }

    pub fn deregister(&self, id: &str) -> Result<(), EngineError> {
        self.commands
            .send(Command::Deregister(id.to_string()))
            .map_err(|_| stopped_error())
    }

    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    /// Request shutdown. Returns immediately; a poll already in flight runs
    /// to completion and no further polls start. Safe to call repeatedly.
    /// The state turns `Stopped` once the task has wound down.
    pub fn stop(&self) {
        if !self.stop.send_replace(true) {
            info!("exit monitor stopping");
        }
    }

    /// Stop and wait for the task to finish.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            error!(error = %e, "exit monitor task failed");
        }
    }
}

fn stopped_error() -> EngineError {
    EngineError::Execution {
        symbol: String::new(),
        reason: "exit monitor is stopped".to_string(),
    }
}

pub struct ExitMonitor {
    quotes: Arc<dyn QuotePort>,
    executor: Arc<dyn ExecutionPort>,
    config: MonitorConfig,
    positions: BTreeMap<String, MonitoredPosition>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<MonitorEvent>,
    state: Arc<watch::Sender<MonitorState>>,
}

impl ExitMonitor {
    /// Start the polling task. Must be called within a tokio runtime.
    pub fn spawn(
        quotes: Arc<dyn QuotePort>,
        executor: Arc<dyn ExecutionPort>,
        config: MonitorConfig,
    ) -> (MonitorHandle, mpsc::UnboundedReceiver<MonitorEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let state = Arc::new(watch::Sender::new(MonitorState::Idle));

        let monitor = ExitMonitor {
            quotes,
            executor,
            config,
            positions: BTreeMap::new(),
            commands: command_rx,
            events: event_tx,
            state: Arc::clone(&state),
        };
        let task = tokio::spawn(monitor.run(stop_rx));

        let handle = MonitorHandle {
            commands: command_tx,
            state,
            stop: stop_tx,
            task,
        };
        (handle, event_rx)
    }

    async fn run(mut self, mut stop: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_secs = self.config.poll_interval.as_secs_f64(),
            "exit monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
            }
            // A tick and a stop can be ready together.
            if *stop.borrow() {
                break;
            }

            self.state.send_replace(MonitorState::Polling);
            self.poll().await;
            if *stop.borrow() {
                break;
            }
            self.state.send_replace(MonitorState::Idle);
        }

        self.state.send_replace(MonitorState::Stopped);
        info!(open_positions = self.positions.len(), "exit monitor stopped");
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Register(monitored) => {
                    debug!(
                        id = %monitored.id,
                        symbol = %monitored.position.symbol,
                        "position registered"
                    );
                    self.positions.insert(monitored.id.clone(), *monitored);
                }
                Command::Deregister(id) => {
                    if self.positions.remove(&id).is_some() {
                        debug!(%id, "position deregistered");
                    }
                }
            }
        }
    }

    async fn poll(&mut self) {
        self.apply_commands();
        let symbols: BTreeSet<String> = self
            .positions
            .values()
            .map(|m| m.position.symbol.clone())
            .collect();

        for (n, symbol) in symbols.iter().enumerate() {
            if n > 0 && !self.config.symbol_delay.is_zero() {
                time::sleep(self.config.symbol_delay).await;
            }
            self.poll_symbol(symbol).await;
        }
    }

    async fn poll_symbol(&mut self, symbol: &str) {
        let quote = match time::timeout(
            self.config.request_timeout,
            self.quotes.latest_quote(symbol),
        )
        .await
        {
            Ok(Ok(quote)) if quote.price.is_finite() && quote.price > 0.0 => quote,
            Ok(Ok(quote)) => {
                self.quote_unavailable(symbol, format!("invalid price {}", quote.price));
                return;
            }
            Ok(Err(e)) => {
                self.quote_unavailable(symbol, e.to_string());
                return;
            }
            Err(_) => {
                self.quote_unavailable(symbol, "quote request timed out".to_string());
                return;
            }
        };

        let observation = PriceObservation::polled(quote.price, quote.at);
        let mut exits = Vec::new();
        for (id, monitored) in self
            .positions
            .iter_mut()
            .filter(|(_, m)| m.position.symbol == symbol)
        {
            if let ExitDecision::Close(reason) =
                evaluate_exit(&mut monitored.position, &observation)
            {
                exits.push((id.clone(), reason));
            }
        }

        for (id, reason) in exits {
            self.close_position(&id, quote.price, reason).await;
        }
    }

    async fn close_position(&mut self, id: &str, price: f64, reason: ExitReason) {
        let Some(monitored) = self.positions.get(id) else {
            return;
        };
        let position = &monitored.position;
        let request = ExecutionRequest {
            rule_id: position.rule_id.clone(),
            symbol: position.symbol.clone(),
            direction: position.direction,
            shares: position.shares,
            order_kind: OrderKind::Close,
            reference_price: price,
            exit_reason: Some(reason),
        };

        let failure = match time::timeout(
            self.config.request_timeout,
            self.executor.execute(&request),
        )
        .await
        {
            Ok(Ok(fill)) => {
                let trade = Trade::from_position(position, fill.price, fill.at, 0.0, reason);
                info!(
                    id,
                    symbol = %trade.symbol,
                    reason = %reason,
                    exit_price = fill.price,
                    pnl = trade.pnl,
                    "position closed"
                );
                self.positions.remove(id);
                self.emit(MonitorEvent::PositionClosed {
                    position_id: id.to_string(),
                    trade,
                });
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "execution request timed out".to_string(),
        };

        error!(id, symbol = %request.symbol, reason = %failure, "exit execution failed");
        self.emit(MonitorEvent::ExecutionFailed {
            position_id: id.to_string(),
            symbol: request.symbol,
            reason: failure,
        });
    }

    fn quote_unavailable(&self, symbol: &str, reason: String) {
        warn!(symbol, %reason, "quote unavailable");
        self.emit(MonitorEvent::QuoteUnavailable {
            symbol: symbol.to_string(),
            reason,
        });
    }

    fn emit(&self, event: MonitorEvent) {
        // The receiver may have been dropped; the monitor keeps running.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::exit::RiskTargets;
    use crate::domain::position::Direction;
    use crate::ports::execution_port::Fill;
    use crate::ports::quote_port::Quote;
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 3)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap()
    }

    struct FixedQuote {
        price: Mutex<f64>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QuotePort for FixedQuote {
        async fn latest_quote(&self, _symbol: &str) -> Result<Quote, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Quote {
                price: *self.price.lock().unwrap(),
                at: ts(),
            })
        }
    }

    struct Broker {
        fail: bool,
        requests: Mutex<Vec<ExecutionRequest>>,
    }

    #[async_trait]
    impl ExecutionPort for Broker {
        async fn execute(&self, request: &ExecutionRequest) -> Result<Fill, EngineError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(EngineError::Execution {
                    symbol: request.symbol.clone(),
                    reason: "rejected".into(),
                });
            }
            Ok(Fill {
                price: request.reference_price,
                shares: request.shares,
                at: ts(),
            })
        }
    }

    fn long_with_stop() -> MonitoredPosition {
        let targets = RiskTargets {
            stop_loss_pct: Some(2.0),
            ..RiskTargets::default()
        };
        MonitoredPosition::new(Position::new(
            "r1",
            "AAPL",
            Direction::Long,
            10,
            100.0,
            ts(),
            targets,
            0.0,
        ))
    }

    fn setup(price: f64, fail: bool) -> (Arc<FixedQuote>, Arc<Broker>) {
        (
            Arc::new(FixedQuote {
                price: Mutex::new(price),
                calls: AtomicUsize::new(0),
            }),
            Arc::new(Broker {
                fail,
                requests: Mutex::new(Vec::new()),
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn closes_on_stop_loss() {
        let (quotes, broker) = setup(97.5, false);
        let (handle, mut events) = ExitMonitor::spawn(
            quotes.clone(),
            broker.clone(),
            MonitorConfig::default(),
        );
        handle.register(long_with_stop()).unwrap();

        let event = events.recv().await.unwrap();
        match event {
            MonitorEvent::PositionClosed { trade, .. } => {
                assert_eq!(trade.exit_reason, ExitReason::StopLoss);
                assert_eq!(trade.exit_price, 97.5);
            }
            other => panic!("unexpected event {other:?}"),
        }
        let requests = broker.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].order_kind, OrderKind::Close);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn holds_inside_targets() {
        let (quotes, broker) = setup(99.0, false);
        let (handle, _events) =
            ExitMonitor::spawn(quotes.clone(), broker.clone(), MonitorConfig::default());
        handle.register(long_with_stop()).unwrap();

        time::sleep(Duration::from_secs(95)).await;
        assert!(quotes.calls.load(Ordering::SeqCst) >= 2);
        assert!(broker.requests.lock().unwrap().is_empty());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_execution_keeps_position() {
        let (quotes, broker) = setup(97.0, true);
        let (handle, mut events) =
            ExitMonitor::spawn(quotes.clone(), broker.clone(), MonitorConfig::default());
        handle.register(long_with_stop()).unwrap();

        for _ in 0..2 {
            let event = events.recv().await.unwrap();
            assert!(matches!(event, MonitorEvent::ExecutionFailed { .. }));
        }
        assert_eq!(broker.requests.lock().unwrap().len(), 2);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn deregistered_position_is_not_polled() {
        let (quotes, broker) = setup(97.0, false);
        let (handle, _events) =
            ExitMonitor::spawn(quotes.clone(), broker.clone(), MonitorConfig::default());
        let monitored = long_with_stop();
        let id = monitored.id.clone();
        handle.register(monitored).unwrap();
        handle.deregister(&id).unwrap();

        time::sleep(Duration::from_secs(65)).await;
        assert_eq!(quotes.calls.load(Ordering::SeqCst), 0);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let (quotes, broker) = setup(100.0, false);
        let (handle, _events) = ExitMonitor::spawn(quotes, broker, MonitorConfig::default());
        handle.stop();
        handle.stop();
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(handle.state(), MonitorState::Stopped);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_tick_never_polls() {
        let (quotes, broker) = setup(97.0, false);
        let (handle, mut events) =
            ExitMonitor::spawn(quotes.clone(), broker.clone(), MonitorConfig::default());
        handle.register(long_with_stop()).unwrap();
        handle.stop();

        assert!(events.recv().await.is_none());
        assert_eq!(quotes.calls.load(Ordering::SeqCst), 0);
        assert_eq!(handle.state(), MonitorState::Stopped);
        handle.shutdown().await;
    }
}
