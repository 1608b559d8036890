//! Single owner of cross-symbol state
//!
//! The coordinator task holds the `RiskManager`, the lifetime signal counters
//! and the write side of the performance book. Symbol tasks reach it only
//! through [`CoordinatorRequest`]s; operator commands arrive on a separate
//! control channel that is always drained first, so a panic takes effect
//! before any gate request already queued behind it.

use crate::candle::Candle;
use crate::error::EngineError;
use crate::messages::{DashboardMessage, LogLevel};
use crate::performance::PerformanceBook;
use crate::risk::{CloseOutcome, DailyStats, ExitReason, RiskManager};
use crate::scoring::ScoredSignal;
use crate::signals::{SignalStats, TradingSignal};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    /// Emergency stop: mark all positions for closure and pause
    Panic,
    /// Clear a pause, keeping the day's accounting
    Resume,
    /// Clear any pause and re-baseline the day at current equity
    Reset,
}

/// Result of a control command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlOutcome {
    pub command: ControlCommand,
    /// False when the command was a no-op for the state machine
    pub applied: bool,
    pub message: String,
    pub stats: DailyStats,
}

#[derive(Debug)]
pub struct ControlRequest {
    pub command: ControlCommand,
    pub reply: Option<oneshot::Sender<ControlOutcome>>,
}

/// Fill and closure reports from the execution collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionReport {
    Opened {
        signal_id: u64,
        #[serde(default)]
        fill_price: Option<Decimal>,
        #[serde(default)]
        size: Option<Decimal>,
    },
    Closed {
        symbol: String,
        exit_price: Decimal,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// The collaborator will not act on the signal
    Declined {
        signal_id: u64,
        #[serde(default)]
        reason: Option<String>,
    },
}

#[derive(Debug)]
pub enum CoordinatorRequest {
    /// Every processed candle, with the candidate that cleared scoring and
    /// quality if there was one
    Candle {
        candle: Candle,
        approved: Option<ScoredSignal>,
        reply: oneshot::Sender<Option<TradingSignal>>,
    },
    Execution(ExecutionReport),
    Stats {
        reply: oneshot::Sender<DailyStats>,
    },
}

pub struct Coordinator {
    risk: RiskManager,
    performance: Arc<RwLock<PerformanceBook>>,
    signal_stats: SignalStats,
    output: mpsc::UnboundedSender<DashboardMessage>,
}

impl Coordinator {
    pub fn new(
        risk: RiskManager,
        performance: Arc<RwLock<PerformanceBook>>,
        output: mpsc::UnboundedSender<DashboardMessage>,
    ) -> Self {
        Self {
            risk,
            performance,
            signal_stats: SignalStats::default(),
            output,
        }
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn signal_stats(&self) -> &SignalStats {
        &self.signal_stats
    }

    fn push(&self, message: DashboardMessage) {
        if self.output.send(message).is_err() {
            debug!("Dashboard output closed, dropping message");
        }
    }

    fn log(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => info!("{}", message),
            LogLevel::Warn => warn!("{}", message),
        }
        self.push(DashboardMessage::log(level, message));
    }

    fn publish_stats(&self) {
        self.push(DashboardMessage::stats(self.risk.stats()));
    }

    fn account_close(&self, outcome: CloseOutcome) {
        let trade = &outcome.trade;
        self.performance.write().record(&trade.symbol, trade.pnl);
        self.log(
            LogLevel::Info,
            format!(
                "Closed {} {} at {} ({:?}), pnl {}",
                trade.direction, trade.symbol, trade.exit, trade.reason, trade.pnl
            ),
        );
        if outcome.breaker_tripped {
            self.log(
                LogLevel::Warn,
                format!(
                    "Daily drawdown {} reached the limit, trading paused",
                    self.risk.drawdown()
                ),
            );
        }
        self.publish_stats();
    }

    /// Rollover, exit checks, then the risk gate for an approved candidate.
    pub fn handle_candle(
        &mut self,
        candle: &Candle,
        approved: Option<ScoredSignal>,
    ) -> Option<TradingSignal> {
        if let Some(day) = candle.trading_day() {
            let was_paused = self.risk.is_paused();
            if self.risk.roll_day(day) {
                self.log(LogLevel::Info, format!("Trading day rolled over to {}", day));
                if was_paused && !self.risk.is_paused() {
                    self.log(
                        LogLevel::Info,
                        "Drawdown pause lifted by day rollover".to_string(),
                    );
                }
                self.publish_stats();
            }
        }

        let expired = self.risk.expire_pending(candle.timestamp);
        if !expired.is_empty() {
            let ids: Vec<String> = expired
                .iter()
                .map(|s| format!("{} {}", s.signal_id, s.symbol))
                .collect();
            self.log(
                LogLevel::Warn,
                format!("No fill report, released signals: {}", ids.join(", ")),
            );
            self.publish_stats();
        }

        if let Some(outcome) = self.risk.check_exits(candle) {
            self.account_close(outcome);
        }

        let scored = approved?;
        let candidate = &scored.candidate;
        match self
            .risk
            .gate(&scored, candidate.regime.regime, candidate.reason())
        {
            Ok(signal) => {
                self.signal_stats.record_signal(&signal);
                info!(
                    signal_id = signal.signal_id,
                    symbol = %signal.symbol,
                    side = %signal.signal_type,
                    confidence = signal.confidence,
                    entry = %signal.entry,
                    sl = %signal.stop_loss,
                    tp = %signal.take_profit,
                    "Signal emitted"
                );
                self.push(DashboardMessage::signal(&signal));
                self.publish_stats();
                Some(signal)
            }
            Err(rejection) => {
                self.log(
                    LogLevel::Warn,
                    format!(
                        "Suppressed {} {} (confidence {}): {}",
                        candidate.direction, candidate.symbol, scored.total, rejection
                    ),
                );
                None
            }
        }
    }

    pub fn handle_execution(&mut self, report: ExecutionReport) {
        match report {
            ExecutionReport::Opened {
                signal_id,
                fill_price,
                size,
            } => match self.risk.open_position(signal_id, fill_price, size) {
                Ok(position) => {
                    let message = format!(
                        "Opened {} {} at {} (signal {})",
                        position.direction, position.symbol, position.entry, signal_id
                    );
                    self.log(LogLevel::Info, message);
                    self.publish_stats();
                }
                Err(e) => self.log(LogLevel::Warn, e.to_string()),
            },
            ExecutionReport::Closed {
                symbol,
                exit_price,
                timestamp,
            } => {
                let closed_at = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
                match self
                    .risk
                    .close_position(&symbol, exit_price, ExitReason::External, closed_at)
                {
                    Some(outcome) => self.account_close(outcome),
                    None => self.log(
                        LogLevel::Warn,
                        EngineError::StateConflict {
                            message: format!("close report for {} with no open position", symbol),
                        }
                        .to_string(),
                    ),
                }
            }
            ExecutionReport::Declined { signal_id, reason } => {
                match self.risk.decline(signal_id) {
                    Some(signal) => {
                        self.log(
                            LogLevel::Info,
                            format!(
                                "Signal {} for {} declined: {}",
                                signal_id,
                                signal.symbol,
                                reason.as_deref().unwrap_or("no reason given")
                            ),
                        );
                        self.publish_stats();
                    }
                    None => self.log(
                        LogLevel::Warn,
                        EngineError::StateConflict {
                            message: format!("decline for unknown signal {}", signal_id),
                        }
                        .to_string(),
                    ),
                }
            }
        }
    }

    pub fn handle_control(&mut self, command: ControlCommand) -> ControlOutcome {
        let (applied, message) = match command {
            ControlCommand::Panic => {
                let outcome = self.risk.panic();
                let marked = if outcome.marked.is_empty() {
                    "no open positions to close".to_string()
                } else {
                    format!("marked for closure: {}", outcome.marked.join(", "))
                };
                match outcome.already_paused {
                    Some(reason) => {
                        let conflict = EngineError::StateConflict {
                            message: format!("panic while already paused ({})", reason),
                        };
                        (false, format!("{}; {}", conflict, marked))
                    }
                    None => (true, format!("PANIC: trading paused; {}", marked)),
                }
            }
            ControlCommand::Resume => match self.risk.resume() {
                Ok(reason) => (true, format!("Trading resumed (was paused: {})", reason)),
                Err(e) => (false, e.to_string()),
            },
            ControlCommand::Reset => {
                let unfilled = self.risk.awaiting_fill();
                let previous = self.risk.reset();
                let mut message = match previous {
                    Some(reason) => format!("Risk state reset (was paused: {})", reason),
                    None => "Risk state reset".to_string(),
                };
                if unfilled > 0 {
                    message.push_str(&format!("; {} unfilled signals dropped", unfilled));
                }
                (true, message)
            }
        };

        let level = if applied { LogLevel::Warn } else { LogLevel::Info };
        self.log(level, message.clone());
        let stats = self.risk.stats();
        self.publish_stats();

        ControlOutcome {
            command,
            applied,
            message,
            stats,
        }
    }

    /// Serve requests until both channels close. Control is polled first.
    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<CoordinatorRequest>,
        mut control: mpsc::UnboundedReceiver<ControlRequest>,
    ) {
        info!("Coordinator started");
        let mut control_open = true;

        loop {
            tokio::select! {
                biased;

                request = control.recv(), if control_open => match request {
                    Some(ControlRequest { command, reply }) => {
                        let outcome = self.handle_control(command);
                        if let Some(reply) = reply {
                            let _ = reply.send(outcome);
                        }
                    }
                    None => control_open = false,
                },

                request = requests.recv() => match request {
                    Some(CoordinatorRequest::Candle { candle, approved, reply }) => {
                        let signal = self.handle_candle(&candle, approved);
                        let _ = reply.send(signal);
                    }
                    Some(CoordinatorRequest::Execution(report)) => self.handle_execution(report),
                    Some(CoordinatorRequest::Stats { reply }) => {
                        let _ = reply.send(self.risk.stats());
                    }
                    None => break,
                },
            }
        }

        info!(
            "Coordinator stopped after {} signals",
            self.signal_stats.total_signals
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::messages::MessageBody;
    use crate::risk::tests::scored;
    use crate::signals::SignalType;
    use rust_decimal_macros::dec;

    fn coordinator() -> (Coordinator, mpsc::UnboundedReceiver<DashboardMessage>) {
        coordinator_with(RiskConfig::default())
    }

    fn live_coordinator() -> (Coordinator, mpsc::UnboundedReceiver<DashboardMessage>) {
        coordinator_with(RiskConfig {
            paper_trading: false,
            ..RiskConfig::default()
        })
    }

    fn coordinator_with(
        config: RiskConfig,
    ) -> (Coordinator, mpsc::UnboundedReceiver<DashboardMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(
            RiskManager::new(config),
            Arc::new(RwLock::new(PerformanceBook::new(20))),
            tx,
        );
        (coordinator, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DashboardMessage>) -> Vec<DashboardMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn candle(symbol: &str, timestamp: i64, low: Decimal, high: Decimal) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timestamp,
            open: low,
            high,
            low,
            close: low,
            volume: dec!(10),
        }
    }

    /// Candidate produced by the candle at `timestamp`
    fn buy_at(symbol: &str, timestamp: i64) -> ScoredSignal {
        let mut candidate = scored(symbol, SignalType::Buy, 75);
        candidate.candidate.snapshot.timestamp = timestamp;
        candidate
    }

    const DAY_ONE: i64 = 1_700_006_400_000;
    const DAY_MS: i64 = 86_400_000;

    #[test]
    fn test_emits_signal_and_stats() {
        let (mut coord, mut rx) = coordinator();
        let c = candle("BTCUSDT", DAY_ONE, dec!(100), dec!(100));
        let signal = coord
            .handle_candle(&c, Some(scored("BTCUSDT", SignalType::Buy, 75)))
            .unwrap();

        // 10000 * 2% * 0.75 = 150 risked over a 3.0 stop
        assert_eq!(signal.size, dec!(50));
        assert_eq!(signal.stop_loss, dec!(97));
        assert_eq!(signal.take_profit, dec!(106));

        let kinds: Vec<&str> = drain(&mut rx).iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec!["SIGNAL", "STATS"]);
        assert_eq!(coord.signal_stats().total_signals, 1);
    }

    #[test]
    fn test_drawdown_cap_pauses_and_suppresses() {
        let (mut coord, mut rx) = coordinator();
        let c = candle("BTCUSDT", DAY_ONE, dec!(100), dec!(100));
        coord
            .handle_candle(&c, Some(scored("BTCUSDT", SignalType::Buy, 75)))
            .unwrap();
        drain(&mut rx);

        // 50 units from 100 to 80 loses exactly 10% of 10000
        coord.handle_execution(ExecutionReport::Closed {
            symbol: "BTCUSDT".to_string(),
            exit_price: dec!(80),
            timestamp: Some(DAY_ONE + 60_000),
        });
        assert!(coord.risk().is_paused());
        assert_eq!(coord.risk().drawdown(), dec!(0.1));

        let on_trip = drain(&mut rx);
        let stats = on_trip.iter().rev().find_map(|m| m.as_stats()).unwrap();
        assert!(stats.is_paused);
        assert!(on_trip
            .iter()
            .filter_map(|m| m.as_log())
            .any(|log| log.message.contains("trading paused")));

        let c = candle("ETHUSDT", DAY_ONE + 120_000, dec!(100), dec!(100));
        let emitted = coord.handle_candle(&c, Some(scored("ETHUSDT", SignalType::Buy, 95)));
        assert!(emitted.is_none());

        let after = drain(&mut rx);
        assert!(after.iter().all(|m| m.as_signal().is_none()));
        assert_eq!(after.len(), 1);
        assert!(after[0].as_log().unwrap().message.contains("Suppressed"));
    }

    #[test]
    fn test_panic_blocks_full_confidence_candidate() {
        let (mut coord, mut rx) = coordinator();
        let c = candle("BTCUSDT", DAY_ONE, dec!(100), dec!(100));
        coord.handle_candle(&c, Some(scored("BTCUSDT", SignalType::Buy, 75)));

        let outcome = coord.handle_control(ControlCommand::Panic);
        assert!(outcome.applied);
        assert!(outcome.stats.is_paused);
        assert!(outcome.message.contains("BTCUSDT"));

        let again = coord.handle_control(ControlCommand::Panic);
        assert!(!again.applied);
        assert!(again.message.contains("State conflict"));

        drain(&mut rx);
        let c = candle("ETHUSDT", DAY_ONE + 60_000, dec!(100), dec!(100));
        assert!(coord
            .handle_candle(&c, Some(scored("ETHUSDT", SignalType::Buy, 100)))
            .is_none());
        assert!(drain(&mut rx).iter().all(|m| m.kind() != "SIGNAL"));

        // Rollover does not lift a panic
        let c = candle("ETHUSDT", DAY_ONE + DAY_MS, dec!(100), dec!(100));
        assert!(coord
            .handle_candle(&c, Some(scored("ETHUSDT", SignalType::Buy, 100)))
            .is_none());

        assert!(coord.handle_control(ControlCommand::Resume).applied);
        let c = candle("ETHUSDT", DAY_ONE + DAY_MS + 60_000, dec!(100), dec!(100));
        assert!(coord
            .handle_candle(&c, Some(scored("ETHUSDT", SignalType::Buy, 100)))
            .is_some());
    }

    #[test]
    fn test_paper_exit_updates_history() {
        let (mut coord, mut rx) = coordinator();
        let c = candle("BTCUSDT", DAY_ONE, dec!(100), dec!(100));
        coord.handle_candle(&c, Some(scored("BTCUSDT", SignalType::Buy, 75)));

        let c = candle("BTCUSDT", DAY_ONE + 60_000, dec!(101), dec!(107));
        assert!(coord.handle_candle(&c, None).is_none());

        let book = coord.performance.read();
        let history = book.get("BTCUSDT").unwrap();
        assert_eq!(history.trades(), 1);
        assert_eq!(history.total_pnl, dec!(300));
        drop(book);

        let stats = coord.risk().stats();
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.open_positions, 0);
        assert!(drain(&mut rx)
            .iter()
            .any(|m| matches!(&m.body, MessageBody::Log(l) if l.message.contains("TakeProfit"))));
    }

    #[test]
    fn test_live_stop_touch_waits_for_close_report() {
        let (mut coord, mut rx) = live_coordinator();
        let c = candle("BTCUSDT", DAY_ONE, dec!(100), dec!(100));
        let signal = coord
            .handle_candle(&c, Some(buy_at("BTCUSDT", c.timestamp)))
            .unwrap();
        assert_eq!(coord.risk().stats().open_positions, 0);

        coord.handle_execution(ExecutionReport::Opened {
            signal_id: signal.signal_id,
            fill_price: None,
            size: None,
        });
        assert_eq!(coord.risk().stats().open_positions, 1);
        drain(&mut rx);

        // Trades through the 97 stop; the collaborator owns the exit
        let c = candle("BTCUSDT", DAY_ONE + 60_000, dec!(95), dec!(100));
        coord.handle_candle(&c, None);
        assert!(coord.risk().position("BTCUSDT").is_some());
        assert_eq!(coord.risk().stats().trades, 0);

        coord.handle_execution(ExecutionReport::Closed {
            symbol: "BTCUSDT".to_string(),
            exit_price: dec!(96),
            timestamp: Some(DAY_ONE + 120_000),
        });
        let stats = coord.risk().stats();
        assert_eq!(stats.trades, 1);
        assert_eq!(stats.pnl, dec!(-200));
        assert!(drain(&mut rx)
            .iter()
            .filter_map(|m| m.as_log())
            .any(|log| log.message.contains("External")));
        assert_eq!(
            coord.performance.read().get("BTCUSDT").unwrap().total_pnl,
            dec!(-200)
        );
    }

    #[test]
    fn test_declined_signal_frees_symbol() {
        let (mut coord, mut rx) = live_coordinator();
        let c = candle("BTCUSDT", DAY_ONE, dec!(100), dec!(100));
        let signal = coord
            .handle_candle(&c, Some(buy_at("BTCUSDT", c.timestamp)))
            .unwrap();

        let c = candle("BTCUSDT", DAY_ONE + 60_000, dec!(100), dec!(100));
        assert!(coord
            .handle_candle(&c, Some(buy_at("BTCUSDT", c.timestamp)))
            .is_none());
        drain(&mut rx);

        let report: ExecutionReport = serde_json::from_str(&format!(
            r#"{{"event":"declined","signal_id":{},"reason":"insufficient margin"}}"#,
            signal.signal_id
        ))
        .unwrap();
        coord.handle_execution(report);
        let messages = drain(&mut rx);
        assert!(messages
            .iter()
            .filter_map(|m| m.as_log())
            .any(|log| log.message.contains("insufficient margin")));
        assert!(messages.iter().any(|m| m.as_stats().is_some()));

        let c = candle("BTCUSDT", DAY_ONE + 120_000, dec!(100), dec!(100));
        assert!(coord
            .handle_candle(&c, Some(buy_at("BTCUSDT", c.timestamp)))
            .is_some());
    }

    #[test]
    fn test_unfilled_signal_released_after_ttl() {
        let (mut coord, mut rx) = live_coordinator();
        let c = candle("BTCUSDT", DAY_ONE, dec!(100), dec!(100));
        let signal = coord
            .handle_candle(&c, Some(buy_at("BTCUSDT", c.timestamp)))
            .unwrap();
        drain(&mut rx);

        // Default TTL is five minutes of candle time
        let c = candle("ETHUSDT", DAY_ONE + 300_000, dec!(100), dec!(100));
        coord.handle_candle(&c, None);
        assert_eq!(coord.risk().awaiting_fill(), 0);
        assert!(drain(&mut rx)
            .iter()
            .filter_map(|m| m.as_log())
            .any(|log| log.message.contains(&format!("{} BTCUSDT", signal.signal_id))));

        // A late fill is refused rather than opening a stale position
        coord.handle_execution(ExecutionReport::Opened {
            signal_id: signal.signal_id,
            fill_price: None,
            size: None,
        });
        assert!(coord.risk().position("BTCUSDT").is_none());
    }

    #[tokio::test]
    async fn test_control_preempts_queued_requests() {
        let (coord, _rx) = coordinator();
        let (req_tx, req_rx) = mpsc::channel(16);
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();

        // Queue a gate request, then a panic, before the coordinator runs
        let (reply_tx, reply_rx) = oneshot::channel();
        req_tx
            .send(CoordinatorRequest::Candle {
                candle: candle("BTCUSDT", DAY_ONE, dec!(100), dec!(100)),
                approved: Some(scored("BTCUSDT", SignalType::Buy, 100)),
                reply: reply_tx,
            })
            .await
            .unwrap();
        ctl_tx
            .send(ControlRequest {
                command: ControlCommand::Panic,
                reply: None,
            })
            .unwrap();

        let handle = tokio::spawn(coord.run(req_rx, ctl_rx));
        assert_eq!(reply_rx.await.unwrap(), None);

        drop(req_tx);
        drop(ctl_tx);
        handle.await.unwrap();
    }
}
