//! Engine runtime: symbol routing, per-symbol tasks and the control handle

use crate::candle::Candle;
use crate::config::EngineConfig;
use crate::coordinator::{
    ControlCommand, ControlOutcome, ControlRequest, Coordinator, CoordinatorRequest,
    ExecutionReport,
};
use crate::error::{EngineError, Result};
use crate::messages::{DashboardMessage, LogLevel};
use crate::performance::PerformanceBook;
use crate::pipeline::{PipelineOutcome, SymbolPipeline};
use crate::risk::{DailyStats, RiskManager};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use signal_dashboard::{ControlReply, ControlSurface};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Candle tagged with the ingestion epoch it was queued under
type QueuedCandle = (u64, Candle);

/// Operator-facing commands, cheap to clone into HTTP handlers. Holding a
/// handle does not keep the coordinator alive after engine shutdown.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    control: mpsc::UnboundedSender<ControlRequest>,
    requests: mpsc::WeakSender<CoordinatorRequest>,
}

impl ControlHandle {
    async fn send(&self, command: ControlCommand) -> Result<ControlOutcome> {
        let (reply, response) = oneshot::channel();
        self.control
            .send(ControlRequest {
                command,
                reply: Some(reply),
            })
            .map_err(|_| EngineError::ChannelClosed("control"))?;
        response
            .await
            .map_err(|_| EngineError::ChannelClosed("control reply"))
    }

    pub async fn panic(&self) -> Result<ControlOutcome> {
        self.send(ControlCommand::Panic).await
    }

    pub async fn resume(&self) -> Result<ControlOutcome> {
        self.send(ControlCommand::Resume).await
    }

    pub async fn reset(&self) -> Result<ControlOutcome> {
        self.send(ControlCommand::Reset).await
    }

    pub async fn stats(&self) -> Result<DailyStats> {
        let requests = self
            .requests
            .upgrade()
            .ok_or(EngineError::ChannelClosed("coordinator"))?;
        let (reply, response) = oneshot::channel();
        requests
            .send(CoordinatorRequest::Stats { reply })
            .await
            .map_err(|_| EngineError::ChannelClosed("coordinator"))?;
        response
            .await
            .map_err(|_| EngineError::ChannelClosed("stats reply"))
    }
}

fn to_reply(result: Result<ControlOutcome>) -> ControlReply {
    match result {
        Ok(outcome) => ControlReply {
            ok: outcome.applied,
            message: outcome.message,
            state: serde_json::to_value(&outcome.stats).unwrap_or_default(),
        },
        Err(e) => ControlReply {
            ok: false,
            message: e.to_string(),
            state: serde_json::Value::Null,
        },
    }
}

#[async_trait]
impl ControlSurface for ControlHandle {
    async fn panic(&self) -> ControlReply {
        to_reply(ControlHandle::panic(self).await)
    }

    async fn resume(&self) -> ControlReply {
        to_reply(ControlHandle::resume(self).await)
    }

    async fn reset(&self) -> ControlReply {
        to_reply(ControlHandle::reset(self).await)
    }

    async fn status(&self) -> serde_json::Value {
        match self.stats().await {
            Ok(stats) => serde_json::to_value(&stats).unwrap_or_default(),
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        }
    }
}

/// Live engine. Candles for a symbol are queued to that symbol's task, which
/// runs its pipeline and forwards the result to the coordinator.
pub struct SignalEngine {
    config: Arc<EngineConfig>,
    routes: DashMap<String, mpsc::Sender<QueuedCandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    epoch: Arc<AtomicU64>,
    requests: mpsc::Sender<CoordinatorRequest>,
    control: ControlHandle,
    performance: Arc<RwLock<PerformanceBook>>,
    output: mpsc::UnboundedSender<DashboardMessage>,
    coordinator: JoinHandle<()>,
}

impl SignalEngine {
    /// Spawn the coordinator. Messages for the dashboard are written to `output`.
    pub fn start(config: EngineConfig, output: mpsc::UnboundedSender<DashboardMessage>) -> Self {
        let performance = Arc::new(RwLock::new(PerformanceBook::new(
            config.scoring.history_window,
        )));
        let (request_tx, request_rx) = mpsc::channel(config.relays.symbol_queue_capacity);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let coordinator = Coordinator::new(
            RiskManager::new(config.risk.clone()),
            performance.clone(),
            output.clone(),
        );
        let handle = tokio::spawn(coordinator.run(request_rx, control_rx));

        Self {
            config: Arc::new(config),
            routes: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
            epoch: Arc::new(AtomicU64::new(0)),
            control: ControlHandle {
                control: control_tx,
                requests: request_tx.downgrade(),
            },
            requests: request_tx,
            performance,
            output,
            coordinator: handle,
        }
    }

    pub fn control_handle(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn performance(&self) -> Arc<RwLock<PerformanceBook>> {
        self.performance.clone()
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.routes.iter().map(|e| e.key().clone()).collect();
        symbols.sort();
        symbols
    }

    fn route(&self, symbol: &str) -> mpsc::Sender<QueuedCandle> {
        if let Some(sender) = self.routes.get(symbol) {
            return sender.value().clone();
        }

        self.routes
            .entry(symbol.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.config.relays.symbol_queue_capacity);
                let task = SymbolTask {
                    pipeline: SymbolPipeline::new(symbol, &self.config),
                    epoch: self.epoch.clone(),
                    requests: self.requests.clone(),
                    performance: self.performance.clone(),
                    output: self.output.clone(),
                };
                info!("Subscribed symbol pipeline for {}", symbol);
                self.tasks.lock().push(tokio::spawn(task.run(rx)));
                tx
            })
            .value()
            .clone()
    }

    /// Queue a candle for its symbol. Waits when that symbol's queue is full.
    pub async fn submit(&self, candle: Candle) -> Result<()> {
        if candle.symbol.is_empty() {
            return Err(EngineError::data("", "candle without symbol"));
        }
        let sender = self.route(&candle.symbol);
        let epoch = self.epoch.load(Ordering::Acquire);
        sender
            .send((epoch, candle))
            .await
            .map_err(|_| EngineError::ChannelClosed("symbol queue"))
    }

    pub async fn report_execution(&self, report: ExecutionReport) -> Result<()> {
        self.requests
            .send(CoordinatorRequest::Execution(report))
            .await
            .map_err(|_| EngineError::ChannelClosed("coordinator"))
    }

    /// Drop every candle still queued. Called when the upstream feed
    /// disconnects; indicator history is kept and stale replays are rejected
    /// by ordering checks.
    pub fn discard_buffered(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        warn!("Discarding buffered candles (epoch {})", epoch);
    }

    /// Close every queue, let the symbol tasks drain, then stop the coordinator.
    pub async fn shutdown(self) {
        let Self {
            routes,
            tasks,
            requests,
            control,
            coordinator,
            ..
        } = self;
        drop(routes);

        let tasks = tasks.into_inner();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Symbol task failed: {}", e);
            }
        }

        drop(requests);
        drop(control);
        if let Err(e) = coordinator.await {
            warn!("Coordinator task failed: {}", e);
        }
        info!("Signal engine stopped");
    }
}

struct SymbolTask {
    pipeline: SymbolPipeline,
    epoch: Arc<AtomicU64>,
    requests: mpsc::Sender<CoordinatorRequest>,
    performance: Arc<RwLock<PerformanceBook>>,
    output: mpsc::UnboundedSender<DashboardMessage>,
}

impl SymbolTask {
    fn log(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => info!("{}", message),
            LogLevel::Warn => warn!("{}", message),
        }
        let _ = self.output.send(DashboardMessage::log(level, message));
    }

    async fn run(mut self, mut queue: mpsc::Receiver<QueuedCandle>) {
        let symbol = self.pipeline.symbol().to_string();
        let mut discarded = 0u64;

        while let Some((epoch, candle)) = queue.recv().await {
            if epoch < self.epoch.load(Ordering::Acquire) {
                discarded += 1;
                continue;
            }
            if discarded > 0 {
                debug!("{}: discarded {} stale candles", symbol, discarded);
                discarded = 0;
            }

            let history = self.performance.read().get(&symbol).cloned();
            let outcome = match self.pipeline.process(candle.clone(), history.as_ref()) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.log(LogLevel::Warn, format!("Dropped candle: {}", e));
                    continue;
                }
            };

            let approved = match outcome {
                PipelineOutcome::WarmingUp {
                    indicator,
                    available,
                    required,
                } => {
                    debug!(
                        "{}: {} warming up ({}/{})",
                        symbol, indicator, available, required
                    );
                    None
                }
                PipelineOutcome::NoCandidate { regime } => {
                    debug!("{}: no candidate ({})", symbol, regime.regime);
                    None
                }
                PipelineOutcome::BelowThreshold { scored, min } => {
                    self.log(
                        LogLevel::Info,
                        format!(
                            "Rejected {} {}: confidence {} below {} ({:?})",
                            scored.candidate.direction, symbol, scored.total, min, scored.breakdown
                        ),
                    );
                    None
                }
                PipelineOutcome::QualityRejected { scored, verdict } => {
                    self.log(
                        LogLevel::Info,
                        format!(
                            "Rejected {} {} (confidence {}): {}",
                            scored.candidate.direction,
                            symbol,
                            scored.total,
                            verdict.describe()
                        ),
                    );
                    None
                }
                PipelineOutcome::Approved { scored } => Some(scored),
            };

            let (reply, response) = oneshot::channel();
            let request = CoordinatorRequest::Candle {
                candle,
                approved,
                reply,
            };
            if self.requests.send(request).await.is_err() {
                warn!("{}: coordinator gone, stopping symbol task", symbol);
                break;
            }
            // Wait for the gate so this symbol's candles stay strictly ordered
            if response.await.is_err() {
                break;
            }
        }

        debug!("{}: symbol task finished", symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{bar, swing_trend, SPIKE_BAR};
    use rust_decimal_macros::dec;

    fn collect(rx: &mut mpsc::UnboundedReceiver<DashboardMessage>) -> Vec<DashboardMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_end_to_end_signal() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = SignalEngine::start(EngineConfig::default(), tx);

        for candle in swing_trend("BTCUSDT", SPIKE_BAR + 1) {
            engine.submit(candle).await.unwrap();
        }
        let control = engine.control_handle();
        engine.shutdown().await;
        drop(control);

        let messages = collect(&mut rx);
        let signals: Vec<_> = messages.iter().filter_map(|m| m.as_signal()).collect();
        assert_eq!(signals.len(), 1);

        let signal = signals[0];
        assert_eq!(signal.symbol, "BTCUSDT");
        assert_eq!(signal.confidence, 70);
        assert_eq!(signal.tp - signal.entry, dec!(2) * (signal.entry - signal.sl));
    }

    #[tokio::test]
    async fn test_symbols_are_isolated() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = SignalEngine::start(EngineConfig::default(), tx);

        engine.submit(bar("ETHUSDT", 5, dec!(100), dec!(1))).await.unwrap();
        // Out of order for ETH only
        engine.submit(bar("ETHUSDT", 4, dec!(100), dec!(1))).await.unwrap();
        for candle in swing_trend("BTCUSDT", SPIKE_BAR + 1) {
            engine.submit(candle).await.unwrap();
        }
        assert_eq!(engine.symbols(), vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
        engine.shutdown().await;

        let messages = collect(&mut rx);
        assert!(messages
            .iter()
            .filter_map(|m| m.as_log())
            .any(|l| l.message.contains("out-of-order")));
        assert_eq!(messages.iter().filter(|m| m.as_signal().is_some()).count(), 1);
    }

    #[tokio::test]
    async fn test_panic_through_handle() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = SignalEngine::start(EngineConfig::default(), tx);
        let control = engine.control_handle();

        let outcome = control.panic().await.unwrap();
        assert!(outcome.applied);
        assert!(control.stats().await.unwrap().is_paused);

        for candle in swing_trend("BTCUSDT", SPIKE_BAR + 1) {
            engine.submit(candle).await.unwrap();
        }
        let surface: &dyn ControlSurface = &control;
        let status = surface.status().await;
        assert_eq!(status["is_paused"], true);

        engine.shutdown().await;
        drop(control);

        let messages = collect(&mut rx);
        assert!(messages.iter().all(|m| m.as_signal().is_none()));
        assert!(messages
            .iter()
            .filter_map(|m| m.as_log())
            .any(|l| l.message.contains("Suppressed BUY BTCUSDT")));
    }
}
