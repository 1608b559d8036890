//! # Signal Engine - Indicator Scoring and Risk Gating
//!
//! ## Purpose
//!
//! Turns per-symbol candle streams into a vetted stream of BUY/SELL signals
//! for an operator running semi-automated crypto trading. Every candidate is
//! scored, filtered for structural quality and gated against hard risk limits
//! (per-trade risk, open positions, daily drawdown, emergency stop) before it
//! reaches the dashboard.
//!
//! ## Architecture Role
//!
//! ```text
//! market data relay → [RelayConsumer] → per-symbol queue → [SymbolPipeline task]
//!                                                               │ gate request
//!                                                               ▼
//! control (panic/resume/reset) ─────────(biased)────────→ [Coordinator]
//! execution relay → [RelayConsumer] ─────────────────────→   RiskManager
//!                                                               │
//!                                                               ▼
//!                                                  SIGNAL / STATS / LOG messages
//! ```
//!
//! A symbol's indicator state is owned by exactly one task, so its candles are
//! processed strictly in order. Cross-symbol state (equity, drawdown, pause
//! flag, positions, performance history) is owned by the coordinator alone.
//!
//! ## Pipeline Stages
//!
//! 1. **Indicators**: SMA, EMA, MACD, RSI, ATR and volume average over a bounded
//!    candle buffer ([`indicators`])
//! 2. **Regime**: BULL/BEAR/SIDEWAYS from the ATR-normalised fast SMA slope ([`regime`])
//! 3. **Candidates**: MACD/SMA crosses and RSI extremes, blocked against the regime ([`signals`])
//! 4. **Scoring**: five capped components summing to 0-100 ([`scoring`])
//! 5. **Quality**: opposing-regime, liquidity and volatility checks ([`quality`])
//! 6. **Risk gate**: sizing, exit levels, limits and the pause state machine ([`risk`])

pub mod candle;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod messages;
pub mod performance;
pub mod pipeline;
pub mod quality;
pub mod regime;
pub mod relay_consumer;
pub mod risk;
pub mod scoring;
pub mod signals;

pub use candle::Candle;
pub use config::{resolve_config_path, EngineConfig};
pub use coordinator::{ControlCommand, ControlOutcome, Coordinator, ExecutionReport};
pub use engine::{ControlHandle, SignalEngine};
pub use error::{EngineError, Result};
pub use indicators::{IndicatorEngine, IndicatorSnapshot};
pub use messages::{DashboardMessage, LogLevel, MessageBody};
pub use performance::{PerformanceBook, SymbolPerformanceHistory};
pub use pipeline::{PipelineOutcome, SymbolPipeline};
pub use quality::{QualityFailure, QualityFilter, QualityVerdict};
pub use regime::{Regime, RegimeClassifier, RegimeState};
pub use relay_consumer::{Feed, RelayConsumer};
pub use risk::{DailyStats, RiskManager, TradingState};
pub use scoring::{ConfidenceScorer, ScoreBreakdown, ScoredSignal};
pub use signals::{CandidateSignal, SignalGenerator, SignalType, TradingSignal};
