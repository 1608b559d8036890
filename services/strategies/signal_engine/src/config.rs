//! Engine configuration
//!
//! Every threshold the pipeline uses lives here as a named field so tests can
//! drive the stages with synthetic values. [`EngineConfig::validate`] runs once
//! at startup; a failure is fatal.

use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use signal_dashboard::DashboardConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable consulted when no `--config` flag is given
pub const CONFIG_PATH_ENV: &str = "SIGNAL_ENGINE_CONFIG";

/// Default config location relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "configs/signal_engine.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub indicators: IndicatorConfig,
    pub regime: RegimeConfig,
    pub signals: SignalConfig,
    pub scoring: ScoringConfig,
    pub quality: QualityConfig,
    pub risk: RiskConfig,
    pub relays: RelayConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Rolling candle buffer per symbol
    pub buffer_capacity: usize,
    pub sma_fast_period: usize,
    pub sma_slow_period: usize,
    pub macd_fast_period: usize,
    pub macd_slow_period: usize,
    pub macd_signal_period: usize,
    pub rsi_period: usize,
    pub atr_period: usize,
    pub volume_period: usize,
    /// Bars between the two fast-SMA samples used for the trend slope
    pub slope_lookback: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 200,
            sma_fast_period: 20,
            sma_slow_period: 50,
            macd_fast_period: 12,
            macd_slow_period: 26,
            macd_signal_period: 9,
            rsi_period: 14,
            atr_period: 14,
            volume_period: 20,
            slope_lookback: 5,
        }
    }
}

impl IndicatorConfig {
    /// Longest lookback any indicator needs, including the previous-bar values
    /// used for crossover detection.
    pub fn longest_lookback(&self) -> usize {
        [
            self.sma_slow_period + 1,
            self.sma_fast_period + self.slope_lookback,
            self.macd_slow_period + self.macd_signal_period,
            self.rsi_period + 1,
            self.atr_period,
            self.volume_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// Per-bar fast-SMA slope, in ATR units, below which the market is sideways
    pub min_slope: Decimal,
    /// Slope at which the regime is directional regardless of the MA relationship
    pub strong_slope: Decimal,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            min_slope: dec!(0.05),
            strong_slope: dec!(0.25),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub rsi_oversold: Decimal,
    pub rsi_overbought: Decimal,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rsi_oversold: dec!(30),
            rsi_overbought: dec!(70),
        }
    }
}

/// Maximum points per scoring factor. Must sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub trend: u8,
    pub rsi: u8,
    pub macd: u8,
    pub volume: u8,
    pub history: u8,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            trend: 25,
            rsi: 20,
            macd: 15,
            volume: 20,
            history: 20,
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> u32 {
        [self.trend, self.rsi, self.macd, self.volume, self.history]
            .iter()
            .map(|w| u32::from(*w))
            .sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoreWeights,
    /// Emission threshold (0-100)
    pub min_confidence: u8,
    /// RSI points past the oversold/overbought line that earn full credit
    pub rsi_full_depth: Decimal,
    /// Absolute MACD histogram that earns full credit
    pub macd_full_scale: Decimal,
    /// Volume / average ratio that earns full credit
    pub volume_full_ratio: Decimal,
    /// Trailing win rate worth zero history points
    pub history_floor_win_rate: Decimal,
    /// Trailing win rate worth full history points
    pub history_full_win_rate: Decimal,
    /// Closed trades kept per symbol
    pub history_window: usize,
    /// Below this many closed trades the symbol is cold and scores neutral
    pub history_min_trades: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            min_confidence: 65,
            rsi_full_depth: dec!(10),
            macd_full_scale: dec!(0.004),
            volume_full_ratio: dec!(1.5),
            history_floor_win_rate: dec!(0.15),
            history_full_win_rate: dec!(0.65),
            history_window: 20,
            history_min_trades: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Regime strength at which an opposing regime vetoes a candidate
    pub strong_regime_strength: Decimal,
    /// Minimum volume / rolling average ratio
    pub min_volume_ratio: Decimal,
    /// Minimum quote notional (close x volume) of the signal candle; zero disables
    pub min_notional: Decimal,
    /// Ceiling on ATR as a percentage of the close; wilder bars are skipped
    pub max_atr_pct: Decimal,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            strong_regime_strength: dec!(70),
            min_volume_ratio: dec!(1.2),
            min_notional: Decimal::ZERO,
            max_atr_pct: dec!(3),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Equity at the first trading day
    pub starting_equity: Decimal,
    /// Fraction of equity risked per position at confidence 100
    pub max_risk_fraction: Decimal,
    /// Position notional cap as a fraction of equity
    pub max_notional_fraction: Decimal,
    /// Stop distance in ATR multiples
    pub stop_atr_multiple: Decimal,
    /// Target distance / stop distance
    pub reward_risk_ratio: Decimal,
    /// Daily drawdown cap as a fraction of day-start equity
    pub max_daily_drawdown: Decimal,
    pub max_open_positions: usize,
    pub max_signals_per_day: u32,
    /// Decimal places prices and ATR are rounded to before exit levels are fixed
    pub price_decimals: u32,
    /// Open a position for every emitted signal without waiting for a fill report
    pub paper_trading: bool,
    /// Close paper positions when a candle trades through their stop or
    /// target. Ignored in live mode, where closes come from execution reports.
    pub simulate_exits: bool,
    /// Live mode: seconds of candle time an emitted signal waits for a fill
    /// report before it stops holding its symbol and position slot
    pub pending_fill_ttl_secs: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            starting_equity: dec!(10000),
            max_risk_fraction: dec!(0.02),
            max_notional_fraction: dec!(1),
            stop_atr_multiple: dec!(1.5),
            reward_risk_ratio: dec!(2),
            max_daily_drawdown: dec!(0.10),
            max_open_positions: 5,
            max_signals_per_day: 100,
            price_decimals: 8,
            paper_trading: true,
            simulate_exits: true,
            pending_fill_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Unix socket delivering candle events as JSON lines
    pub market_data_relay_path: String,
    /// Unix socket delivering execution reports as JSON lines
    pub execution_relay_path: String,
    /// Bounded queue depth per symbol
    pub symbol_queue_capacity: usize,
    pub reconnect_delay_secs: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            market_data_relay_path: "/tmp/signal_engine/market_data.sock".to_string(),
            execution_relay_path: "/tmp/signal_engine/execution.sock".to_string(),
            symbol_queue_capacity: 1024,
            reconnect_delay_secs: 1,
            max_reconnect_attempts: 30,
        }
    }
}

impl RelayConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

fn ensure(condition: bool, message: impl Into<String>) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(EngineError::config(message))
    }
}

fn is_unit_fraction(value: Decimal) -> bool {
    value > Decimal::ZERO && value <= Decimal::ONE
}

impl EngineConfig {
    /// Check every cross-field invariant. Called before anything starts.
    pub fn validate(&self) -> Result<()> {
        let ind = &self.indicators;
        for (name, period) in [
            ("sma_fast_period", ind.sma_fast_period),
            ("sma_slow_period", ind.sma_slow_period),
            ("macd_fast_period", ind.macd_fast_period),
            ("macd_slow_period", ind.macd_slow_period),
            ("macd_signal_period", ind.macd_signal_period),
            ("rsi_period", ind.rsi_period),
            ("atr_period", ind.atr_period),
            ("volume_period", ind.volume_period),
            ("slope_lookback", ind.slope_lookback),
        ] {
            ensure(period > 0, format!("indicators.{name} must be positive"))?;
        }
        ensure(
            ind.sma_fast_period < ind.sma_slow_period,
            "indicators.sma_fast_period must be shorter than sma_slow_period",
        )?;
        ensure(
            ind.macd_fast_period < ind.macd_slow_period,
            "indicators.macd_fast_period must be shorter than macd_slow_period",
        )?;
        ensure(
            ind.buffer_capacity >= ind.longest_lookback(),
            format!(
                "indicators.buffer_capacity {} is shorter than the longest lookback {}",
                ind.buffer_capacity,
                ind.longest_lookback()
            ),
        )?;

        ensure(
            self.regime.min_slope > Decimal::ZERO,
            "regime.min_slope must be positive",
        )?;
        ensure(
            self.regime.strong_slope > self.regime.min_slope,
            "regime.strong_slope must exceed min_slope",
        )?;

        let sig = &self.signals;
        ensure(
            sig.rsi_oversold > Decimal::ZERO
                && sig.rsi_oversold < sig.rsi_overbought
                && sig.rsi_overbought < dec!(100),
            "signals: require 0 < rsi_oversold < rsi_overbought < 100",
        )?;

        let sc = &self.scoring;
        ensure(
            sc.weights.total() == 100,
            format!("scoring.weights must sum to 100, got {}", sc.weights.total()),
        )?;
        ensure(
            sc.min_confidence <= 100,
            "scoring.min_confidence must be within 0..=100",
        )?;
        ensure(
            sc.rsi_full_depth > Decimal::ZERO,
            "scoring.rsi_full_depth must be positive",
        )?;
        ensure(
            sc.macd_full_scale > Decimal::ZERO,
            "scoring.macd_full_scale must be positive",
        )?;
        ensure(
            sc.volume_full_ratio > Decimal::ONE,
            "scoring.volume_full_ratio must exceed 1",
        )?;
        ensure(
            sc.history_floor_win_rate >= Decimal::ZERO
                && sc.history_floor_win_rate < sc.history_full_win_rate
                && sc.history_full_win_rate <= Decimal::ONE,
            "scoring: require 0 <= history_floor_win_rate < history_full_win_rate <= 1",
        )?;
        ensure(
            sc.history_min_trades >= 1 && sc.history_window >= sc.history_min_trades,
            "scoring: require 1 <= history_min_trades <= history_window",
        )?;

        let q = &self.quality;
        ensure(
            q.strong_regime_strength >= Decimal::ZERO && q.strong_regime_strength <= dec!(100),
            "quality.strong_regime_strength must be within 0..=100",
        )?;
        ensure(
            q.min_volume_ratio >= Decimal::ZERO && q.min_notional >= Decimal::ZERO,
            "quality floors must be non-negative",
        )?;
        ensure(
            q.max_atr_pct > Decimal::ZERO,
            "quality.max_atr_pct must be positive",
        )?;

        let r = &self.risk;
        ensure(
            r.starting_equity > Decimal::ZERO,
            "risk.starting_equity must be positive",
        )?;
        ensure(
            is_unit_fraction(r.max_risk_fraction),
            "risk.max_risk_fraction must be within (0, 1]",
        )?;
        ensure(
            r.max_notional_fraction > Decimal::ZERO,
            "risk.max_notional_fraction must be positive",
        )?;
        ensure(
            r.stop_atr_multiple > Decimal::ZERO,
            "risk.stop_atr_multiple must be positive (non-positive stop distance)",
        )?;
        ensure(
            r.reward_risk_ratio > Decimal::ZERO,
            "risk.reward_risk_ratio must be positive",
        )?;
        ensure(
            is_unit_fraction(r.max_daily_drawdown),
            "risk.max_daily_drawdown must be within (0, 1]",
        )?;
        ensure(
            r.max_open_positions > 0,
            "risk.max_open_positions must be positive",
        )?;
        ensure(r.price_decimals <= 16, "risk.price_decimals must be <= 16")?;
        ensure(
            r.pending_fill_ttl_secs > 0,
            "risk.pending_fill_ttl_secs must be positive",
        )?;

        ensure(
            self.relays.symbol_queue_capacity > 0,
            "relays.symbol_queue_capacity must be positive",
        )?;
        ensure(
            self.relays.max_reconnect_attempts > 0,
            "relays.max_reconnect_attempts must be positive",
        )?;
        self.dashboard
            .socket_addr()
            .map_err(|e| EngineError::config(format!("dashboard: {e}")))?;

        Ok(())
    }

    /// Parse a TOML document and validate it.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file {:?} not found, using defaults", path);
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }

        info!("Loading configuration from {:?}", path);
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

/// Resolve the config path: explicit flag, then environment, then default.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
