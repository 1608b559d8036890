//! Technical indicators for signal generation
//!
//! Streaming indicators are updated one closed candle at a time and report
//! `None` until they have seen enough data. [`IndicatorEngine`] owns one
//! symbol's rolling candle buffer plus every indicator state, and produces an
//! [`IndicatorSnapshot`] once all of them are warm. All arithmetic is done in
//! `Decimal`, so the same candle sequence always yields the same snapshot.

use crate::candle::Candle;
use crate::config::IndicatorConfig;
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::VecDeque;

/// Simple Moving Average calculator
#[derive(Debug, Clone)]
pub struct MovingAverage {
    period: usize,
    values: VecDeque<Decimal>,
    sum: Decimal,
}

impl MovingAverage {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            values: VecDeque::with_capacity(period),
            sum: dec!(0),
        }
    }

    /// Add a new value and return current MA
    pub fn update(&mut self, value: Decimal) -> Option<Decimal> {
        self.values.push_back(value);
        self.sum += value;

        if self.values.len() > self.period {
            if let Some(old_value) = self.values.pop_front() {
                self.sum -= old_value;
            }
        }

        self.current()
    }

    /// Get current moving average without adding new value
    pub fn current(&self) -> Option<Decimal> {
        if self.is_ready() {
            Some(self.sum / Decimal::from(self.period))
        } else {
            None
        }
    }

    pub fn is_ready(&self) -> bool {
        self.values.len() == self.period
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Exponential Moving Average, seeded with the SMA of its first `period` values
#[derive(Debug, Clone)]
pub struct ExponentialMovingAverage {
    alpha: Decimal,
    seed: MovingAverage,
    value: Option<Decimal>,
}

impl ExponentialMovingAverage {
    pub fn new(period: usize) -> Self {
        Self {
            alpha: dec!(2) / Decimal::from(period + 1),
            seed: MovingAverage::new(period),
            value: None,
        }
    }

    pub fn update(&mut self, value: Decimal) -> Option<Decimal> {
        self.value = match self.value {
            Some(prev) => Some(prev + self.alpha * (value - prev)),
            None => self.seed.update(value),
        };
        self.value
    }

    pub fn current(&self) -> Option<Decimal> {
        self.value
    }
}

/// Wilder's smoothing: SMA seed, then `avg = (avg * (n - 1) + x) / n`
#[derive(Debug, Clone)]
pub struct WilderAverage {
    period: Decimal,
    seed: MovingAverage,
    value: Option<Decimal>,
}

impl WilderAverage {
    pub fn new(period: usize) -> Self {
        Self {
            period: Decimal::from(period),
            seed: MovingAverage::new(period),
            value: None,
        }
    }

    pub fn update(&mut self, value: Decimal) -> Option<Decimal> {
        self.value = match self.value {
            Some(prev) => Some((prev * (self.period - Decimal::ONE) + value) / self.period),
            None => self.seed.update(value),
        };
        self.value
    }

    pub fn current(&self) -> Option<Decimal> {
        self.value
    }
}

/// Relative Strength Index with Wilder smoothing
#[derive(Debug, Clone)]
pub struct RelativeStrengthIndex {
    prev_close: Option<Decimal>,
    avg_gain: WilderAverage,
    avg_loss: WilderAverage,
}

impl RelativeStrengthIndex {
    pub fn new(period: usize) -> Self {
        Self {
            prev_close: None,
            avg_gain: WilderAverage::new(period),
            avg_loss: WilderAverage::new(period),
        }
    }

    pub fn update(&mut self, close: Decimal) -> Option<Decimal> {
        let prev = self.prev_close.replace(close)?;
        let change = close - prev;
        let gain = self.avg_gain.update(change.max(Decimal::ZERO));
        let loss = self.avg_loss.update((-change).max(Decimal::ZERO));

        match (gain, loss) {
            (Some(gain), Some(loss)) => Some(Self::from_averages(gain, loss)),
            _ => None,
        }
    }

    pub fn current(&self) -> Option<Decimal> {
        match (self.avg_gain.current(), self.avg_loss.current()) {
            (Some(gain), Some(loss)) => Some(Self::from_averages(gain, loss)),
            _ => None,
        }
    }

    fn from_averages(gain: Decimal, loss: Decimal) -> Decimal {
        if loss.is_zero() {
            // Flat series sits at the midline, a loss-free series at the top
            return if gain.is_zero() { dec!(50) } else { dec!(100) };
        }
        dec!(100) - dec!(100) / (Decimal::ONE + gain / loss)
    }
}

/// Average True Range with Wilder smoothing
#[derive(Debug, Clone)]
pub struct AverageTrueRange {
    prev_close: Option<Decimal>,
    average: WilderAverage,
}

impl AverageTrueRange {
    pub fn new(period: usize) -> Self {
        Self {
            prev_close: None,
            average: WilderAverage::new(period),
        }
    }

    pub fn update(&mut self, candle: &Candle) -> Option<Decimal> {
        let tr = candle.true_range(self.prev_close);
        self.prev_close = Some(candle.close);
        self.average.update(tr)
    }

    pub fn current(&self) -> Option<Decimal> {
        self.average.current()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MacdValue {
    pub macd: Decimal,
    pub signal: Decimal,
    pub histogram: Decimal,
}

/// MACD line, signal line and histogram
#[derive(Debug, Clone)]
pub struct Macd {
    fast: ExponentialMovingAverage,
    slow: ExponentialMovingAverage,
    signal: ExponentialMovingAverage,
    value: Option<MacdValue>,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: ExponentialMovingAverage::new(fast),
            slow: ExponentialMovingAverage::new(slow),
            signal: ExponentialMovingAverage::new(signal),
            value: None,
        }
    }

    pub fn update(&mut self, close: Decimal) -> Option<MacdValue> {
        let fast = self.fast.update(close);
        let slow = self.slow.update(close);

        self.value = match (fast, slow) {
            (Some(fast), Some(slow)) => {
                let macd = fast - slow;
                self.signal.update(macd).map(|signal| MacdValue {
                    macd,
                    signal,
                    histogram: macd - signal,
                })
            }
            _ => None,
        };
        self.value
    }

    pub fn current(&self) -> Option<MacdValue> {
        self.value
    }

    pub fn fast_ema(&self) -> Option<Decimal> {
        self.fast.current()
    }

    pub fn slow_ema(&self) -> Option<Decimal> {
        self.slow.current()
    }
}

/// Latest indicator values for one symbol. Superseded on every candle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub timestamp: i64,
    pub close: Decimal,
    pub volume: Decimal,
    pub sma_fast: Decimal,
    pub sma_slow: Decimal,
    pub prev_sma_fast: Decimal,
    pub prev_sma_slow: Decimal,
    pub ema_fast: Decimal,
    pub ema_slow: Decimal,
    pub macd: Decimal,
    pub macd_signal: Decimal,
    pub macd_histogram: Decimal,
    pub prev_macd_histogram: Decimal,
    pub rsi: Decimal,
    pub atr: Decimal,
    pub volume_avg: Decimal,
    /// Per-bar change of the fast SMA in ATR units
    pub trend_slope: Decimal,
}

impl IndicatorSnapshot {
    /// Current volume over its rolling average (zero when the average is zero)
    pub fn volume_ratio(&self) -> Decimal {
        if self.volume_avg.is_zero() {
            Decimal::ZERO
        } else {
            self.volume / self.volume_avg
        }
    }

    /// Quote notional traded in the snapshot candle
    pub fn notional(&self) -> Decimal {
        self.close * self.volume
    }

    pub fn atr_pct(&self) -> Decimal {
        if self.close.is_zero() {
            Decimal::ZERO
        } else {
            self.atr / self.close * dec!(100)
        }
    }
}

/// Values from the previous bar needed for crossover detection
#[derive(Debug, Clone, Default)]
struct PreviousBar {
    sma_fast: Option<Decimal>,
    sma_slow: Option<Decimal>,
    histogram: Option<Decimal>,
}

/// Per-symbol rolling history and indicator state
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    symbol: String,
    config: IndicatorConfig,
    buffer: VecDeque<Candle>,
    candles_seen: usize,
    sma_fast: MovingAverage,
    sma_slow: MovingAverage,
    macd: Macd,
    rsi: RelativeStrengthIndex,
    atr: AverageTrueRange,
    volume_avg: MovingAverage,
    fast_history: VecDeque<Decimal>,
    previous: PreviousBar,
}

impl IndicatorEngine {
    pub fn new(symbol: impl Into<String>, config: IndicatorConfig) -> Self {
        Self {
            symbol: symbol.into(),
            buffer: VecDeque::with_capacity(config.buffer_capacity),
            candles_seen: 0,
            sma_fast: MovingAverage::new(config.sma_fast_period),
            sma_slow: MovingAverage::new(config.sma_slow_period),
            macd: Macd::new(
                config.macd_fast_period,
                config.macd_slow_period,
                config.macd_signal_period,
            ),
            rsi: RelativeStrengthIndex::new(config.rsi_period),
            atr: AverageTrueRange::new(config.atr_period),
            volume_avg: MovingAverage::new(config.volume_period),
            fast_history: VecDeque::with_capacity(config.slope_lookback + 1),
            previous: PreviousBar::default(),
            config,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Append a candle. Malformed, foreign, duplicate or out-of-order candles
    /// are rejected before any state is touched.
    pub fn ingest(&mut self, candle: Candle) -> Result<()> {
        if candle.symbol != self.symbol {
            return Err(EngineError::data(
                &candle.symbol,
                format!("routed to {} pipeline", self.symbol),
            ));
        }
        candle.validate()?;
        if let Some(last) = self.last_candle() {
            if candle.timestamp <= last.timestamp {
                let kind = if candle.timestamp == last.timestamp {
                    "duplicate"
                } else {
                    "out-of-order"
                };
                return Err(EngineError::data(
                    &self.symbol,
                    format!(
                        "{} candle at {} (last {})",
                        kind, candle.timestamp, last.timestamp
                    ),
                ));
            }
        }

        self.previous = PreviousBar {
            sma_fast: self.sma_fast.current(),
            sma_slow: self.sma_slow.current(),
            histogram: self.macd.current().map(|m| m.histogram),
        };

        if let Some(fast) = self.sma_fast.update(candle.close) {
            self.fast_history.push_back(fast);
            if self.fast_history.len() > self.config.slope_lookback + 1 {
                self.fast_history.pop_front();
            }
        }
        self.sma_slow.update(candle.close);
        self.macd.update(candle.close);
        self.rsi.update(candle.close);
        self.atr.update(&candle);
        self.volume_avg.update(candle.volume);

        self.buffer.push_back(candle);
        if self.buffer.len() > self.config.buffer_capacity {
            self.buffer.pop_front();
        }
        self.candles_seen += 1;
        Ok(())
    }

    fn warming(&self, indicator: &'static str, required: usize) -> EngineError {
        EngineError::Computation {
            indicator,
            available: self.candles_seen,
            required,
        }
    }

    /// Latest snapshot, or the first indicator still warming up.
    pub fn snapshot(&self) -> Result<IndicatorSnapshot> {
        let cfg = &self.config;
        let last = self
            .buffer
            .back()
            .ok_or_else(|| self.warming("candles", 1))?;

        let sma_fast = self
            .sma_fast
            .current()
            .ok_or_else(|| self.warming("sma_fast", cfg.sma_fast_period))?;
        let sma_slow = self
            .sma_slow
            .current()
            .ok_or_else(|| self.warming("sma_slow", cfg.sma_slow_period))?;
        let prev_sma_fast = self
            .previous
            .sma_fast
            .ok_or_else(|| self.warming("sma_fast_prev", cfg.sma_fast_period + 1))?;
        let prev_sma_slow = self
            .previous
            .sma_slow
            .ok_or_else(|| self.warming("sma_slow_prev", cfg.sma_slow_period + 1))?;
        let macd_required = cfg.macd_slow_period + cfg.macd_signal_period - 1;
        let macd = self
            .macd
            .current()
            .ok_or_else(|| self.warming("macd", macd_required))?;
        let prev_macd_histogram = self
            .previous
            .histogram
            .ok_or_else(|| self.warming("macd_prev", macd_required + 1))?;
        let ema_fast = self
            .macd
            .fast_ema()
            .ok_or_else(|| self.warming("ema_fast", cfg.macd_fast_period))?;
        let ema_slow = self
            .macd
            .slow_ema()
            .ok_or_else(|| self.warming("ema_slow", cfg.macd_slow_period))?;
        let rsi = self
            .rsi
            .current()
            .ok_or_else(|| self.warming("rsi", cfg.rsi_period + 1))?;
        let atr = self
            .atr
            .current()
            .ok_or_else(|| self.warming("atr", cfg.atr_period))?;
        let volume_avg = self
            .volume_avg
            .current()
            .ok_or_else(|| self.warming("volume_avg", cfg.volume_period))?;

        if self.fast_history.len() <= cfg.slope_lookback {
            return Err(self.warming("trend_slope", cfg.sma_fast_period + cfg.slope_lookback));
        }
        let trend_slope = match self.fast_history.front() {
            Some(then) if !atr.is_zero() => {
                (sma_fast - *then) / (Decimal::from(cfg.slope_lookback) * atr)
            }
            _ => Decimal::ZERO,
        };

        Ok(IndicatorSnapshot {
            symbol: self.symbol.clone(),
            timestamp: last.timestamp,
            close: last.close,
            volume: last.volume,
            sma_fast,
            sma_slow,
            prev_sma_fast,
            prev_sma_slow,
            ema_fast,
            ema_slow,
            macd: macd.macd,
            macd_signal: macd.signal,
            macd_histogram: macd.histogram,
            prev_macd_histogram,
            rsi,
            atr,
            volume_avg,
            trend_slope,
        })
    }

    pub fn last_candle(&self) -> Option<&Candle> {
        self.buffer.back()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }}
