//! Candidate generation and emitted trading signals

use crate::config::SignalConfig;
use crate::indicators::IndicatorSnapshot;
use crate::regime::{Regime, RegimeState};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Buy,
    Sell,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Buy => "BUY",
            SignalType::Sell => "SELL",
        }
    }

    /// +1 for longs, -1 for shorts
    pub fn sign(&self) -> Decimal {
        match self {
            SignalType::Buy => Decimal::ONE,
            SignalType::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    /// Regime this direction trades with
    pub fn aligned_regime(&self) -> Regime {
        match self {
            SignalType::Buy => Regime::Bull,
            SignalType::Sell => Regime::Bear,
        }
    }

    pub fn opposing_regime(&self) -> Regime {
        match self {
            SignalType::Buy => Regime::Bear,
            SignalType::Sell => Regime::Bull,
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Indicator fact that fired for a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trigger {
    MacdCrossUp,
    MacdCrossDown,
    SmaCrossUp,
    SmaCrossDown,
    RsiOversold,
    RsiOverbought,
}

impl Trigger {
    pub fn describe(&self) -> &'static str {
        match self {
            Trigger::MacdCrossUp => "MACD histogram crossed above zero",
            Trigger::MacdCrossDown => "MACD histogram crossed below zero",
            Trigger::SmaCrossUp => "fast SMA crossed above slow SMA",
            Trigger::SmaCrossDown => "fast SMA crossed below slow SMA",
            Trigger::RsiOversold => "RSI oversold",
            Trigger::RsiOverbought => "RSI overbought",
        }
    }
}

/// Unscored directional proposal. Lives for one pipeline pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSignal {
    pub symbol: String,
    pub direction: SignalType,
    pub triggers: Vec<Trigger>,
    pub snapshot: IndicatorSnapshot,
    pub regime: RegimeState,
}

impl CandidateSignal {
    pub fn reason(&self) -> String {
        let facts: Vec<&str> = self.triggers.iter().map(Trigger::describe).collect();
        format!(
            "{} in {} regime: {}",
            self.direction,
            self.regime.regime,
            facts.join(", ")
        )
    }
}

#[derive(Debug, Clone)]
pub struct SignalGenerator {
    config: SignalConfig,
}

impl SignalGenerator {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    fn bullish_triggers(&self, s: &IndicatorSnapshot) -> Vec<Trigger> {
        let mut triggers = Vec::new();
        if s.prev_macd_histogram <= Decimal::ZERO && s.macd_histogram > Decimal::ZERO {
            triggers.push(Trigger::MacdCrossUp);
        }
        if s.prev_sma_fast <= s.prev_sma_slow && s.sma_fast > s.sma_slow {
            triggers.push(Trigger::SmaCrossUp);
        }
        if s.rsi < self.config.rsi_oversold {
            triggers.push(Trigger::RsiOversold);
        }
        triggers
    }

    fn bearish_triggers(&self, s: &IndicatorSnapshot) -> Vec<Trigger> {
        let mut triggers = Vec::new();
        if s.prev_macd_histogram >= Decimal::ZERO && s.macd_histogram < Decimal::ZERO {
            triggers.push(Trigger::MacdCrossDown);
        }
        if s.prev_sma_fast >= s.prev_sma_slow && s.sma_fast < s.sma_slow {
            triggers.push(Trigger::SmaCrossDown);
        }
        if s.rsi > self.config.rsi_overbought {
            triggers.push(Trigger::RsiOverbought);
        }
        triggers
    }

    /// At most one candidate per candle. Conflicting triggers produce none.
    pub fn generate(
        &self,
        snapshot: &IndicatorSnapshot,
        regime: &RegimeState,
    ) -> Option<CandidateSignal> {
        let bullish = self.bullish_triggers(snapshot);
        let bearish = self.bearish_triggers(snapshot);

        let (direction, triggers) = match (bullish.is_empty(), bearish.is_empty()) {
            (false, true) => (SignalType::Buy, bullish),
            (true, false) => (SignalType::Sell, bearish),
            _ => return None,
        };

        if regime.regime == direction.opposing_regime() {
            return None;
        }

        Some(CandidateSignal {
            symbol: snapshot.symbol.clone(),
            direction,
            triggers,
            snapshot: snapshot.clone(),
            regime: *regime,
        })
    }
}

/// Emitted signal. Levels are fixed here and never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradingSignal {
    /// Monotonic id assigned by the coordinator
    pub signal_id: u64,
    pub symbol: String,
    pub signal_type: SignalType,
    /// Signal confidence (0-100)
    pub confidence: u8,
    pub regime: Regime,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Position size in base units
    pub size: Decimal,
    /// Capital lost if the stop is hit
    pub risk_amount: Decimal,
    pub reason: String,
    /// Timestamp of the candle that produced the signal (ms)
    pub timestamp: i64,
}

/// Emission counters across the engine's lifetime
#[derive(Debug, Default, Clone, Serialize)]
pub struct SignalStats {
    pub total_signals: u64,
    pub buy_signals: u64,
    pub sell_signals: u64,
    pub avg_confidence: Decimal,
    pub last_signal_timestamp: Option<i64>,
}

impl SignalStats {
    pub fn record_signal(&mut self, signal: &TradingSignal) {
        self.total_signals += 1;

        match signal.signal_type {
            SignalType::Buy => self.buy_signals += 1,
            SignalType::Sell => self.sell_signals += 1,
        }

        // Rolling average confidence
        let n = Decimal::from(self.total_signals);
        self.avg_confidence =
            (self.avg_confidence * (n - Decimal::ONE) + Decimal::from(signal.confidence)) / n;

        self.last_signal_timestamp = Some(signal.timestamp);
    }
}
