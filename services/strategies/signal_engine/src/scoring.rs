//! Confidence scoring
//!
//! Five independent factors, each capped at its configured weight. Every
//! factor is computed as a fraction in `[0, 1]` with exact decimal math and
//! floored to whole points, so the published total is the plain sum of the
//! published components.

use crate::config::{ScoringConfig, SignalConfig};
use crate::performance::SymbolPerformanceHistory;
use crate::regime::Regime;
use crate::signals::{CandidateSignal, SignalType};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScoreBreakdown {
    pub trend: u8,
    pub rsi: u8,
    pub macd: u8,
    pub volume: u8,
    pub history: u8,
}

impl ScoreBreakdown {
    pub fn total(&self) -> u8 {
        self.trend + self.rsi + self.macd + self.volume + self.history
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredSignal {
    pub candidate: CandidateSignal,
    pub breakdown: ScoreBreakdown,
    pub total: u8,
}

fn clamp_unit(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO).min(Decimal::ONE)
}

fn points(weight: u8, fraction: Decimal) -> u8 {
    (Decimal::from(weight) * clamp_unit(fraction))
        .floor()
        .to_u8()
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    config: ScoringConfig,
    rsi_oversold: Decimal,
    rsi_overbought: Decimal,
}

impl ConfidenceScorer {
    pub fn new(config: ScoringConfig, signals: &SignalConfig) -> Self {
        Self {
            config,
            rsi_oversold: signals.rsi_oversold,
            rsi_overbought: signals.rsi_overbought,
        }
    }

    pub fn min_confidence(&self) -> u8 {
        self.config.min_confidence
    }

    pub fn trend_fraction(direction: SignalType, regime: Regime) -> Decimal {
        if regime == direction.aligned_regime() {
            Decimal::ONE
        } else if regime == Regime::Sideways {
            dec!(0.5)
        } else {
            Decimal::ZERO
        }
    }

    pub fn rsi_fraction(&self, direction: SignalType, rsi: Decimal) -> Decimal {
        let (depth, midline_distance) = match direction {
            SignalType::Buy => (self.rsi_oversold - rsi, dec!(50) - rsi),
            SignalType::Sell => (rsi - self.rsi_overbought, rsi - dec!(50)),
        };

        if depth > Decimal::ZERO {
            dec!(0.8) + dec!(0.2) * (depth / self.config.rsi_full_depth).min(Decimal::ONE)
        } else if midline_distance > Decimal::ZERO {
            dec!(0.4) * (midline_distance / dec!(20)).min(Decimal::ONE)
        } else {
            Decimal::ZERO
        }
    }

    pub fn macd_fraction(&self, direction: SignalType, histogram: Decimal) -> Decimal {
        let aligned = histogram * direction.sign();
        if aligned <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        dec!(0.6) + dec!(0.4) * (aligned / self.config.macd_full_scale).min(Decimal::ONE)
    }

    pub fn volume_fraction(&self, volume_ratio: Decimal) -> Decimal {
        clamp_unit((volume_ratio - Decimal::ONE) / (self.config.volume_full_ratio - Decimal::ONE))
    }

    /// Neutral half credit until the symbol has `history_min_trades` closed trades
    pub fn history_fraction(&self, history: Option<&SymbolPerformanceHistory>) -> Decimal {
        let win_rate = history
            .filter(|h| h.trades() >= self.config.history_min_trades)
            .and_then(SymbolPerformanceHistory::win_rate);

        match win_rate {
            Some(rate) => clamp_unit(
                (rate - self.config.history_floor_win_rate)
                    / (self.config.history_full_win_rate - self.config.history_floor_win_rate),
            ),
            None => dec!(0.5),
        }
    }

    pub fn score(
        &self,
        candidate: CandidateSignal,
        history: Option<&SymbolPerformanceHistory>,
    ) -> ScoredSignal {
        let w = self.config.weights;
        let direction = candidate.direction;
        let snapshot = &candidate.snapshot;

        let breakdown = ScoreBreakdown {
            trend: points(w.trend, Self::trend_fraction(direction, candidate.regime.regime)),
            rsi: points(w.rsi, self.rsi_fraction(direction, snapshot.rsi)),
            macd: points(w.macd, self.macd_fraction(direction, snapshot.macd_histogram)),
            volume: points(w.volume, self.volume_fraction(snapshot.volume_ratio())),
            history: points(w.history, self.history_fraction(history)),
        };

        ScoredSignal {
            total: breakdown.total(),
            breakdown,
            candidate,
        }
    }
}
