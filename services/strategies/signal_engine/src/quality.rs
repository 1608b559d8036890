//! Structural trend/liquidity gate applied independently of confidence

use crate::config::QualityConfig;
use crate::scoring::ScoredSignal;
use rust_decimal::Decimal;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityFailure {
    /// Candidate trades against a strong opposing regime
    OpposingRegime { strength: Decimal },
    /// Volume ratio under the liquidity floor
    LowVolume { ratio: Decimal, min: Decimal },
    /// Candle notional under the liquidity floor
    LowNotional { notional: Decimal, min: Decimal },
    /// ATR as a percentage of the close above the volatility ceiling
    HighVolatility { atr_pct: Decimal, max: Decimal },
}

impl fmt::Display for QualityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityFailure::OpposingRegime { strength } => {
                write!(f, "fights opposing regime (strength {})", strength.round_dp(1))
            }
            QualityFailure::LowVolume { ratio, min } => {
                write!(f, "volume ratio {} below {}", ratio.round_dp(2), min)
            }
            QualityFailure::LowNotional { notional, min } => {
                write!(f, "notional {} below {}", notional.round_dp(2), min)
            }
            QualityFailure::HighVolatility { atr_pct, max } => {
                write!(f, "ATR {}% above {}%", atr_pct.round_dp(2).normalize(), max)
            }
        }
    }
}

/// Empty when the candidate passed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityVerdict {
    pub failures: Vec<QualityFailure>,
}

impl QualityVerdict {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn describe(&self) -> String {
        self.failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone)]
pub struct QualityFilter {
    config: QualityConfig,
}

impl QualityFilter {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Every failing check is reported. The generator already drops
    /// candidates against any opposing regime; the regime check here holds for
    /// scored signals assembled without it.
    pub fn check(&self, scored: &ScoredSignal) -> QualityVerdict {
        let candidate = &scored.candidate;
        let snapshot = &candidate.snapshot;
        let mut failures = Vec::new();

        if candidate.regime.regime == candidate.direction.opposing_regime()
            && candidate.regime.strength >= self.config.strong_regime_strength
        {
            failures.push(QualityFailure::OpposingRegime {
                strength: candidate.regime.strength,
            });
        }

        let ratio = snapshot.volume_ratio();
        if ratio < self.config.min_volume_ratio {
            failures.push(QualityFailure::LowVolume {
                ratio,
                min: self.config.min_volume_ratio,
            });
        }

        let notional = snapshot.notional();
        if !self.config.min_notional.is_zero() && notional < self.config.min_notional {
            failures.push(QualityFailure::LowNotional {
                notional,
                min: self.config.min_notional,
            });
        }

        let atr_pct = snapshot.atr_pct();
        if atr_pct > self.config.max_atr_pct {
            failures.push(QualityFailure::HighVolatility {
                atr_pct,
                max: self.config.max_atr_pct,
            });
        }

        QualityVerdict { failures }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::{Regime, RegimeState};
    use crate::scoring::ScoreBreakdown;
    use crate::signals::tests::snapshot;
    use crate::config::SignalConfig;
    use crate::signals::{CandidateSignal, SignalGenerator, SignalType, Trigger};
    use rust_decimal_macros::dec;

    fn scored(direction: SignalType, regime: Regime, strength: Decimal, volume: Decimal) -> ScoredSignal {
        let mut s = snapshot();
        s.volume = volume;
        ScoredSignal {
            candidate: CandidateSignal {
                symbol: s.symbol.clone(),
                direction,
                triggers: vec![Trigger::MacdCrossUp],
                snapshot: s,
                regime: RegimeState { regime, strength },
            },
            breakdown: ScoreBreakdown::default(),
            total: 100,
        }
    }

    #[test]
    fn test_passes_with_liquidity() {
        let filter = QualityFilter::new(QualityConfig::default());
        let verdict = filter.check(&scored(SignalType::Buy, Regime::Bull, dec!(90), dec!(150)));
        assert!(verdict.passed());
    }

    #[test]
    fn test_strong_opposing_regime_rejected() {
        let filter = QualityFilter::new(QualityConfig::default());
        let verdict = filter.check(&scored(SignalType::Sell, Regime::Bull, dec!(70), dec!(150)));
        assert_eq!(
            verdict.failures,
            vec![QualityFailure::OpposingRegime { strength: dec!(70) }]
        );

        let weak = filter.check(&scored(SignalType::Sell, Regime::Bull, dec!(69), dec!(150)));
        assert!(weak.passed());
    }

    #[test]
    fn test_low_volume_rejected_regardless_of_score() {
        let filter = QualityFilter::new(QualityConfig::default());
        let verdict = filter.check(&scored(SignalType::Buy, Regime::Bull, dec!(90), dec!(110)));
        assert!(!verdict.passed());
        assert!(verdict.describe().contains("volume ratio 1.1 below 1.2"));
    }

    #[test]
    fn test_high_volatility_rejected() {
        let filter = QualityFilter::new(QualityConfig::default());
        let mut wide = scored(SignalType::Buy, Regime::Bull, dec!(90), dec!(150));
        wide.candidate.snapshot.atr = dec!(3.5);
        let verdict = filter.check(&wide);
        assert_eq!(
            verdict.failures,
            vec![QualityFailure::HighVolatility {
                atr_pct: dec!(3.5),
                max: dec!(3)
            }]
        );
        assert_eq!(verdict.describe(), "ATR 3.5% above 3%");

        // Exactly at the ceiling passes
        wide.candidate.snapshot.atr = dec!(3);
        assert!(filter.check(&wide).passed());
    }

    #[test]
    fn test_opposing_regime_guarded_without_generator() {
        let mut s = snapshot();
        s.prev_macd_histogram = dec!(-0.1);
        let bear = RegimeState {
            regime: Regime::Bear,
            strength: dec!(85),
        };
        assert!(SignalGenerator::new(SignalConfig::default())
            .generate(&s, &bear)
            .is_none());

        // The same setup scored by hand still fails the filter
        let filter = QualityFilter::new(QualityConfig::default());
        let verdict = filter.check(&scored(SignalType::Buy, Regime::Bear, dec!(85), dec!(150)));
        assert_eq!(
            verdict.failures,
            vec![QualityFailure::OpposingRegime { strength: dec!(85) }]
        );
    }

    #[test]
    fn test_reports_every_failure() {
        let config = QualityConfig {
            min_notional: dec!(1000000),
            ..QualityConfig::default()
        };
        let mut candidate = scored(SignalType::Buy, Regime::Bear, dec!(100), dec!(50));
        candidate.candidate.snapshot.atr = dec!(5);
        let verdict = QualityFilter::new(config).check(&candidate);
        assert_eq!(verdict.failures.len(), 4);
    }
}
