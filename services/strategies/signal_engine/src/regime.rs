//! Market regime classification
//!
//! The regime is derived from the fast/slow SMA relationship and the
//! ATR-normalized slope of the fast SMA. A slope at or past `strong_slope`
//! is directional on its own; a slope between `min_slope` and `strong_slope`
//! needs the moving averages to agree. Anything flatter is sideways.

use crate::config::RegimeConfig;
use crate::indicators::IndicatorSnapshot;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Regime {
    Bull,
    Bear,
    Sideways,
}

impl Regime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Bull => "BULL",
            Regime::Bear => "BEAR",
            Regime::Sideways => "SIDEWAYS",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified regime with a 0-100 strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegimeState {
    pub regime: Regime,
    pub strength: Decimal,
}

#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    config: RegimeConfig,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, snapshot: &IndicatorSnapshot) -> RegimeState {
        self.classify_slope(
            snapshot.trend_slope,
            snapshot.sma_fast,
            snapshot.sma_slow,
        )
    }

    /// Classification from the raw inputs, used directly by tests.
    pub fn classify_slope(
        &self,
        slope: Decimal,
        sma_fast: Decimal,
        sma_slow: Decimal,
    ) -> RegimeState {
        let RegimeConfig {
            min_slope,
            strong_slope,
        } = self.config;
        let magnitude = slope.abs();

        let regime = if slope >= strong_slope || (slope >= min_slope && sma_fast > sma_slow) {
            Regime::Bull
        } else if slope <= -strong_slope || (slope <= -min_slope && sma_fast < sma_slow) {
            Regime::Bear
        } else {
            Regime::Sideways
        };

        let strength = match regime {
            Regime::Bull | Regime::Bear => (magnitude / strong_slope).min(Decimal::ONE) * dec!(100),
            Regime::Sideways => (Decimal::ONE - (magnitude / min_slope).min(Decimal::ONE)) * dec!(100),
        };

        RegimeState { regime, strength }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn classifier() -> RegimeClassifier {
        RegimeClassifier::new(RegimeConfig::default())
    }

    #[test]
    fn test_flat_slope_is_sideways() {
        let state = classifier().classify_slope(dec!(0.01), dec!(101), dec!(100));
        assert_eq!(state.regime, Regime::Sideways);
        assert_eq!(state.strength, dec!(80));
    }

    #[test]
    fn test_moderate_slope_needs_ma_agreement() {
        let c = classifier();
        assert_eq!(
            c.classify_slope(dec!(0.1), dec!(101), dec!(100)).regime,
            Regime::Bull
        );
        assert_eq!(
            c.classify_slope(dec!(0.1), dec!(99), dec!(100)).regime,
            Regime::Sideways
        );
        assert_eq!(
            c.classify_slope(dec!(-0.1), dec!(99), dec!(100)).regime,
            Regime::Bear
        );
    }

    #[test]
    fn test_strong_slope_overrides_ma_relationship() {
        let state = classifier().classify_slope(dec!(-0.3), dec!(101), dec!(100));
        assert_eq!(state.regime, Regime::Bear);
        assert_eq!(state.strength, dec!(100));
    }

    #[test]
    fn test_directional_strength_scales() {
        let state = classifier().classify_slope(dec!(0.125), dec!(101), dec!(100));
        assert_eq!(state.regime, Regime::Bull);
        assert_eq!(state.strength, dec!(50));
    }

    #[test]
    fn test_monotonic_in_slope() {
        let c = classifier();
        let rank = |r: Regime| match r {
            Regime::Bull => 1,
            Regime::Sideways => 0,
            Regime::Bear => -1,
        };

        for (fast, slow) in [(dec!(101), dec!(100)), (dec!(99), dec!(100))] {
            let mut prev = c.classify_slope(dec!(-1), fast, slow);
            for step in -100..=100 {
                let slope = Decimal::from(step) / dec!(100);
                let next = c.classify_slope(slope, fast, slow);
                assert!(rank(next.regime) >= rank(prev.regime));
                if next.regime == prev.regime && next.regime != Regime::Sideways && slope > Decimal::ZERO {
                    assert!(next.strength >= prev.strength);
                }
                prev = next;
            }
        }
    }

    #[test]
    fn test_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&Regime::Sideways).unwrap(),
            "\"SIDEWAYS\""
        );
    }
}
