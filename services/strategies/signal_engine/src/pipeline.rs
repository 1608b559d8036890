//! Per-symbol stage sequencing
//!
//! A `SymbolPipeline` runs ingest → snapshot → classify → generate → score →
//! filter for one symbol. It owns that symbol's indicator state and is driven
//! by exactly one task, so candles for a symbol are processed strictly in
//! order. The risk gate lives with the coordinator.

use crate::candle::Candle;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::indicators::IndicatorEngine;
use crate::performance::SymbolPerformanceHistory;
use crate::quality::{QualityFilter, QualityVerdict};
use crate::regime::{RegimeClassifier, RegimeState};
use crate::scoring::{ConfidenceScorer, ScoredSignal};
use crate::signals::SignalGenerator;
use tracing::debug;

/// Where a candle's pass through the pipeline ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// An indicator still lacks history
    WarmingUp {
        indicator: &'static str,
        available: usize,
        required: usize,
    },
    /// Indicators produced no (or conflicting) triggers
    NoCandidate { regime: RegimeState },
    BelowThreshold { scored: ScoredSignal, min: u8 },
    QualityRejected {
        scored: ScoredSignal,
        verdict: QualityVerdict,
    },
    /// Ready for the risk gate
    Approved { scored: ScoredSignal },
}

#[derive(Debug, Clone)]
pub struct SymbolPipeline {
    indicators: IndicatorEngine,
    classifier: RegimeClassifier,
    generator: SignalGenerator,
    scorer: ConfidenceScorer,
    filter: QualityFilter,
}

impl SymbolPipeline {
    pub fn new(symbol: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            indicators: IndicatorEngine::new(symbol, config.indicators.clone()),
            classifier: RegimeClassifier::new(config.regime.clone()),
            generator: SignalGenerator::new(config.signals.clone()),
            scorer: ConfidenceScorer::new(config.scoring.clone(), &config.signals),
            filter: QualityFilter::new(config.quality.clone()),
        }
    }

    pub fn symbol(&self) -> &str {
        self.indicators.symbol()
    }

    pub fn indicators(&self) -> &IndicatorEngine {
        &self.indicators
    }

    /// Run one candle through every stage up to the risk gate. Only data
    /// errors are returned; warm-up is an outcome, not a failure.
    pub fn process(
        &mut self,
        candle: Candle,
        history: Option<&SymbolPerformanceHistory>,
    ) -> Result<PipelineOutcome> {
        self.indicators.ingest(candle)?;

        let snapshot = match self.indicators.snapshot() {
            Ok(snapshot) => snapshot,
            Err(EngineError::Computation {
                indicator,
                available,
                required,
            }) => {
                return Ok(PipelineOutcome::WarmingUp {
                    indicator,
                    available,
                    required,
                })
            }
            Err(e) => return Err(e),
        };

        let regime = self.classifier.classify(&snapshot);
        debug!(
            symbol = %snapshot.symbol,
            regime = %regime.regime,
            rsi = %snapshot.rsi,
            histogram = %snapshot.macd_histogram,
            slope = %snapshot.trend_slope,
            "Indicators updated"
        );

        let Some(candidate) = self.generator.generate(&snapshot, &regime) else {
            return Ok(PipelineOutcome::NoCandidate { regime });
        };

        let scored = self.scorer.score(candidate, history);
        let min = self.scorer.min_confidence();
        if scored.total < min {
            return Ok(PipelineOutcome::BelowThreshold { scored, min });
        }

        let verdict = self.filter.check(&scored);
        if !verdict.passed() {
            return Ok(PipelineOutcome::QualityRejected { scored, verdict });
        }

        Ok(PipelineOutcome::Approved { scored })
    }
}
