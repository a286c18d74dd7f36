//! Confidence-weighted signal aggregation.
//!
//! Folds every signal for an instrument into one directional score in
//! [-1, 1]. Degraded analysts contribute zero-confidence neutrals, so
//! they dilute mean confidence without steering the score.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{Signal, SignalSummary, Stance};

/// Folded view of every signal for one instrument in one run.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateOpinion {
    /// Instrument the opinion is about.
    pub instrument: String,
    /// Confidence-weighted directional score in [-1, 1].
    pub score: Decimal,
    /// Mean confidence across contributing signals, degraded included.
    pub confidence: Decimal,
    /// Total confidence mass behind the score.
    pub gross_confidence: Decimal,
    /// Signals that went into the fold.
    pub signals: Vec<Signal>,
}

impl AggregateOpinion {
    /// Compact per-signal records for embedding in a decision.
    #[must_use]
    pub fn summaries(&self) -> Vec<SignalSummary> {
        self.signals
            .iter()
            .map(|signal| SignalSummary {
                analyst: signal.analyst.clone(),
                stance: signal.stance,
                confidence: signal.confidence,
                degraded: is_degraded(signal),
            })
            .collect()
    }

    /// How many signals are degraded placeholders.
    #[must_use]
    pub fn degraded_count(&self) -> usize {
        self.signals.iter().filter(|s| is_degraded(s)).count()
    }

    /// Highest-confidence signal agreeing with the given stance.
    ///
    /// The synthesizer inherits price targets and stops from this
    /// signal when sizing a trade in that direction.
    #[must_use]
    pub fn strongest(&self, stance: Stance) -> Option<&Signal> {
        self.signals
            .iter()
            .filter(|signal| signal.stance == stance)
            .max_by_key(|signal| signal.confidence)
    }
}

/// A degraded analyst is recognizable by its neutral zero-confidence
/// placeholder; see [`Signal::neutral`].
fn is_degraded(signal: &Signal) -> bool {
    signal.stance == Stance::Neutral && signal.confidence.is_zero()
}

/// Folds signals into one opinion.
///
/// `score = Σ(confidence · sign) / Σ(confidence)`; zero total
/// confidence yields a neutral zero score rather than a division.
#[must_use]
pub fn aggregate_signals(instrument: impl Into<String>, signals: Vec<Signal>) -> AggregateOpinion {
    let gross_confidence: Decimal = signals.iter().map(|s| s.confidence).sum();
    let weighted: Decimal = signals
        .iter()
        .map(|s| s.confidence * s.stance.sign())
        .sum();

    let score = if gross_confidence.is_zero() {
        Decimal::ZERO
    } else {
        weighted / gross_confidence
    };

    let confidence = if signals.is_empty() {
        Decimal::ZERO
    } else {
        gross_confidence / Decimal::from(signals.len())
    };

    AggregateOpinion {
        instrument: instrument.into(),
        score,
        confidence,
        gross_confidence,
        signals,
    }
}
