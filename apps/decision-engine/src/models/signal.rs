//! Analyst signal types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Directional stance of a single analyst signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stance {
    /// Expecting the instrument to rise.
    Bullish,
    /// Expecting the instrument to fall.
    Bearish,
    /// No directional view.
    Neutral,
}

impl Stance {
    /// Numeric sign used by confidence-weighted aggregation.
    #[must_use]
    pub const fn sign(&self) -> Decimal {
        match self {
            Self::Bullish => Decimal::ONE,
            Self::Bearish => Decimal::NEGATIVE_ONE,
            Self::Neutral => Decimal::ZERO,
        }
    }
}

/// One analyst's opinion on one instrument for one run.
///
/// Immutable once produced. A failed or timed-out analyst contributes a
/// [`Signal::neutral`] placeholder so downstream stages never see a gap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Instrument the opinion is about.
    pub instrument: String,
    /// Name of the capability that produced it.
    pub analyst: String,
    /// Directional stance.
    pub stance: Stance,
    /// Confidence in [0, 1]. Zero for degraded (failed) analysts.
    pub confidence: Decimal,
    /// Human-readable reasoning.
    pub rationale: String,
    /// Optional price target carried through to execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_target: Option<Decimal>,
    /// Optional protective stop carried through to execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    /// Supporting metrics (analyst-specific, free-form).
    #[serde(default)]
    pub metrics: serde_json::Value,
}

impl Signal {
    /// Creates a signal, clamping confidence into [0, 1].
    #[must_use]
    pub fn new(
        instrument: impl Into<String>,
        analyst: impl Into<String>,
        stance: Stance,
        confidence: Decimal,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            analyst: analyst.into(),
            stance,
            confidence: confidence.clamp(Decimal::ZERO, Decimal::ONE),
            rationale: rationale.into(),
            price_target: None,
            stop_loss: None,
            metrics: serde_json::Value::Null,
        }
    }

    /// Zero-confidence neutral placeholder for a degraded analyst.
    #[must_use]
    pub fn neutral(
        instrument: impl Into<String>,
        analyst: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(instrument, analyst, Stance::Neutral, Decimal::ZERO, reason)
    }

    /// Attaches supporting metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: serde_json::Value) -> Self {
        self.metrics = metrics;
        self
    }
}
