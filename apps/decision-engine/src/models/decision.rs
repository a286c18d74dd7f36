//! Portfolio decision types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{LimitBreach, RiskVerdict, Stance};

/// Action the portfolio takes on an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeAction {
    /// Increase exposure.
    Buy,
    /// Reduce exposure.
    Sell,
    /// Do nothing.
    Hold,
}

impl TradeAction {
    /// Returns true if the action can produce an order.
    #[must_use]
    pub const fn is_actionable(&self) -> bool {
        matches!(self, Self::Buy | Self::Sell)
    }
}

/// Compact record of one contributing signal, embedded in the decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSummary {
    /// Capability that produced the signal.
    pub analyst: String,
    /// Its stance.
    pub stance: Stance,
    /// Its confidence.
    pub confidence: Decimal,
    /// True if this is a degraded (failure) placeholder.
    pub degraded: bool,
}

/// The single, final action for one instrument in one run.
///
/// Immutable once synthesized; feeds at most one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Unique decision ID (idempotency key at the broker edge).
    pub decision_id: String,
    /// Run that produced this decision.
    pub run_id: String,
    /// Instrument acted on.
    pub instrument: String,
    /// Chosen action.
    pub action: TradeAction,
    /// Quantity in shares (zero for holds).
    pub quantity: Decimal,
    /// Approximate notional at the reference price (zero for holds).
    pub notional: Decimal,
    /// Aggregate confidence behind the action (zero when blocked).
    pub confidence: Decimal,
    /// Aggregated directional score in [-1, 1].
    pub score: Decimal,
    /// Reference price used for sizing, if one was available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_price: Option<Decimal>,
    /// Price target inherited from the strongest contributing signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_target: Option<Decimal>,
    /// Protective stop inherited from the strongest contributing signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    /// Signals that went into the aggregate.
    pub signals: Vec<SignalSummary>,
    /// Risk verdict applied during synthesis.
    pub verdict: RiskVerdict,
    /// Limits that fired during risk evaluation.
    pub breaches: Vec<LimitBreach>,
    /// Why this action was chosen.
    pub rationale: String,
    /// Synthesis timestamp.
    pub created_at: DateTime<Utc>,
}

impl Decision {
    /// Returns true if this decision should reach the execution path.
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        self.action.is_actionable() && self.quantity > Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn make_decision(action: TradeAction, quantity: Decimal) -> Decision {
        Decision {
            decision_id: "d-1".to_string(),
            run_id: "r-1".to_string(),
            instrument: "AAPL".to_string(),
            action,
            quantity,
            notional: dec!(100),
            confidence: dec!(0.5),
            score: dec!(0.25),
            reference_price: Some(dec!(10)),
            price_target: None,
            stop_loss: None,
            signals: vec![],
            verdict: RiskVerdict::Allow,
            breaches: vec![],
            rationale: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_actionable_requires_quantity() {
        assert!(make_decision(TradeAction::Buy, dec!(10)).is_actionable());
        assert!(!make_decision(TradeAction::Buy, Decimal::ZERO).is_actionable());
        assert!(!make_decision(TradeAction::Hold, dec!(10)).is_actionable());
    }
}
