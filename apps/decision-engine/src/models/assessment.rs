//! Risk assessment types produced by the limit checks.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome of risk evaluation for one proposed trade.
///
/// A `Block` verdict is final: no downstream stage may override it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskVerdict {
    /// Trade may proceed at the proposed size.
    Allow,
    /// Trade may proceed at a reduced size.
    ScaleDown,
    /// Trade must not execute.
    Block,
}

impl RiskVerdict {
    /// Returns true if the verdict forbids execution outright.
    #[must_use]
    pub const fn is_block(&self) -> bool {
        matches!(self, Self::Block)
    }

    /// Returns true if the trade may reach a broker in some size.
    #[must_use]
    pub const fn permits_trade(&self) -> bool {
        matches!(self, Self::Allow | Self::ScaleDown)
    }
}

/// One breached limit, with enough detail to reconstruct the check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitBreach {
    /// Stable name of the limit (e.g. `MAX_POSITION_WEIGHT`).
    pub limit: String,
    /// Hard breaches force a `Block` verdict.
    pub hard: bool,
    /// Human-readable detail (observed vs configured values).
    pub detail: String,
}

impl LimitBreach {
    /// Creates a soft (scale-down) breach.
    #[must_use]
    pub fn soft(limit: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            limit: limit.into(),
            hard: false,
            detail: detail.into(),
        }
    }

    /// Creates a hard (blocking) breach.
    #[must_use]
    pub fn hard(limit: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            limit: limit.into(),
            hard: true,
            detail: detail.into(),
        }
    }
}

/// Risk evaluation result for one instrument in one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Instrument under evaluation.
    pub instrument: String,
    /// Proposed change in exposure, signed notional (buys positive).
    pub exposure_delta: Decimal,
    /// Every limit that fired, in check order.
    pub breaches: Vec<LimitBreach>,
    /// Final verdict derived from the breaches.
    pub verdict: RiskVerdict,
}

impl RiskAssessment {
    /// Assessment with no breaches.
    #[must_use]
    pub fn clean(instrument: impl Into<String>, exposure_delta: Decimal) -> Self {
        Self {
            instrument: instrument.into(),
            exposure_delta,
            breaches: Vec::new(),
            verdict: RiskVerdict::Allow,
        }
    }

    /// Derives the verdict from a set of breaches: any hard breach blocks,
    /// any soft breach scales down, otherwise the trade is allowed.
    #[must_use]
    pub fn from_breaches(
        instrument: impl Into<String>,
        exposure_delta: Decimal,
        breaches: Vec<LimitBreach>,
    ) -> Self {
        let verdict = if breaches.iter().any(|b| b.hard) {
            RiskVerdict::Block
        } else if breaches.is_empty() {
            RiskVerdict::Allow
        } else {
            RiskVerdict::ScaleDown
        };
        Self {
            instrument: instrument.into(),
            exposure_delta,
            breaches,
            verdict,
        }
    }
}
