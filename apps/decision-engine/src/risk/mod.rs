//! Risk evaluation over a point-in-time portfolio snapshot.
//!
//! The engine runs an ordered list of pure limit predicates against a
//! proposed trade. Soft breaches scale the trade down, the drawdown
//! guard blocks it outright and short-circuits the remaining checks.
//! Verdicts are final; no downstream stage may override a block.

pub mod limits;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::RiskLimitsConfig;
use crate::models::{AccountSnapshot, Position, RiskAssessment, RiskVerdict};

/// Account plus open positions at one instant, with the running peak
/// equity used by the drawdown guard. Never reused across cycles.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSnapshot {
    /// Account state at the snapshot instant.
    pub account: AccountSnapshot,
    /// Open positions at the snapshot instant.
    pub positions: Vec<Position>,
    /// Highest equity observed so far, this snapshot included.
    pub peak_equity: Decimal,
}

impl PortfolioSnapshot {
    /// Builds a snapshot, folding the current equity into the peak.
    #[must_use]
    pub fn new(account: AccountSnapshot, positions: Vec<Position>, prior_peak: Decimal) -> Self {
        let peak_equity = prior_peak.max(account.equity);
        Self {
            account,
            positions,
            peak_equity,
        }
    }

    /// Position held in the instrument, if any.
    #[must_use]
    pub fn position(&self, instrument: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.instrument == instrument)
    }

    /// Signed market value held in the instrument (zero when flat).
    #[must_use]
    pub fn market_value_of(&self, instrument: &str) -> Decimal {
        self.position(instrument)
            .map_or(Decimal::ZERO, |p| p.market_value)
    }

    /// Shares held in the instrument (zero when flat).
    #[must_use]
    pub fn held_quantity(&self, instrument: &str) -> Decimal {
        self.position(instrument)
            .map_or(Decimal::ZERO, |p| p.quantity)
    }

    /// Total absolute exposure across the book.
    #[must_use]
    pub fn gross_exposure(&self) -> Decimal {
        self.positions.iter().map(Position::exposure).sum()
    }

    /// Fractional drawdown from peak equity, zero when at the peak.
    #[must_use]
    pub fn drawdown(&self) -> Decimal {
        if self.peak_equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.peak_equity - self.account.equity) / self.peak_equity).max(Decimal::ZERO)
    }
}

/// A sized trade awaiting a risk verdict.
#[derive(Debug, Clone)]
pub struct TradeProposal {
    /// Instrument to trade.
    pub instrument: String,
    /// Signed notional change in exposure (buys positive).
    pub exposure_delta: Decimal,
    /// Aggregate confidence behind the trade.
    pub confidence: Decimal,
}

/// Runs the ordered limit checks and derives a verdict.
#[derive(Debug, Clone)]
pub struct RiskEngine {
    limits: RiskLimitsConfig,
}

impl RiskEngine {
    /// Engine bound to the configured thresholds.
    #[must_use]
    pub const fn new(limits: RiskLimitsConfig) -> Self {
        Self { limits }
    }

    /// The thresholds this engine enforces.
    #[must_use]
    pub const fn limits(&self) -> &RiskLimitsConfig {
        &self.limits
    }

    /// Evaluates one proposal against the snapshot.
    ///
    /// Check order is fixed: position weight, sector weight, confidence
    /// floor, drawdown guard, concentration. The exposure checks only
    /// apply to exposure-increasing trades (limits gate new risk, they
    /// never impede reduction); the drawdown guard short-circuits the
    /// concentration check when it fires.
    #[must_use]
    pub fn assess(
        &self,
        snapshot: &PortfolioSnapshot,
        proposal: &TradeProposal,
    ) -> RiskAssessment {
        let instrument = proposal.instrument.as_str();
        let delta = proposal.exposure_delta;
        let increases_exposure = delta > Decimal::ZERO;
        let mut breaches = Vec::new();

        if increases_exposure {
            breaches.extend(limits::position_weight(snapshot, instrument, delta, &self.limits));
            breaches.extend(limits::sector_weight(snapshot, instrument, delta, &self.limits));
        }
        breaches.extend(limits::confidence_floor(proposal.confidence, &self.limits));

        if increases_exposure {
            if let Some(hard) = limits::drawdown_guard(snapshot, &self.limits) {
                breaches.push(hard);
                let assessment = RiskAssessment::from_breaches(instrument, delta, breaches);
                tracing::warn!(
                    instrument,
                    verdict = ?assessment.verdict,
                    "Drawdown guard blocked trade"
                );
                return assessment;
            }
            breaches.extend(limits::concentration(snapshot, instrument, delta, &self.limits));
        }

        let assessment = RiskAssessment::from_breaches(instrument, delta, breaches);
        if assessment.verdict != RiskVerdict::Allow {
            tracing::info!(
                instrument,
                verdict = ?assessment.verdict,
                breaches = assessment.breaches.len(),
                "Risk limits fired"
            );
        }
        assessment
    }
}
