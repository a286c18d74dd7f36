//! Pure limit predicates.
//!
//! Each check takes the portfolio snapshot plus a proposed exposure
//! change and returns the breach it found, if any. The same predicates
//! serve the pipeline (proposed trades) and the risk monitor (actual
//! book, zero delta).

use rust_decimal::Decimal;

use crate::config::RiskLimitsConfig;
use crate::models::{LimitBreach, Position};

use super::PortfolioSnapshot;

/// Limit name: single-instrument weight cap.
pub const MAX_POSITION_WEIGHT: &str = "MAX_POSITION_WEIGHT";
/// Limit name: per-sector weight cap.
pub const MAX_SECTOR_WEIGHT: &str = "MAX_SECTOR_WEIGHT";
/// Limit name: aggregate confidence floor.
pub const MIN_CONFIDENCE: &str = "MIN_CONFIDENCE";
/// Limit name: peak-to-current drawdown guard.
pub const MAX_DRAWDOWN: &str = "MAX_DRAWDOWN";
/// Limit name: Herfindahl concentration guard.
pub const MAX_CONCENTRATION: &str = "MAX_CONCENTRATION";

/// Post-trade weight of one instrument against account equity (soft).
#[must_use]
pub fn position_weight(
    snapshot: &PortfolioSnapshot,
    instrument: &str,
    exposure_delta: Decimal,
    limits: &RiskLimitsConfig,
) -> Option<LimitBreach> {
    let post = (snapshot.market_value_of(instrument) + exposure_delta).abs();
    if post.is_zero() {
        return None;
    }
    let equity = snapshot.account.equity;
    if equity <= Decimal::ZERO {
        return Some(LimitBreach::soft(
            MAX_POSITION_WEIGHT,
            format!("account equity {equity} cannot support exposure in {instrument}"),
        ));
    }
    let weight = post / equity;
    (weight > limits.max_position_weight).then(|| {
        LimitBreach::soft(
            MAX_POSITION_WEIGHT,
            format!(
                "{instrument} post-trade weight {:.4} > {}",
                weight, limits.max_position_weight
            ),
        )
    })
}

/// Post-trade weight of the instrument's sector against equity (soft).
#[must_use]
pub fn sector_weight(
    snapshot: &PortfolioSnapshot,
    instrument: &str,
    exposure_delta: Decimal,
    limits: &RiskLimitsConfig,
) -> Option<LimitBreach> {
    let sector = limits.sector_of(instrument);
    let own_post = (snapshot.market_value_of(instrument) + exposure_delta).abs();
    let rest: Decimal = snapshot
        .positions
        .iter()
        .filter(|p| p.instrument != instrument && limits.sector_of(&p.instrument) == sector)
        .map(Position::exposure)
        .sum();
    let post = own_post + rest;
    if post.is_zero() {
        return None;
    }
    let equity = snapshot.account.equity;
    if equity <= Decimal::ZERO {
        return Some(LimitBreach::soft(
            MAX_SECTOR_WEIGHT,
            format!("account equity {equity} cannot support exposure in sector {sector}"),
        ));
    }
    let weight = post / equity;
    (weight > limits.max_sector_weight).then(|| {
        LimitBreach::soft(
            MAX_SECTOR_WEIGHT,
            format!(
                "sector {sector} post-trade weight {:.4} > {}",
                weight, limits.max_sector_weight
            ),
        )
    })
}

/// Aggregate confidence floor for full-size trades (soft).
#[must_use]
pub fn confidence_floor(confidence: Decimal, limits: &RiskLimitsConfig) -> Option<LimitBreach> {
    (confidence < limits.min_confidence).then(|| {
        LimitBreach::soft(
            MIN_CONFIDENCE,
            format!("confidence {confidence} < {}", limits.min_confidence),
        )
    })
}

/// Peak-to-current equity drawdown guard (hard).
#[must_use]
pub fn drawdown_guard(
    snapshot: &PortfolioSnapshot,
    limits: &RiskLimitsConfig,
) -> Option<LimitBreach> {
    let drawdown = snapshot.drawdown();
    (drawdown > limits.max_drawdown).then(|| {
        LimitBreach::hard(
            MAX_DRAWDOWN,
            format!(
                "drawdown {:.4} from peak equity {} > {}",
                drawdown, snapshot.peak_equity, limits.max_drawdown
            ),
        )
    })
}

/// Herfindahl index of post-trade portfolio weights (soft).
///
/// The index is `Σ (exposureᵢ / gross)²` over every post-trade
/// position; 1.0 is a one-name book.
#[must_use]
pub fn concentration(
    snapshot: &PortfolioSnapshot,
    instrument: &str,
    exposure_delta: Decimal,
    limits: &RiskLimitsConfig,
) -> Option<LimitBreach> {
    let mut exposures: Vec<Decimal> = snapshot
        .positions
        .iter()
        .filter(|p| p.instrument != instrument)
        .map(Position::exposure)
        .collect();
    let own_post = (snapshot.market_value_of(instrument) + exposure_delta).abs();
    if !own_post.is_zero() {
        exposures.push(own_post);
    }

    let gross: Decimal = exposures.iter().copied().sum();
    if gross.is_zero() {
        return None;
    }
    let index: Decimal = exposures
        .iter()
        .map(|exposure| {
            let weight = exposure / gross;
            weight * weight
        })
        .sum();

    (index > limits.max_concentration).then(|| {
        LimitBreach::soft(
            MAX_CONCENTRATION,
            format!(
                "post-trade concentration {:.4} > {}",
                index, limits.max_concentration
            ),
        )
    })
}
