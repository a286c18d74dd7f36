//! Risk limit configuration.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Thresholds for the ordered risk limit checks.
///
/// Weights are fractions of account equity; a breach of a soft limit
/// scales the trade down, a breach of the drawdown guard blocks it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimitsConfig {
    /// Maximum post-trade weight of a single instrument.
    #[serde(default = "default_max_position_weight")]
    pub max_position_weight: Decimal,
    /// Maximum post-trade weight of a single sector.
    #[serde(default = "default_max_sector_weight")]
    pub max_sector_weight: Decimal,
    /// Minimum aggregate confidence required at full size.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: Decimal,
    /// Maximum tolerated drawdown from peak equity (hard limit).
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: Decimal,
    /// Maximum post-trade Herfindahl concentration of the book.
    #[serde(default = "default_max_concentration")]
    pub max_concentration: Decimal,
    /// Quantity multiplier applied on a scale-down verdict.
    #[serde(default = "default_scale_down_factor")]
    pub scale_down_factor: Decimal,
    /// Instrument to sector mapping used by the sector weight check.
    #[serde(default)]
    pub sectors: HashMap<String, String>,
}

impl RiskLimitsConfig {
    /// Sector for an instrument, or the unclassified bucket.
    #[must_use]
    pub fn sector_of(&self, instrument: &str) -> &str {
        self.sectors
            .get(instrument)
            .map_or(UNCLASSIFIED_SECTOR, String::as_str)
    }
}

impl Default for RiskLimitsConfig {
    fn default() -> Self {
        Self {
            max_position_weight: default_max_position_weight(),
            max_sector_weight: default_max_sector_weight(),
            min_confidence: default_min_confidence(),
            max_drawdown: default_max_drawdown(),
            max_concentration: default_max_concentration(),
            scale_down_factor: default_scale_down_factor(),
            sectors: HashMap::new(),
        }
    }
}

/// Sector bucket for instruments missing from the sector map.
pub const UNCLASSIFIED_SECTOR: &str = "UNCLASSIFIED";

const fn default_max_position_weight() -> Decimal {
    // 10% of equity per instrument
    Decimal::from_parts(10, 0, 0, false, 2)
}

const fn default_max_sector_weight() -> Decimal {
    // 30% of equity per sector
    Decimal::from_parts(30, 0, 0, false, 2)
}

const fn default_min_confidence() -> Decimal {
    // 0.70 aggregate confidence for full size
    Decimal::from_parts(70, 0, 0, false, 2)
}

const fn default_max_drawdown() -> Decimal {
    // 15% peak-to-current drawdown halts new exposure
    Decimal::from_parts(15, 0, 0, false, 2)
}

const fn default_max_concentration() -> Decimal {
    // Herfindahl index above 0.50 is a one- or two-name book
    Decimal::from_parts(50, 0, 0, false, 2)
}

const fn default_scale_down_factor() -> Decimal {
    Decimal::from_parts(50, 0, 0, false, 2)
}
