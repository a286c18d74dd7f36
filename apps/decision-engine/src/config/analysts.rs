//! Analyst capability configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which capabilities run, and their shared tuning knobs.
///
/// Capabilities are selected by name at startup; unknown names fail
/// configuration validation rather than being silently skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalystsConfig {
    /// Capability names to register, in no particular order.
    #[serde(default = "default_enabled")]
    pub enabled: Vec<String>,
    /// Per-capability evaluation timeout, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum capabilities evaluated concurrently.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Price history bars each capability looks back over.
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    /// Trailing return that counts as a momentum entry.
    #[serde(default = "default_momentum_entry_return")]
    pub momentum_entry_return: Decimal,
    /// Deviation-over-dispersion ratio that counts as stretched.
    #[serde(default = "default_reversion_entry_ratio")]
    pub reversion_entry_ratio: Decimal,
    /// Mean absolute daily return below which the regime is calm.
    #[serde(default = "default_calm_volatility")]
    pub calm_volatility: Decimal,
    /// Mean absolute daily return above which the regime is stressed.
    #[serde(default = "default_stressed_volatility")]
    pub stressed_volatility: Decimal,
}

impl Default for AnalystsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            timeout_ms: default_timeout_ms(),
            max_concurrent: default_max_concurrent(),
            lookback: default_lookback(),
            momentum_entry_return: default_momentum_entry_return(),
            reversion_entry_ratio: default_reversion_entry_ratio(),
            calm_volatility: default_calm_volatility(),
            stressed_volatility: default_stressed_volatility(),
        }
    }
}

fn default_enabled() -> Vec<String> {
    vec![
        "momentum".to_string(),
        "mean_reversion".to_string(),
        "regime".to_string(),
    ]
}

const fn default_timeout_ms() -> u64 {
    5_000
}

const fn default_max_concurrent() -> usize {
    4
}

const fn default_lookback() -> usize {
    20
}

const fn default_momentum_entry_return() -> Decimal {
    // 2% trailing return
    Decimal::from_parts(2, 0, 0, false, 2)
}

const fn default_reversion_entry_ratio() -> Decimal {
    Decimal::from_parts(2, 0, 0, false, 0)
}

const fn default_calm_volatility() -> Decimal {
    // 0.8% mean absolute daily move
    Decimal::from_parts(8, 0, 0, false, 3)
}

const fn default_stressed_volatility() -> Decimal {
    // 2% mean absolute daily move
    Decimal::from_parts(2, 0, 0, false, 2)
}
