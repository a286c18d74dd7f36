//! Decision synthesis configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Tie-break and sizing policy for the decision synthesizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Scores with absolute value at or below this become holds.
    #[serde(default = "default_score_epsilon")]
    pub score_epsilon: Decimal,
    /// Fraction of buying power budgeted to a single full-score trade.
    #[serde(default = "default_trade_budget_fraction")]
    pub trade_budget_fraction: Decimal,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            score_epsilon: default_score_epsilon(),
            trade_budget_fraction: default_trade_budget_fraction(),
        }
    }
}

const fn default_score_epsilon() -> Decimal {
    Decimal::from_parts(5, 0, 0, false, 2)
}

const fn default_trade_budget_fraction() -> Decimal {
    Decimal::from_parts(10, 0, 0, false, 2)
}
