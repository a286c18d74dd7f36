//! Account and position state read from a broker.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Instrument held.
    pub instrument: String,
    /// Signed quantity (long positive).
    pub quantity: Decimal,
    /// Average entry price.
    pub avg_entry_price: Decimal,
    /// Current market value, signed like quantity.
    pub market_value: Decimal,
    /// Total cost basis.
    pub cost_basis: Decimal,
    /// Unrealized profit and loss.
    pub unrealized_pnl: Decimal,
}

impl Position {
    /// Absolute exposure this position contributes to the portfolio.
    #[must_use]
    pub fn exposure(&self) -> Decimal {
        self.market_value.abs()
    }
}

/// Point-in-time account state. Never reused across evaluation cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Settled cash.
    pub cash: Decimal,
    /// Cash available for new orders.
    pub buying_power: Decimal,
    /// Total account equity (cash plus position value).
    pub equity: Decimal,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

/// Market session state as reported by a broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketClock {
    /// True while the market is open for trading.
    pub is_open: bool,
    /// Next session open, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_open: Option<DateTime<Utc>>,
    /// Next session close, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_close: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_exposure_is_absolute() {
        let short = Position {
            instrument: "TSLA".to_string(),
            quantity: dec!(-10),
            avg_entry_price: dec!(200),
            market_value: dec!(-2100),
            cost_basis: dec!(2000),
            unrealized_pnl: dec!(-100),
        };
        assert_eq!(short.exposure(), dec!(2100));
    }
}
