//! Market data configuration.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Price series for the in-process market data source.
///
/// Values are daily closes, oldest first. A live deployment replaces
/// this source behind the same port.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketDataConfig {
    /// Instrument to close-price series.
    #[serde(default)]
    pub series: HashMap<String, Vec<Decimal>>,
}
