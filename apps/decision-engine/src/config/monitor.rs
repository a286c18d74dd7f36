//! Risk monitor configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Cadence and thresholds for the independent risk monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between monitoring cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Consecutive failed cycles before the engine is halted.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Minimum cash the account must keep (liquidity floor).
    #[serde(default = "default_min_cash")]
    pub min_cash: Decimal,
    /// Equity samples kept for the trailing drawdown window.
    #[serde(default = "default_equity_window")]
    pub equity_window: usize,
    /// Drop from the trailing window's high that forces a halt.
    ///
    /// Tighter than the all-time drawdown limit: a fast slide inside the
    /// window halts before the peak-based limit would notice.
    #[serde(default = "default_max_window_drawdown")]
    pub max_window_drawdown: Decimal,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            failure_threshold: default_failure_threshold(),
            min_cash: default_min_cash(),
            equity_window: default_equity_window(),
            max_window_drawdown: default_max_window_drawdown(),
        }
    }
}

const fn default_interval_secs() -> u64 {
    30
}

const fn default_failure_threshold() -> u32 {
    3
}

const fn default_min_cash() -> Decimal {
    Decimal::from_parts(10_000, 0, 0, false, 0)
}

const fn default_equity_window() -> usize {
    // ~2.4 hours of samples at the default cadence
    288
}

const fn default_max_window_drawdown() -> Decimal {
    // 0.05
    Decimal::from_parts(5, 0, 0, false, 2)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.interval_secs, 30);
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.min_cash, dec!(10000));
        assert_eq!(config.equity_window, 288);
        assert_eq!(config.max_window_drawdown, dec!(0.05));
    }
}
