//! Continuous-mode scheduler configuration.

use serde::{Deserialize, Serialize};

/// Run cadence and instrument universe for continuous mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between scheduled runs.
    #[serde(default = "default_run_interval_secs")]
    pub run_interval_secs: u64,
    /// Instruments evaluated each run.
    #[serde(default)]
    pub instruments: Vec<String>,
    /// Skip runs while the market is closed.
    #[serde(default)]
    pub market_hours_only: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            run_interval_secs: default_run_interval_secs(),
            instruments: Vec::new(),
            market_hours_only: false,
        }
    }
}

const fn default_run_interval_secs() -> u64 {
    300 // 5 minutes
}
