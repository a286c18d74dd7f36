//! Safety gate configuration.

use serde::{Deserialize, Serialize};

use crate::gate::SafetyLevel;

/// Startup state and timing for the safety gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Safety level the engine starts at.
    #[serde(default = "default_initial_level")]
    pub initial_level: SafetyLevel,
    /// Seconds a decision may wait in the manual-approval queue.
    #[serde(default = "default_approval_expiry")]
    pub approval_expiry_secs: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            initial_level: default_initial_level(),
            approval_expiry_secs: default_approval_expiry(),
        }
    }
}

const fn default_initial_level() -> SafetyLevel {
    SafetyLevel::Simulated
}

const fn default_approval_expiry() -> u64 {
    900 // 15 minutes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_start_simulated() {
        let config = SafetyConfig::default();
        assert_eq!(config.initial_level, SafetyLevel::Simulated);
        assert_eq!(config.approval_expiry_secs, 900);
    }

    #[test]
    fn test_level_parses_from_yaml() {
        let config: SafetyConfig = serde_yaml_bw::from_str(
            "initial_level: MANUAL_APPROVAL\napproval_expiry_secs: 60\n",
        )
        .unwrap();
        assert_eq!(config.initial_level, SafetyLevel::ManualApproval);
        assert_eq!(config.approval_expiry_secs, 60);
    }
}
