//! The per-run decision pipeline.
//!
//! A run flows one way: analyst signals land in the [`RunContext`],
//! aggregation folds them into one [`AggregateOpinion`] per instrument,
//! the risk engine attaches a verdict, and the synthesizer emits at
//! most one decision per instrument. Stages after the fan-out are
//! strictly sequential; nothing in the pipeline mutates the safety
//! level.

mod aggregate;
mod context;
mod synthesize;

use serde::{Deserialize, Serialize};

pub use aggregate::{AggregateOpinion, aggregate_signals};
pub use context::{ContextError, LogEntry, RunContext};
pub use synthesize::Synthesizer;

/// Terminal outcome of one pipeline run.
///
/// Variants are ordered by severity so outcomes fold with [`Ord::max`]:
/// one blocked instrument outranks any number of degraded analysts, and
/// a halted refusal outranks everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    /// Every stage completed; no analyst degraded, no order failed.
    Success,
    /// The run completed but some analysts degraded or orders failed.
    PartialFailure,
    /// At least one decision was blocked by a hard risk limit.
    BlockedByRisk,
    /// The engine was halted; decisions were refused at the gate.
    HaltedRefusal,
}

impl RunOutcome {
    /// Process exit code for `once` mode.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::PartialFailure => 10,
            Self::BlockedByRisk => 20,
            Self::HaltedRefusal => 30,
        }
    }

    /// Wire-format name, matching the serde representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::PartialFailure => "PARTIAL_FAILURE",
            Self::BlockedByRisk => "BLOCKED_BY_RISK",
            Self::HaltedRefusal => "HALTED_REFUSAL",
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::Success.exit_code(), 0);
        assert_eq!(RunOutcome::PartialFailure.exit_code(), 10);
        assert_eq!(RunOutcome::BlockedByRisk.exit_code(), 20);
        assert_eq!(RunOutcome::HaltedRefusal.exit_code(), 30);
    }

    #[test]
    fn test_severity_ordering_folds_with_max() {
        // A blocked instrument outranks degraded analysts no matter the
        // order the stages report in.
        let outcome = RunOutcome::Success
            .max(RunOutcome::PartialFailure)
            .max(RunOutcome::BlockedByRisk)
            .max(RunOutcome::PartialFailure);
        assert_eq!(outcome, RunOutcome::BlockedByRisk);
        assert_eq!(
            outcome.max(RunOutcome::HaltedRefusal),
            RunOutcome::HaltedRefusal
        );
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&RunOutcome::BlockedByRisk).unwrap();
        assert_eq!(json, "\"BLOCKED_BY_RISK\"");
    }
}
