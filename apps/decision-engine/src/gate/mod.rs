//! Safety gate between decisions and the broker.
//!
//! Every actionable decision passes through exactly one gate dispatch.
//! The gate consults the current [`SafetyLevel`] and either journals the
//! decision without side effects, parks it for manual review, or hands
//! it to the order executor. HALTED is terminal for automation: only an
//! explicit operator clear leaves it, and it re-enters at SIMULATED.

mod approvals;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::BrokerAdapter;
use crate::execution::{ExecError, OrderExecutor};
use crate::journal::{Journal, JournalError, JournalRecord};
use crate::models::{Decision, Order, OrderStatus};
use crate::notify::{EngineEvent, Notifier};

pub use approvals::{ApprovalOutcome, ApprovalQueue, PendingApproval};

/// Progressive autonomy ladder.
///
/// Levels are ordered by blast radius. Escalation moves one rung at a
/// time; HALTED sits outside the ladder and absorbs every transition
/// except an explicit clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyLevel {
    /// Decisions are journaled, nothing reaches a broker.
    Simulated,
    /// Orders go to the paper broker.
    PaperBroker,
    /// Orders park until an operator approves them.
    ManualApproval,
    /// Orders go straight to the live adapter.
    AutoTrading,
    /// Everything is refused until an operator clears the halt.
    Halted,
}

impl SafetyLevel {
    /// Next rung up, or `None` at the top or while halted.
    #[must_use]
    pub const fn escalated(self) -> Option<Self> {
        match self {
            Self::Simulated => Some(Self::PaperBroker),
            Self::PaperBroker => Some(Self::ManualApproval),
            Self::ManualApproval => Some(Self::AutoTrading),
            Self::AutoTrading | Self::Halted => None,
        }
    }

    /// Next rung down, or `None` at the bottom or while halted.
    #[must_use]
    pub const fn de_escalated(self) -> Option<Self> {
        match self {
            Self::AutoTrading => Some(Self::ManualApproval),
            Self::ManualApproval => Some(Self::PaperBroker),
            Self::PaperBroker => Some(Self::Simulated),
            Self::Simulated | Self::Halted => None,
        }
    }

    /// True only for [`SafetyLevel::Halted`].
    #[must_use]
    pub const fn is_halted(self) -> bool {
        matches!(self, Self::Halted)
    }

    /// Wire-format name, matching the serde representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Simulated => "SIMULATED",
            Self::PaperBroker => "PAPER_BROKER",
            Self::ManualApproval => "MANUAL_APPROVAL",
            Self::AutoTrading => "AUTO_TRADING",
            Self::Halted => "HALTED",
        }
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by safety-level transitions and approval handling.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The engine is halted; the operation requires clearing it first.
    #[error("engine is halted: {reason}")]
    Halted {
        /// Why the halt engaged.
        reason: String,
    },

    /// Escalation requested at the top of the ladder.
    #[error("already at the highest safety level ({level})")]
    AtCeiling {
        /// Current level.
        level: SafetyLevel,
    },

    /// De-escalation requested at the bottom of the ladder.
    #[error("already at the lowest safety level ({level})")]
    AtFloor {
        /// Current level.
        level: SafetyLevel,
    },

    /// Clear-halt requested while not halted.
    #[error("engine is not halted")]
    NotHalted,

    /// No parked decision under the given ID.
    #[error("no pending approval for decision '{decision_id}'")]
    ApprovalNotFound {
        /// Decision looked up.
        decision_id: String,
    },

    /// The parked decision lapsed before it was resolved.
    #[error("approval for decision '{decision_id}' expired")]
    ApprovalExpired {
        /// Decision looked up.
        decision_id: String,
    },

    /// The decision was already executed in a previous run.
    #[error("decision '{decision_id}' was already executed")]
    DuplicateDecision {
        /// Offending decision.
        decision_id: String,
    },

    /// Journal write failed while recording gate activity.
    #[error(transparent)]
    Journal(#[from] JournalError),
}

impl From<ExecError> for GateError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::DuplicateDecision { decision_id } => Self::DuplicateDecision { decision_id },
            ExecError::Journal(inner) => Self::Journal(inner),
        }
    }
}

#[derive(Debug)]
struct ControllerState {
    level: SafetyLevel,
    halt_reason: Option<String>,
}

/// Single writer for the current safety level.
///
/// All transitions funnel through this type so the one-way halt
/// invariant cannot be bypassed from another code path.
#[derive(Debug)]
pub struct SafetyController {
    state: RwLock<ControllerState>,
}

impl SafetyController {
    /// Controller starting at `initial`.
    #[must_use]
    pub fn new(initial: SafetyLevel) -> Self {
        Self {
            state: RwLock::new(ControllerState {
                level: initial,
                halt_reason: None,
            }),
        }
    }

    /// Current level.
    #[must_use]
    pub fn current(&self) -> SafetyLevel {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .level
    }

    /// Reason recorded when the halt engaged, if halted.
    #[must_use]
    pub fn halt_reason(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .halt_reason
            .clone()
    }

    /// Move one rung up the ladder.
    ///
    /// # Errors
    ///
    /// [`GateError::Halted`] while halted, [`GateError::AtCeiling`] at
    /// the top.
    pub fn escalate(&self) -> Result<SafetyLevel, GateError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let next = state.level.escalated().ok_or_else(|| {
            if state.level.is_halted() {
                GateError::Halted {
                    reason: state.halt_reason.clone().unwrap_or_default(),
                }
            } else {
                GateError::AtCeiling { level: state.level }
            }
        })?;
        tracing::info!(from = %state.level, to = %next, "Safety level escalated");
        state.level = next;
        Ok(next)
    }

    /// Move one rung down the ladder.
    ///
    /// # Errors
    ///
    /// [`GateError::Halted`] while halted, [`GateError::AtFloor`] at
    /// the bottom.
    pub fn de_escalate(&self) -> Result<SafetyLevel, GateError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let next = state.level.de_escalated().ok_or_else(|| {
            if state.level.is_halted() {
                GateError::Halted {
                    reason: state.halt_reason.clone().unwrap_or_default(),
                }
            } else {
                GateError::AtFloor { level: state.level }
            }
        })?;
        tracing::info!(from = %state.level, to = %next, "Safety level de-escalated");
        state.level = next;
        Ok(next)
    }

    /// Engage the halt. Returns false if already halted; the original
    /// reason is kept in that case.
    pub fn force_halt(&self, reason: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.level.is_halted() {
            return false;
        }
        tracing::error!(from = %state.level, %reason, "Safety level forced to HALTED");
        state.level = SafetyLevel::Halted;
        state.halt_reason = Some(reason.to_string());
        true
    }

    /// Clear the halt. The engine re-enters at SIMULATED regardless of
    /// the level it halted from.
    ///
    /// # Errors
    ///
    /// [`GateError::NotHalted`] when no halt is engaged.
    pub fn clear_halt(&self) -> Result<SafetyLevel, GateError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.level.is_halted() {
            return Err(GateError::NotHalted);
        }
        tracing::warn!("Halt cleared, re-entering at SIMULATED");
        state.level = SafetyLevel::Simulated;
        state.halt_reason = None;
        Ok(SafetyLevel::Simulated)
    }
}

/// What the gate did with a decision.
#[derive(Debug)]
pub enum GateOutcome {
    /// Non-actionable decision, journaled only.
    Held,
    /// SIMULATED level: journaled, no broker involved.
    SimulatedOnly,
    /// Parked for manual review.
    Parked {
        /// Deadline after which the parked decision lapses.
        expires_at: DateTime<Utc>,
    },
    /// Reached the executor; terminal order state attached.
    Executed(Order),
    /// Refused because the engine is halted.
    RefusedHalted,
}

/// Dispatches decisions according to the current safety level.
pub struct SafetyGate<B: BrokerAdapter> {
    controller: Arc<SafetyController>,
    approvals: Arc<ApprovalQueue>,
    executor: Arc<OrderExecutor<B>>,
    journal: Arc<dyn Journal>,
    notifier: Arc<dyn Notifier>,
}

impl<B: BrokerAdapter> SafetyGate<B> {
    /// Gate wired to the shared controller, queue and executor.
    #[must_use]
    pub fn new(
        controller: Arc<SafetyController>,
        approvals: Arc<ApprovalQueue>,
        executor: Arc<OrderExecutor<B>>,
        journal: Arc<dyn Journal>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            controller,
            approvals,
            executor,
            journal,
            notifier,
        }
    }

    /// Route a fresh decision from the pipeline.
    ///
    /// # Errors
    ///
    /// Journal failures and duplicate decisions propagate; broker
    /// failures do not reach here, they end up as a terminal order
    /// state inside [`GateOutcome::Executed`].
    pub async fn dispatch(&self, decision: &Decision) -> Result<GateOutcome, GateError> {
        let level = self.controller.current();
        if level.is_halted() {
            tracing::warn!(
                decision_id = %decision.decision_id,
                instrument = %decision.instrument,
                "Halted engine refused decision"
            );
            return Ok(GateOutcome::RefusedHalted);
        }

        if !decision.is_actionable() {
            return Ok(GateOutcome::Held);
        }

        match level {
            SafetyLevel::Simulated => {
                tracing::info!(
                    decision_id = %decision.decision_id,
                    instrument = %decision.instrument,
                    action = ?decision.action,
                    quantity = %decision.quantity,
                    "Simulated decision, no order placed"
                );
                Ok(GateOutcome::SimulatedOnly)
            }
            SafetyLevel::ManualApproval => {
                let expires_at = self.approvals.park(decision.clone());
                self.journal.append(&JournalRecord::ApprovalParked {
                    decision_id: decision.decision_id.clone(),
                    instrument: decision.instrument.clone(),
                    expires_at,
                    recorded_at: Utc::now(),
                })?;
                self.notifier
                    .notify(&EngineEvent::ApprovalPending {
                        decision_id: decision.decision_id.clone(),
                        instrument: decision.instrument.clone(),
                        expires_at,
                    })
                    .await;
                Ok(GateOutcome::Parked { expires_at })
            }
            SafetyLevel::PaperBroker | SafetyLevel::AutoTrading => {
                self.execute_and_notify(decision).await
            }
            SafetyLevel::Halted => Ok(GateOutcome::RefusedHalted),
        }
    }

    /// Route a decision that an operator approved.
    ///
    /// The level may have changed while the decision was parked. A halt
    /// still refuses it and SIMULATED downgrades it to journal-only;
    /// any broker-backed level executes without re-parking.
    ///
    /// # Errors
    ///
    /// Same as [`SafetyGate::dispatch`].
    pub async fn dispatch_approved(&self, decision: &Decision) -> Result<GateOutcome, GateError> {
        let level = self.controller.current();
        if level.is_halted() {
            tracing::warn!(
                decision_id = %decision.decision_id,
                "Halted engine refused approved decision"
            );
            return Ok(GateOutcome::RefusedHalted);
        }
        if level == SafetyLevel::Simulated {
            tracing::info!(
                decision_id = %decision.decision_id,
                "Approved decision executed as simulation after de-escalation"
            );
            return Ok(GateOutcome::SimulatedOnly);
        }
        self.execute_and_notify(decision).await
    }

    async fn execute_and_notify(&self, decision: &Decision) -> Result<GateOutcome, GateError> {
        let order = self.executor.execute(decision).await?;
        if matches!(order.status, OrderStatus::Rejected | OrderStatus::Failed) {
            self.notifier
                .notify(&EngineEvent::OrderFailed {
                    instrument: order.instrument.clone(),
                    decision_id: order.decision_id.clone(),
                    reason: if order.status_message.is_empty() {
                        "order did not fill".to_string()
                    } else {
                        order.status_message.clone()
                    },
                })
                .await;
        }
        Ok(GateOutcome::Executed(order))
    }
}
