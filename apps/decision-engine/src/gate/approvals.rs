//! Manual-approval queue.
//!
//! At the MANUAL_APPROVAL level every actionable decision parks here
//! until an operator resolves it or it lapses. Expiry is evaluated
//! lazily at resolve time and swept between runs, so a lapsed decision
//! can never execute.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::Decision;

use super::GateError;

/// Metadata for one parked decision, as shown to operators.
#[derive(Debug, Clone, Serialize)]
pub struct PendingApproval {
    /// Decision waiting for review.
    pub decision_id: String,
    /// Instrument it would trade.
    pub instrument: String,
    /// Action wanted, for the status listing.
    pub summary: String,
    /// When it was parked.
    pub parked_at: DateTime<Utc>,
    /// When it lapses.
    pub expires_at: DateTime<Utc>,
}

/// How a resolve call ended.
#[derive(Debug)]
pub enum ApprovalOutcome {
    /// Approved; the decision should now execute.
    Approved(Decision),
    /// Rejected; the decision is discarded.
    Rejected(Decision),
}

#[derive(Debug)]
struct Parked {
    decision: Decision,
    parked_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Queue of decisions awaiting manual review.
#[derive(Debug)]
pub struct ApprovalQueue {
    expiry: Duration,
    pending: Mutex<HashMap<String, Parked>>,
}

impl ApprovalQueue {
    /// Queue whose entries lapse after `expiry_secs`.
    #[must_use]
    pub fn new(expiry_secs: u64) -> Self {
        Self {
            expiry: Duration::seconds(i64::try_from(expiry_secs).unwrap_or(i64::MAX)),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Park a decision. Returns its expiry deadline.
    pub fn park(&self, decision: Decision) -> DateTime<Utc> {
        let parked_at = Utc::now();
        let expires_at = parked_at + self.expiry;
        self.lock().insert(
            decision.decision_id.clone(),
            Parked {
                decision,
                parked_at,
                expires_at,
            },
        );
        expires_at
    }

    /// Resolve a parked decision.
    ///
    /// # Errors
    ///
    /// [`GateError::ApprovalNotFound`] if nothing is parked under the ID,
    /// [`GateError::ApprovalExpired`] if the entry lapsed before the call.
    pub fn resolve(&self, decision_id: &str, approve: bool) -> Result<ApprovalOutcome, GateError> {
        let mut pending = self.lock();
        let entry = pending
            .remove(decision_id)
            .ok_or_else(|| GateError::ApprovalNotFound {
                decision_id: decision_id.to_string(),
            })?;

        if entry.expires_at <= Utc::now() {
            return Err(GateError::ApprovalExpired {
                decision_id: decision_id.to_string(),
            });
        }

        if approve {
            Ok(ApprovalOutcome::Approved(entry.decision))
        } else {
            Ok(ApprovalOutcome::Rejected(entry.decision))
        }
    }

    /// Remove and return every lapsed decision.
    pub fn sweep_expired(&self) -> Vec<Decision> {
        let now = Utc::now();
        let mut pending = self.lock();
        let lapsed: Vec<String> = pending
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        lapsed
            .into_iter()
            .filter_map(|id| pending.remove(&id))
            .map(|entry| entry.decision)
            .collect()
    }

    /// Snapshot of everything currently parked, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingApproval> {
        let mut entries: Vec<PendingApproval> = self
            .lock()
            .values()
            .map(|entry| PendingApproval {
                decision_id: entry.decision.decision_id.clone(),
                instrument: entry.decision.instrument.clone(),
                summary: format!(
                    "{:?} {} {}",
                    entry.decision.action, entry.decision.quantity, entry.decision.instrument
                ),
                parked_at: entry.parked_at,
                expires_at: entry.expires_at,
            })
            .collect();
        entries.sort_by_key(|e| e.parked_at);
        entries
    }

    /// Number of decisions waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Parked>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
