//! Append-only run journal.
//!
//! Every decision, order, approval transition, halt, and alert is
//! journaled as one self-contained record. The order executor seeds its
//! idempotency ledger from [`Journal::executed_decision_ids`] at
//! startup, which is what makes decision IDs idempotent across
//! restarts.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Decision, Order};
use crate::pipeline::RunOutcome;

/// Journal failures.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Underlying file IO failed.
    #[error("Journal IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded.
    #[error("Journal encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One journal entry. Records are never updated in place; state changes
/// append a new record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalRecord {
    /// A run finished (any outcome).
    RunCompleted {
        /// Run ID.
        run_id: String,
        /// Final outcome.
        outcome: RunOutcome,
        /// Instruments evaluated.
        instruments: Vec<String>,
        /// Analyst invocations that degraded to neutral.
        analyst_failures: u32,
        /// Decisions synthesized.
        decision_count: usize,
        /// Journaling timestamp.
        recorded_at: DateTime<Utc>,
    },
    /// A decision was synthesized.
    DecisionMade {
        /// The full decision.
        decision: Decision,
        /// Journaling timestamp.
        recorded_at: DateTime<Utc>,
    },
    /// An order entered the execution path (first attempt).
    OrderPlaced {
        /// The order as first recorded.
        order: Order,
        /// Journaling timestamp.
        recorded_at: DateTime<Utc>,
    },
    /// An order changed state.
    OrderUpdated {
        /// The order after the change.
        order: Order,
        /// Journaling timestamp.
        recorded_at: DateTime<Utc>,
    },
    /// A decision was parked for manual approval.
    ApprovalParked {
        /// Decision waiting for review.
        decision_id: String,
        /// Instrument, for operators scanning the journal.
        instrument: String,
        /// When the pending approval lapses.
        expires_at: DateTime<Utc>,
        /// Journaling timestamp.
        recorded_at: DateTime<Utc>,
    },
    /// A parked decision was approved or rejected.
    ApprovalResolved {
        /// Decision that was resolved.
        decision_id: String,
        /// True when approved for execution.
        approved: bool,
        /// Journaling timestamp.
        recorded_at: DateTime<Utc>,
    },
    /// A parked decision lapsed unreviewed.
    ApprovalExpired {
        /// Decision that lapsed.
        decision_id: String,
        /// Journaling timestamp.
        recorded_at: DateTime<Utc>,
    },
    /// The engine was forced to HALTED.
    HaltEngaged {
        /// Why.
        reason: String,
        /// Journaling timestamp.
        recorded_at: DateTime<Utc>,
    },
    /// An operator cleared the halt.
    HaltCleared {
        /// Journaling timestamp.
        recorded_at: DateTime<Utc>,
    },
    /// Monitoring alert worth keeping.
    Alert {
        /// Alert text.
        message: String,
        /// Journaling timestamp.
        recorded_at: DateTime<Utc>,
    },
}

/// Append-only journal port.
pub trait Journal: Send + Sync {
    /// Append one record.
    fn append(&self, record: &JournalRecord) -> Result<(), JournalError>;

    /// Decision IDs that have ever reached the execution path.
    /// Seeds the idempotency ledger at startup.
    fn executed_decision_ids(&self) -> Result<Vec<String>, JournalError>;
}

/// In-memory journal. History is lost on restart; used for tests and
/// for running without a journal path configured.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: Mutex<Vec<JournalRecord>>,
}

impl MemoryJournal {
    /// Empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    #[must_use]
    pub fn records(&self) -> Vec<JournalRecord> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JournalRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Journal for MemoryJournal {
    fn append(&self, record: &JournalRecord) -> Result<(), JournalError> {
        self.lock().push(record.clone());
        Ok(())
    }

    fn executed_decision_ids(&self) -> Result<Vec<String>, JournalError> {
        Ok(self
            .lock()
            .iter()
            .filter_map(|record| match record {
                JournalRecord::OrderPlaced { order, .. } => Some(order.decision_id.clone()),
                _ => None,
            })
            .collect())
    }
}

/// Line-delimited JSON journal on disk.
#[derive(Debug)]
pub struct JsonlJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlJournal {
    /// Open (or create) the journal file in append mode.
    ///
    /// # Errors
    ///
    /// Returns a [`JournalError`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

impl Journal for JsonlJournal {
    fn append(&self, record: &JournalRecord) -> Result<(), JournalError> {
        let line = serde_json::to_string(record)?;
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    fn executed_decision_ids(&self) -> Result<Vec<String>, JournalError> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut ids = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            // A torn final line from a crash mid-write is skipped, not fatal.
            match serde_json::from_str::<JournalRecord>(&line) {
                Ok(JournalRecord::OrderPlaced { order, .. }) => ids.push(order.decision_id),
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(%error, "Skipping unreadable journal line");
                }
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use crate::models::{OrderSide, OrderStatus};

    use super::*;

    fn make_order(decision_id: &str) -> Order {
        Order {
            order_id: "o-1".to_string(),
            decision_id: decision_id.to_string(),
            run_id: "r-1".to_string(),
            instrument: "AAPL".to_string(),
            side: OrderSide::Buy,
            quantity: dec!(10),
            status: OrderStatus::Pending,
            broker_order_id: None,
            filled_quantity: dec!(0),
            avg_fill_price: None,
            retry_count: 0,
            status_message: String::new(),
            submitted_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_memory_journal_collects_decision_ids() {
        let journal = MemoryJournal::new();
        journal
            .append(&JournalRecord::OrderPlaced {
                order: make_order("d-1"),
                recorded_at: Utc::now(),
            })
            .unwrap();
        journal
            .append(&JournalRecord::HaltCleared {
                recorded_at: Utc::now(),
            })
            .unwrap();

        assert_eq!(journal.executed_decision_ids().unwrap(), vec!["d-1"]);
        assert_eq!(journal.records().len(), 2);
    }

    #[test]
    fn test_jsonl_journal_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        {
            let journal = JsonlJournal::open(&path).unwrap();
            journal
                .append(&JournalRecord::OrderPlaced {
                    order: make_order("d-1"),
                    recorded_at: Utc::now(),
                })
                .unwrap();
            journal
                .append(&JournalRecord::OrderPlaced {
                    order: make_order("d-2"),
                    recorded_at: Utc::now(),
                })
                .unwrap();
        }

        // A fresh instance (simulated restart) reads the same IDs back.
        let reopened = JsonlJournal::open(&path).unwrap();
        assert_eq!(
            reopened.executed_decision_ids().unwrap(),
            vec!["d-1", "d-2"]
        );
    }

    #[test]
    fn test_jsonl_journal_skips_torn_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        let journal = JsonlJournal::open(&path).unwrap();
        journal
            .append(&JournalRecord::OrderPlaced {
                order: make_order("d-1"),
                recorded_at: Utc::now(),
            })
            .unwrap();

        // Simulate a crash mid-write.
        std::fs::write(
            &path,
            format!(
                "{}\n{{\"kind\":\"ORDER_PLA",
                std::fs::read_to_string(&path).unwrap().trim_end()
            ),
        )
        .unwrap();

        let reopened = JsonlJournal::open(&path).unwrap();
        assert_eq!(reopened.executed_decision_ids().unwrap(), vec!["d-1"]);
    }
}
