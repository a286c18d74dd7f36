//! Run-scoped shared context.
//!
//! One [`RunContext`] exists per run and is dropped with it; nothing in
//! here survives into the next run. Analysts share data through a
//! namespaced map where each capability owns exactly one slot, written
//! once. That single-writer rule is enforced here rather than by
//! convention.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Context errors.
#[derive(Debug, Error)]
pub enum ContextError {
    /// A second write targeted an already-claimed namespace.
    #[error("Namespace '{namespace}' already written for this run")]
    NamespaceTaken {
        /// The contested namespace.
        namespace: String,
    },
}

/// One ordered entry in the run's message log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// Pipeline stage that wrote the entry.
    pub stage: String,
    /// Free-form message.
    pub message: String,
    /// When it was written.
    pub at: DateTime<Utc>,
}

/// Shared state for one pipeline run.
#[derive(Debug)]
pub struct RunContext {
    run_id: String,
    instruments: Vec<String>,
    started_at: DateTime<Utc>,
    log: Mutex<Vec<LogEntry>>,
    data: Mutex<HashMap<String, serde_json::Value>>,
}

impl RunContext {
    /// Fresh context for one run over the given instruments.
    #[must_use]
    pub fn new(instruments: Vec<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            instruments,
            started_at: Utc::now(),
            log: Mutex::new(Vec::new()),
            data: Mutex::new(HashMap::new()),
        }
    }

    /// Unique run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Instruments this run evaluates.
    #[must_use]
    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    /// When the run started.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Append one entry to the ordered message log.
    pub fn log(&self, stage: &str, message: impl Into<String>) {
        self.lock_log().push(LogEntry {
            stage: stage.to_string(),
            message: message.into(),
            at: Utc::now(),
        });
    }

    /// Claim a namespace and store its payload.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::NamespaceTaken`] on a second write to the
    /// same namespace.
    pub fn record(&self, namespace: &str, value: serde_json::Value) -> Result<(), ContextError> {
        let mut data = self.lock_data();
        if data.contains_key(namespace) {
            return Err(ContextError::NamespaceTaken {
                namespace: namespace.to_string(),
            });
        }
        data.insert(namespace.to_string(), value);
        Ok(())
    }

    /// Payload previously recorded under a namespace.
    #[must_use]
    pub fn get(&self, namespace: &str) -> Option<serde_json::Value> {
        self.lock_data().get(namespace).cloned()
    }

    /// Namespaces written so far, sorted for stable output.
    #[must_use]
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock_data().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of the message log in append order.
    #[must_use]
    pub fn messages(&self) -> Vec<LogEntry> {
        self.lock_log().clone()
    }

    fn lock_log(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_data(&self) -> MutexGuard<'_, HashMap<String, serde_json::Value>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_namespace_is_write_once() {
        let ctx = RunContext::new(vec!["AAPL".to_string()]);
        ctx.record("momentum", json!({"AAPL": 1})).unwrap();

        let err = ctx.record("momentum", json!({"AAPL": 2})).unwrap_err();
        assert!(matches!(err, ContextError::NamespaceTaken { .. }));

        // First write survives.
        assert_eq!(ctx.get("momentum"), Some(json!({"AAPL": 1})));
    }

    #[test]
    fn test_log_preserves_order() {
        let ctx = RunContext::new(vec![]);
        ctx.log("analysts", "first");
        ctx.log("risk", "second");
        ctx.log("gate", "third");

        let messages = ctx.messages();
        let texts: Vec<&str> = messages.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_distinct_namespaces_coexist() {
        let ctx = RunContext::new(vec![]);
        ctx.record("momentum", json!(1)).unwrap();
        ctx.record("regime", json!(2)).unwrap();
        assert_eq!(ctx.namespaces(), vec!["momentum", "regime"]);
    }
}
