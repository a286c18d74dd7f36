//! Journal persistence configuration.

use serde::{Deserialize, Serialize};

/// Where run history is journaled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Path to the append-only JSONL journal file.
    /// Unset keeps the journal in memory (lost on restart).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}
