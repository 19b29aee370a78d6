use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Timestamp format used for history entries and status snapshots.
pub const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// A persisted task definition.
///
/// `id` is the primary key across all backends and immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskDefinition {
    pub id: String,
    /// Path to the script this task executes.
    pub script_path: String,
    /// Minimum minutes between automatic runs (>= 1).
    pub interval_minutes: u32,
    /// Interpreter/binary to invoke; falls back to the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_path: Option<String>,
    /// Disabled tasks are never auto-scheduled but may be run manually.
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

fn bool_true() -> bool {
    true
}

impl TaskDefinition {
    pub fn new(id: impl Into<String>, script_path: impl Into<String>, interval_minutes: u32) -> Self {
        Self {
            id: id.into(),
            script_path: script_path.into(),
            interval_minutes,
            execute_path: None,
            enabled: true,
        }
    }

    /// Reject definitions the scheduler could never run sensibly.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(StoreError::InvalidDefinition("task id is empty".into()));
        }
        if self.script_path.trim().is_empty() {
            return Err(StoreError::InvalidDefinition("script_path is empty".into()));
        }
        if self.interval_minutes < 1 {
            return Err(StoreError::InvalidDefinition(
                "interval_minutes must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Partial update for a task definition. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    pub script_path: Option<String>,
    pub interval_minutes: Option<u32>,
    pub execute_path: Option<String>,
    pub enabled: Option<bool>,
}

impl TaskPatch {
    /// Merge into `def` field-by-field.
    pub fn apply(&self, def: &mut TaskDefinition) {
        if let Some(ref p) = self.script_path {
            def.script_path = p.clone();
        }
        if let Some(m) = self.interval_minutes {
            def.interval_minutes = m;
        }
        if let Some(ref e) = self.execute_path {
            def.execute_path = Some(e.clone());
        }
        if let Some(en) = self.enabled {
            def.enabled = en;
        }
    }
}

/// One immutable record of a completed execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// UTC wall-clock time, `%Y-%m-%d %H:%M:%S`.
    pub timestamp: String,
    /// Outcome: "success", "failed" or "exception".
    pub status: String,
    /// Human-readable summary (duration, exit code, error detail).
    pub message: String,
}

impl HistoryEntry {
    pub fn now(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().format(TIMESTAMP_FMT).to_string(),
            status: status.into(),
            message: message.into(),
        }
    }
}
