//! The Status Table: live, in-memory execution state for every known task.
//!
//! Status is deliberately ephemeral — it is rebuilt from persisted task
//! definitions on restart and reload; only definitions and history are
//! durable.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use overseer_store::TaskDefinition;

/// Lifecycle phase of a task's execution slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPhase {
    /// Enabled and waiting for its next due time.
    Idle,
    /// A runner is currently executing the script.
    Running,
    /// Last run exited with code 0.
    Success,
    /// Last run exited with a non-zero code.
    Failed,
    /// Last run could not be executed at all (spawn/I-O failure).
    Exception,
    /// Auto-scheduling is switched off for this task.
    Disabled,
    /// The last run was terminated by an operator (kill/restart/disable).
    Stopped,
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskPhase::Idle => "IDLE",
            TaskPhase::Running => "RUNNING",
            TaskPhase::Success => "SUCCESS",
            TaskPhase::Failed => "FAILED",
            TaskPhase::Exception => "EXCEPTION",
            TaskPhase::Disabled => "DISABLED",
            TaskPhase::Stopped => "STOPPED",
        };
        write!(f, "{s}")
    }
}

impl TaskPhase {
    /// Phases a launched run may legally end in.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskPhase::Success | TaskPhase::Failed | TaskPhase::Exception | TaskPhase::Stopped
        )
    }
}

/// Live status for one task id. One record per known task, mutated only
/// under the table lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub phase: TaskPhase,
    /// Wall-clock start of the current/most recent run.
    pub started_at: Option<String>,
    /// Epoch seconds of the last launch attempt; 0 means never launched,
    /// which makes a fresh task due immediately.
    pub last_run: i64,
    pub last_success: Option<String>,
    pub last_error: Option<String>,
    /// Elapsed seconds of the last completed run.
    pub duration_secs: Option<f64>,
    /// Completed runs (success, failure or exception) since load.
    pub run_count: u32,
    /// OS process id, present only while Running.
    pub pid: Option<u32>,
    /// Bounded tail of the last run's combined output.
    pub recent_output: Vec<String>,
    pub error_detail: Option<String>,
    pub error_timestamp: Option<String>,
}

impl StatusRecord {
    pub fn new(phase: TaskPhase) -> Self {
        Self {
            phase,
            started_at: None,
            last_run: 0,
            last_success: None,
            last_error: None,
            duration_secs: None,
            run_count: 0,
            pid: None,
            recent_output: Vec::new(),
            error_detail: None,
            error_timestamp: None,
        }
    }
}

/// Point-in-time copy of the whole table, ordered by task id so published
/// snapshots are stable.
pub type StatusSnapshot = BTreeMap<String, StatusRecord>;

/// Due check: a task runs when at least `interval_minutes` have elapsed
/// since its last launch attempt.
pub fn is_due(now_epoch: i64, last_run: i64, interval_minutes: u32) -> bool {
    now_epoch - last_run >= interval_minutes as i64 * 60
}

/// Lock-guarded map from task id to [`StatusRecord`].
///
/// Owned by the [`crate::TaskService`]; runners and administrative
/// operations mutate records exclusively through [`StatusTable::upsert`],
/// which holds the lock for the whole read-modify-write.
#[derive(Default)]
pub struct StatusTable {
    inner: Mutex<HashMap<String, StatusRecord>>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<StatusRecord> {
        self.inner.lock().expect("status table poisoned").get(id).cloned()
    }

    /// Atomically mutate (creating if absent, phase Idle) the record for `id`.
    pub fn upsert<F>(&self, id: &str, f: F)
    where
        F: FnOnce(&mut StatusRecord),
    {
        let mut table = self.inner.lock().expect("status table poisoned");
        let rec = table
            .entry(id.to_string())
            .or_insert_with(|| StatusRecord::new(TaskPhase::Idle));
        f(rec);
    }

    pub fn remove(&self, id: &str) {
        self.inner.lock().expect("status table poisoned").remove(id);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let table = self.inner.lock().expect("status table poisoned");
        table.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Reconcile the table with a freshly loaded definition set.
    ///
    /// Entries for removed tasks are dropped, new tasks get a fresh record,
    /// and surviving tasks keep their counters and last outcome. Records in
    /// `running` are left entirely untouched — their runner owns them until
    /// it records a terminal phase.
    pub fn rebuild(&self, defs: &[TaskDefinition], running: &HashSet<String>) {
        let mut table = self.inner.lock().expect("status table poisoned");
        let known: HashSet<&str> = defs.iter().map(|d| d.id.as_str()).collect();
        table.retain(|id, _| known.contains(id.as_str()));

        for def in defs {
            if running.contains(&def.id) {
                continue;
            }
            let rec = table
                .entry(def.id.clone())
                .or_insert_with(|| StatusRecord::new(TaskPhase::Idle));
            if !def.enabled {
                rec.phase = TaskPhase::Disabled;
            } else if rec.phase == TaskPhase::Disabled {
                rec.phase = TaskPhase::Idle;
            }
        }
    }
}
