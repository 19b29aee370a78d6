//! The scheduling core: poll loop, launch guard, administrative operations.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use overseer_core::config::SchedulerConfig;
use overseer_store::{HistoryEntry, TaskDefinition, TaskPatch, TaskStore};

use crate::error::{Result, SchedulerError};
use crate::observe::{AlertSink, StatusPublisher};
use crate::runner;
use crate::status::{is_due, StatusTable, TaskPhase};

/// How long administrative kill/restart wait for a cancelled runner to
/// finish its termination ladder, on top of the configured grace period.
const CANCEL_WAIT_MARGIN_SECS: u64 = 2;

/// One entry per in-flight execution. Insertion is the launch guard:
/// check-and-insert happens under the map lock, so two racing launches for
/// the same id can never both win.
struct RunnerHandle {
    cancel: CancellationToken,
}

/// Per-id result of a batch operation. Partial failure is expected and
/// reported per item, never as an all-or-nothing transaction.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub task_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct BatchOutcome {
    pub success_count: usize,
    pub failed: Vec<BatchFailure>,
}

impl BatchOutcome {
    fn record<T>(&mut self, id: &str, result: Result<T>) {
        match result {
            Ok(_) => self.success_count += 1,
            Err(e) => self.failed.push(BatchFailure {
                task_id: id.to_string(),
                error: e.to_string(),
            }),
        }
    }
}

/// Owns the status table and the set of in-flight runners; drives the
/// periodic scan and serves administrative operations.
pub struct TaskService {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) status: StatusTable,
    pub(crate) publisher: Arc<dyn StatusPublisher>,
    pub(crate) alerts: Arc<dyn AlertSink>,
    pub(crate) cfg: SchedulerConfig,
    running: Mutex<HashMap<String, RunnerHandle>>,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        publisher: Arc<dyn StatusPublisher>,
        alerts: Arc<dyn AlertSink>,
        cfg: SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            status: StatusTable::new(),
            publisher,
            alerts,
            cfg,
            running: Mutex::new(HashMap::new()),
            shutdown_tx,
            loop_handle: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Load definitions, initialise the status table and start the poll
    /// loop. Calling it again while the loop is alive is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.reload().await?;

        // Check-and-spawn under one lock so two racing starts can never
        // both launch a poll loop. The extra reload of a losing caller is
        // harmless (reload is idempotent).
        {
            let mut handle = self.loop_handle.lock().expect("loop handle poisoned");
            if handle.as_ref().is_some_and(|h| !h.is_finished()) {
                warn!("scheduler already started");
                return Ok(());
            }
            let svc = Arc::clone(self);
            let shutdown_rx = self.shutdown_tx.subscribe();
            *handle = Some(tokio::spawn(run_loop(svc, shutdown_rx)));
        }
        info!("task service started");
        Ok(())
    }

    /// Stop the poll loop and cancel every in-flight runner. Safe to call
    /// even if `start` never ran.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);

        let ids: Vec<String> = {
            let running = self.running.lock().expect("runner map poisoned");
            for handle in running.values() {
                handle.cancel.cancel();
            }
            running.keys().cloned().collect()
        };
        for id in &ids {
            info!(task_id = %id, "task stopped during shutdown");
        }

        let handle = self.loop_handle.lock().expect("loop handle poisoned").take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("scheduler loop did not stop within 5s");
            }
        }

        self.wait_all_stopped().await;
        info!("task service stopped");
    }

    /// Re-read definitions and reconcile the status table. Running entries
    /// are preserved untouched; removed tasks drop out; toggled tasks flip
    /// between IDLE and DISABLED.
    pub async fn reload(&self) -> Result<()> {
        let defs = self.store.get_all().await?;
        let running: HashSet<String> = {
            let map = self.running.lock().expect("runner map poisoned");
            map.keys().cloned().collect()
        };
        self.status.rebuild(&defs, &running);
        self.publish_status();
        info!(count = defs.len(), "task definitions loaded");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Launch path (shared by the scan and run_now)
    // -----------------------------------------------------------------------

    /// Atomic launch guard + RUNNING transition + detached runner spawn.
    fn launch(self: &Arc<Self>, def: TaskDefinition) -> Result<()> {
        let cancel = CancellationToken::new();
        {
            let mut running = self.running.lock().expect("runner map poisoned");
            if running.contains_key(&def.id) {
                return Err(SchedulerError::AlreadyRunning { id: def.id.clone() });
            }
            running.insert(def.id.clone(), RunnerHandle { cancel: cancel.clone() });
        }

        let now_str = Utc::now().format(overseer_store::types::TIMESTAMP_FMT).to_string();
        let now_epoch = Utc::now().timestamp();
        self.status.upsert(&def.id, |rec| {
            rec.phase = TaskPhase::Running;
            rec.started_at = Some(now_str);
            rec.last_run = now_epoch;
            rec.last_error = None;
            rec.error_detail = None;
            rec.error_timestamp = None;
            rec.recent_output.clear();
        });
        self.publish_status();
        info!(task_id = %def.id, script = %def.script_path, "task launched");

        tokio::spawn(runner::execute(Arc::clone(self), def, cancel));
        Ok(())
    }

    /// One scan: launch every enabled, due task that has no active runner.
    async fn scan_due(self: &Arc<Self>) -> Result<()> {
        let defs = self.store.get_all().await?;
        let now = Utc::now().timestamp();

        for def in defs {
            if !def.enabled {
                continue;
            }
            let last_run = self.status.get(&def.id).map(|r| r.last_run).unwrap_or(0);
            if !is_due(now, last_run, def.interval_minutes) {
                continue;
            }
            match self.launch(def) {
                Ok(()) => {}
                Err(SchedulerError::AlreadyRunning { id }) => {
                    debug!(task_id = %id, "due task skipped: previous run still active");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Administrative operations
    // -----------------------------------------------------------------------

    /// Launch a task immediately, bypassing the enabled gate. Errors when
    /// the id is unknown or a run is already active.
    pub async fn run_now(self: &Arc<Self>, id: &str) -> Result<()> {
        let def = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| SchedulerError::TaskNotFound { id: id.to_string() })?;
        self.launch(def)
    }

    /// Cancel any active run, then launch anew.
    pub async fn restart(self: &Arc<Self>, id: &str) -> Result<()> {
        let cancel = self.cancel_token(id);
        if let Some(cancel) = cancel {
            cancel.cancel();
            self.wait_stopped(id).await;
        }
        self.run_now(id).await
    }

    /// Persist the enabled flag. Disabling also terminates an active run.
    pub async fn toggle(self: &Arc<Self>, id: &str, enable: bool) -> Result<()> {
        if self.store.get(id).await?.is_none() {
            return Err(SchedulerError::TaskNotFound { id: id.to_string() });
        }
        let patch = TaskPatch {
            enabled: Some(enable),
            ..Default::default()
        };
        self.store.update(id, &patch).await?;

        if !enable {
            if let Some(cancel) = self.cancel_token(id) {
                cancel.cancel();
                self.wait_stopped(id).await;
            }
        }
        self.reload().await
    }

    /// Terminate a running task (graceful, then forceful after the grace
    /// period). A process that already exited on its own counts as killed.
    pub async fn kill(self: &Arc<Self>, id: &str) -> Result<()> {
        if !self.store.exists(id).await? {
            return Err(SchedulerError::TaskNotFound { id: id.to_string() });
        }

        match self.cancel_token(id) {
            Some(cancel) => {
                cancel.cancel();
                if !self.wait_stopped(id).await {
                    warn!(task_id = %id, "runner still winding down after kill wait");
                }
                Ok(())
            }
            None => {
                // No active runner. A stale RUNNING phase means the process
                // vanished between the caller's check and ours — normalize it.
                match self.status.get(id).map(|r| r.phase) {
                    Some(TaskPhase::Running) => {
                        self.status.upsert(id, |rec| {
                            rec.phase = TaskPhase::Stopped;
                            rec.pid = None;
                        });
                        self.publish_status();
                        Ok(())
                    }
                    _ => Err(SchedulerError::NotRunning { id: id.to_string() }),
                }
            }
        }
    }

    /// Persist a new definition (enabled by default) and reload.
    pub async fn add(
        self: &Arc<Self>,
        id: &str,
        script_path: &str,
        interval_minutes: u32,
        execute_path: Option<String>,
    ) -> Result<()> {
        let mut def = TaskDefinition::new(id, script_path, interval_minutes);
        def.execute_path = execute_path;
        self.store.add(&def).await?;
        self.reload().await
    }

    /// Cancel any active run, delete the definition, reload.
    pub async fn remove(self: &Arc<Self>, id: &str) -> Result<()> {
        if let Some(cancel) = self.cancel_token(id) {
            cancel.cancel();
            self.wait_stopped(id).await;
        }
        self.store.delete(id).await?;
        self.reload().await
    }

    // -----------------------------------------------------------------------
    // Batch variants — per-id success/failure, never all-or-nothing
    // -----------------------------------------------------------------------

    pub async fn batch_toggle(self: &Arc<Self>, ids: &[String], enable: bool) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for id in ids {
            let result = self.toggle(id, enable).await;
            outcome.record(id, result);
        }
        outcome
    }

    pub async fn batch_run(self: &Arc<Self>, ids: &[String]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for id in ids {
            let result = self.run_now(id).await;
            outcome.record(id, result);
        }
        outcome
    }

    pub async fn batch_remove(self: &Arc<Self>, ids: &[String]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for id in ids {
            let result = self.remove(id).await;
            outcome.record(id, result);
        }
        outcome
    }

    pub async fn batch_kill(self: &Arc<Self>, ids: &[String]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for id in ids {
            let result = self.kill(id).await;
            outcome.record(id, result);
        }
        outcome
    }

    pub async fn batch_clear_history(self: &Arc<Self>, ids: &[String]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for id in ids {
            let result = async {
                if !self.store.exists(id).await? {
                    return Err(SchedulerError::TaskNotFound { id: id.to_string() });
                }
                self.store.clear_history(id).await?;
                Ok(())
            }
            .await;
            outcome.record(id, result);
        }
        outcome
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn status_snapshot(&self) -> crate::status::StatusSnapshot {
        self.status.snapshot()
    }

    pub fn task_status(&self, id: &str) -> Option<crate::status::StatusRecord> {
        self.status.get(id)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.running.lock().expect("runner map poisoned").contains_key(id)
    }

    // -----------------------------------------------------------------------
    // Internal helpers (also used by the runner)
    // -----------------------------------------------------------------------

    pub(crate) fn publish_status(&self) {
        self.publisher.publish_status(&self.status.snapshot());
    }

    /// Append a history entry; store failures must not disturb in-memory
    /// state, so they are logged and dropped.
    pub(crate) async fn record_history(&self, id: &str, entry: HistoryEntry) {
        if let Err(e) = self.store.append_history(id, &entry).await {
            error!(task_id = %id, "history append failed: {e}");
        }
    }

    /// Runner cleanup: leave the active set.
    pub(crate) fn finish_runner(&self, id: &str) {
        self.running.lock().expect("runner map poisoned").remove(id);
    }

    fn cancel_token(&self, id: &str) -> Option<CancellationToken> {
        let running = self.running.lock().expect("runner map poisoned");
        running.get(id).map(|h| h.cancel.clone())
    }

    /// Wait (bounded by grace + margin) for the runner of `id` to leave the
    /// active set. Returns true when it did.
    async fn wait_stopped(&self, id: &str) -> bool {
        let deadline = Duration::from_secs(self.cfg.kill_grace_secs + CANCEL_WAIT_MARGIN_SECS);
        let poll = Duration::from_millis(50);
        let mut waited = Duration::ZERO;
        while waited < deadline {
            if !self.is_active(id) {
                return true;
            }
            tokio::time::sleep(poll).await;
            waited += poll;
        }
        !self.is_active(id)
    }

    async fn wait_all_stopped(&self) {
        let deadline = Duration::from_secs(self.cfg.kill_grace_secs + CANCEL_WAIT_MARGIN_SECS);
        let poll = Duration::from_millis(50);
        let mut waited = Duration::ZERO;
        while waited < deadline {
            let empty = self.running.lock().expect("runner map poisoned").is_empty();
            if empty {
                return;
            }
            tokio::time::sleep(poll).await;
            waited += poll;
        }
        warn!("some runners were still active at shutdown deadline");
    }
}


/// Main poll loop. Scans every `poll_interval_secs` until shutdown; a scan
/// error is logged and followed by a short backoff, never a loop exit.
async fn run_loop(svc: Arc<TaskService>, mut shutdown: watch::Receiver<bool>) {
    info!(
        interval_secs = svc.cfg.poll_interval_secs,
        "scheduler loop started"
    );
    let mut interval = tokio::time::interval(Duration::from_secs(svc.cfg.poll_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = svc.scan_due().await {
                    error!("scheduler scan error: {e}");
                    tokio::time::sleep(Duration::from_secs(svc.cfg.error_backoff_secs)).await;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("scheduler loop shutting down");
                    break;
                }
            }
        }
    }
}
