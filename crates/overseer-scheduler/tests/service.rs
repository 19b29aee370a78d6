//! End-to-end exercises of the scheduling core against the in-memory store
//! and real subprocesses (`/bin/sh` scripts).

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use overseer_core::config::SchedulerConfig;
use overseer_scheduler::{
    AlertSink, NullPublisher, SchedulerError, TaskPhase, TaskService,
};
use overseer_store::{MemoryStore, TaskDefinition, TaskStore};

/// AlertSink double that records every notification.
#[derive(Default)]
struct RecordingAlerter {
    events: Mutex<Vec<(String, String)>>,
}

impl AlertSink for RecordingAlerter {
    fn notify(&self, alert_type: &str, details: &str) {
        self.events
            .lock()
            .unwrap()
            .push((alert_type.to_string(), details.to_string()));
    }
}

impl RecordingAlerter {
    fn take(&self) -> Vec<(String, String)> {
        self.events.lock().unwrap().clone()
    }
}

fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        poll_interval_secs: 1,
        error_backoff_secs: 1,
        kill_grace_secs: 1,
        output_tail_lines: 10,
        default_interpreter: "/bin/sh".to_string(),
    }
}

struct Harness {
    service: Arc<TaskService>,
    store: Arc<MemoryStore>,
    alerts: Arc<RecordingAlerter>,
    _scripts: TempDir,
    scripts_path: PathBuf,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let alerts = Arc::new(RecordingAlerter::default());
    let service = Arc::new(TaskService::new(
        store.clone() as Arc<dyn TaskStore>,
        Arc::new(NullPublisher),
        alerts.clone(),
        test_config(),
    ));
    let scripts = TempDir::new().unwrap();
    let scripts_path = scripts.path().to_path_buf();
    Harness {
        service,
        store,
        alerts,
        _scripts: scripts,
        scripts_path,
    }
}

impl Harness {
    fn script(&self, name: &str, body: &str) -> String {
        let path = self.scripts_path.join(name);
        std::fs::write(&path, body).unwrap();
        path.to_string_lossy().into_owned()
    }

    async fn add_task(&self, id: &str, body: &str) {
        let script = self.script(&format!("{id}.sh"), body);
        self.store
            .add(&TaskDefinition::new(id, script, 1))
            .await
            .unwrap();
        self.service.reload().await.unwrap();
    }

    /// Poll until `pred` holds on the task's status record.
    async fn wait_for<F>(&self, id: &str, what: &str, pred: F)
    where
        F: Fn(&overseer_scheduler::StatusRecord) -> bool,
    {
        for _ in 0..200 {
            if let Some(rec) = self.service.task_status(id) {
                if pred(&rec) {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("timed out waiting for {what} on task {id}");
    }
}

#[tokio::test]
async fn run_now_records_success_and_history() {
    let h = harness();
    h.add_task("t1", "echo hello\necho world\nexit 0\n").await;

    h.service.run_now("t1").await.unwrap();
    h.wait_for("t1", "SUCCESS", |r| r.phase == TaskPhase::Success).await;

    let rec = h.service.task_status("t1").unwrap();
    assert_eq!(rec.run_count, 1);
    assert!(rec.duration_secs.is_some());
    assert!(rec.last_success.is_some());
    assert!(rec.last_error.is_none());
    assert!(rec.pid.is_none());
    assert!(rec.recent_output.contains(&"hello".to_string()));
    assert!(rec.recent_output.contains(&"world".to_string()));

    let history = h.store.history("t1", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "success");
    assert!(h.alerts.take().is_empty());
}

#[tokio::test]
async fn nonzero_exit_records_failure_and_alert() {
    let h = harness();
    h.add_task("t1", "echo boom\nexit 3\n").await;

    h.service.run_now("t1").await.unwrap();
    h.wait_for("t1", "FAILED", |r| r.phase == TaskPhase::Failed).await;

    let rec = h.service.task_status("t1").unwrap();
    assert_eq!(rec.run_count, 1);
    assert!(rec.last_error.as_deref().unwrap().contains('3'));
    assert!(rec.error_detail.as_deref().unwrap().contains("boom"));
    assert!(rec.error_timestamp.is_some());

    let history = h.store.history("t1", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "failed");

    let alerts = h.alerts.take();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].0, "task_failed");
}

#[tokio::test]
async fn spawn_failure_records_exception() {
    let h = harness();
    let script = h.script("t1.sh", "exit 0\n");
    let mut def = TaskDefinition::new("t1", script, 1);
    def.execute_path = Some("/nonexistent/interpreter".to_string());
    h.store.add(&def).await.unwrap();
    h.service.reload().await.unwrap();

    h.service.run_now("t1").await.unwrap();
    h.wait_for("t1", "EXCEPTION", |r| r.phase == TaskPhase::Exception).await;

    let rec = h.service.task_status("t1").unwrap();
    assert_eq!(rec.run_count, 1);
    assert!(rec.last_error.as_deref().unwrap().contains("spawn failed"));

    let history = h.store.history("t1", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "exception");

    let alerts = h.alerts.take();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].0, "task_exception");
}

#[tokio::test]
async fn second_run_now_is_rejected_while_active() {
    let h = harness();
    h.add_task("t1", "sleep 30\n").await;

    h.service.run_now("t1").await.unwrap();
    h.wait_for("t1", "RUNNING", |r| r.phase == TaskPhase::Running).await;

    let err = h.service.run_now("t1").await.unwrap_err();
    assert!(matches!(err, SchedulerError::AlreadyRunning { .. }));

    h.service.kill("t1").await.unwrap();
    h.wait_for("t1", "STOPPED", |r| r.phase == TaskPhase::Stopped).await;
    // The rejected launch must not have bumped the counter.
    assert_eq!(h.service.task_status("t1").unwrap().run_count, 0);
}

#[tokio::test]
async fn kill_terminates_a_running_task() {
    let h = harness();
    h.add_task("t1", "sleep 30\n").await;

    h.service.run_now("t1").await.unwrap();
    h.wait_for("t1", "RUNNING with pid", |r| {
        r.phase == TaskPhase::Running && r.pid.is_some()
    })
    .await;

    h.service.kill("t1").await.unwrap();
    h.wait_for("t1", "STOPPED", |r| r.phase == TaskPhase::Stopped).await;

    let rec = h.service.task_status("t1").unwrap();
    assert!(rec.pid.is_none());
    assert!(!h.service.is_active("t1"));
    // A stopped run is not a completed run.
    assert_eq!(rec.run_count, 0);
    assert!(h.store.history("t1", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn kill_errors_when_idle_or_unknown() {
    let h = harness();
    h.add_task("t1", "exit 0\n").await;

    assert!(matches!(
        h.service.kill("t1").await,
        Err(SchedulerError::NotRunning { .. })
    ));
    assert!(matches!(
        h.service.kill("ghost").await,
        Err(SchedulerError::TaskNotFound { .. })
    ));
}

#[tokio::test]
async fn scheduler_tick_runs_due_task_exactly_once() {
    let h = harness();
    h.add_task("t1", "exit 0\n").await;

    h.service.start().await.unwrap();
    h.wait_for("t1", "first scheduled run", |r| {
        r.phase == TaskPhase::Success && r.run_count == 1
    })
    .await;

    // The 1-minute interval has not elapsed: further ticks must not rerun.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(h.service.task_status("t1").unwrap().run_count, 1);

    h.service.stop().await;
}

#[tokio::test]
async fn disabled_task_skips_ticks_but_runs_manually() {
    let h = harness();
    h.add_task("t1", "exit 0\n").await;
    h.service.toggle("t1", false).await.unwrap();

    h.service.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let rec = h.service.task_status("t1").unwrap();
    assert_eq!(rec.phase, TaskPhase::Disabled);
    assert_eq!(rec.run_count, 0);

    // Manual runs bypass the enabled gate.
    h.service.run_now("t1").await.unwrap();
    h.wait_for("t1", "manual SUCCESS", |r| r.phase == TaskPhase::Success).await;
    assert_eq!(h.service.task_status("t1").unwrap().run_count, 1);

    h.service.stop().await;
}

#[tokio::test]
async fn restart_cancels_and_relaunches() {
    let h = harness();
    h.add_task("t1", "sleep 30\n").await;

    h.service.run_now("t1").await.unwrap();
    h.wait_for("t1", "RUNNING", |r| r.phase == TaskPhase::Running).await;
    let first_pid = h.service.task_status("t1").unwrap().pid;

    h.service.restart("t1").await.unwrap();
    h.wait_for("t1", "RUNNING again", |r| {
        r.phase == TaskPhase::Running && r.pid.is_some() && r.pid != first_pid
    })
    .await;

    h.service.kill("t1").await.unwrap();
}

#[tokio::test]
async fn remove_cancels_runner_and_drops_status() {
    let h = harness();
    h.add_task("t1", "sleep 30\n").await;

    h.service.run_now("t1").await.unwrap();
    h.wait_for("t1", "RUNNING", |r| r.phase == TaskPhase::Running).await;

    h.service.remove("t1").await.unwrap();
    assert!(h.store.get("t1").await.unwrap().is_none());
    assert!(h.service.task_status("t1").is_none());
    assert!(!h.service.is_active("t1"));
}

#[tokio::test]
async fn add_rejects_duplicate_ids() {
    let h = harness();
    h.add_task("t1", "exit 0\n").await;

    let err = h
        .service
        .add("t1", "other.sh", 5, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Store(overseer_store::StoreError::DuplicateTask { .. })
    ));
}

#[tokio::test]
async fn batch_toggle_reports_partial_failure() {
    let h = harness();
    h.add_task("t1", "exit 0\n").await;

    let ids = vec!["t1".to_string(), "nonexistent".to_string()];
    let outcome = h.service.batch_toggle(&ids, false).await;

    assert_eq!(outcome.success_count, 1);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].task_id, "nonexistent");

    let def = h.store.get("t1").await.unwrap().unwrap();
    assert!(!def.enabled);
}

#[tokio::test]
async fn batch_clear_history_checks_existence() {
    let h = harness();
    h.add_task("t1", "exit 0\n").await;
    h.service.run_now("t1").await.unwrap();
    h.wait_for("t1", "SUCCESS", |r| r.phase == TaskPhase::Success).await;

    let ids = vec!["t1".to_string(), "ghost".to_string()];
    let outcome = h.service.batch_clear_history(&ids).await;
    assert_eq!(outcome.success_count, 1);
    assert_eq!(outcome.failed.len(), 1);
    assert!(h.store.history("t1", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn racing_starts_are_idempotent() {
    let h = harness();
    h.add_task("t1", "exit 0\n").await;

    let (a, b) = tokio::join!(h.service.start(), h.service.start());
    a.unwrap();
    b.unwrap();

    h.wait_for("t1", "scheduled run", |r| {
        r.phase == TaskPhase::Success && r.run_count == 1
    })
    .await;
    // Still a single loop honoring the interval: no duplicate launches.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(h.service.task_status("t1").unwrap().run_count, 1);

    h.service.stop().await;
}

#[tokio::test]
async fn stop_without_start_is_safe() {
    let h = harness();
    h.service.stop().await;
}

#[tokio::test]
async fn stop_cancels_inflight_runners() {
    let h = harness();
    h.add_task("t1", "sleep 30\n").await;

    h.service.run_now("t1").await.unwrap();
    h.wait_for("t1", "RUNNING", |r| r.phase == TaskPhase::Running).await;

    h.service.stop().await;
    h.wait_for("t1", "STOPPED", |r| r.phase == TaskPhase::Stopped).await;
    assert!(!h.service.is_active("t1"));
}
