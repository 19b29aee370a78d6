//! Execution Runner: runs exactly one task to completion as a subprocess.
//!
//! One runner task exists per currently-running task id. The runner is the
//! only writer for that id's status record during its lifetime; the cleanup
//! step at the end of [`execute`] runs on every exit path, including
//! cancellation, so a task is never left in RUNNING after its runner ends.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use overseer_store::types::TIMESTAMP_FMT;
use overseer_store::{HistoryEntry, TaskDefinition};

use crate::service::TaskService;
use crate::status::TaskPhase;

/// Lines of output retained for failure diagnostics.
const ERROR_TAIL_LINES: usize = 20;
/// Hard cap on the in-memory line buffer per run.
const OUTPUT_BUF_LINES: usize = 200;

/// How a single run ended.
enum Outcome {
    /// The process ran and exited with a code.
    Exited { code: i32 },
    /// The process could not be spawned or its output could not be read.
    Faulted { error: String },
    /// An operator cancelled the run (kill/restart/disable/stop).
    Cancelled,
}

/// Top-level runner task body. Spawned detached by the service; must never
/// panic or propagate an error — every failure becomes status state.
pub(crate) async fn execute(svc: Arc<TaskService>, def: TaskDefinition, cancel: CancellationToken) {
    let id = def.id.clone();
    let started = Instant::now();
    let mut output = VecDeque::with_capacity(OUTPUT_BUF_LINES);

    let outcome = run_child(&svc, &def, &cancel, &mut output).await;
    let duration = started.elapsed().as_secs_f64();
    let now_str = Utc::now().format(TIMESTAMP_FMT).to_string();
    let now_epoch = Utc::now().timestamp();
    let tail_lines = svc.cfg.output_tail_lines;

    match outcome {
        Outcome::Exited { code: 0 } => {
            info!(task_id = %id, duration_secs = format!("{duration:.2}"), "task succeeded");
            svc.status.upsert(&id, |rec| {
                rec.phase = TaskPhase::Success;
                rec.last_success = Some(now_str.clone());
                rec.last_run = now_epoch;
                rec.duration_secs = Some(duration);
                rec.run_count += 1;
                rec.recent_output = tail(&output, tail_lines);
            });
            svc.record_history(
                &id,
                HistoryEntry::now("success", format!("completed in {duration:.2}s")),
            )
            .await;
        }

        Outcome::Exited { code } => {
            let error_msg = format!("exit code {code}");
            let mut detail = format!(
                "task failed - script: {}, exit code: {code}",
                def.script_path
            );
            if !output.is_empty() {
                let last: Vec<String> = tail(&output, ERROR_TAIL_LINES);
                detail.push_str("\n\noutput tail:\n");
                detail.push_str(&last.join("\n"));
            }
            warn!(task_id = %id, code, "task failed");
            svc.status.upsert(&id, |rec| {
                rec.phase = TaskPhase::Failed;
                rec.last_error = Some(error_msg.clone());
                rec.last_run = now_epoch;
                rec.duration_secs = Some(duration);
                rec.run_count += 1;
                rec.recent_output = tail(&output, tail_lines);
                rec.error_detail = Some(detail.clone());
                rec.error_timestamp = Some(now_str.clone());
            });
            svc.record_history(&id, HistoryEntry::now("failed", error_msg))
                .await;
            svc.alerts.notify("task_failed", &detail);
        }

        Outcome::Faulted { error } => {
            let detail = format!(
                "task execution error - script: {}, error: {error}",
                def.script_path
            );
            warn!(task_id = %id, %error, "task raised an execution error");
            svc.status.upsert(&id, |rec| {
                rec.phase = TaskPhase::Exception;
                rec.last_error = Some(error.clone());
                rec.last_run = now_epoch;
                rec.duration_secs = Some(duration);
                rec.run_count += 1;
                rec.recent_output.clear();
                rec.error_detail = Some(detail.clone());
                rec.error_timestamp = Some(now_str.clone());
            });
            svc.record_history(&id, HistoryEntry::now("exception", error))
                .await;
            svc.alerts.notify("task_exception", &detail);
        }

        Outcome::Cancelled => {
            info!(task_id = %id, "task stopped by operator");
            svc.status.upsert(&id, |rec| {
                rec.phase = TaskPhase::Stopped;
                rec.last_run = now_epoch;
                rec.recent_output = tail(&output, tail_lines);
            });
        }
    }

    // Guaranteed cleanup, on every path: clear the process handle, leave the
    // active-runner set, tell observers.
    svc.status.upsert(&id, |rec| rec.pid = None);
    svc.finish_runner(&id);
    svc.publish_status();
}

/// Spawn the subprocess and drive it to an [`Outcome`], streaming combined
/// stdout+stderr into `output` line by line.
async fn run_child(
    svc: &TaskService,
    def: &TaskDefinition,
    cancel: &CancellationToken,
    output: &mut VecDeque<String>,
) -> Outcome {
    let interpreter = def
        .execute_path
        .clone()
        .unwrap_or_else(|| svc.cfg.default_interpreter.clone());

    let mut cmd = Command::new(&interpreter);
    cmd.arg(&def.script_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Force UTF-8 output from interpreter-based scripts.
        .env("PYTHONIOENCODING", "utf-8")
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return Outcome::Faulted {
                error: format!("spawn failed ({interpreter} {}): {e}", def.script_path),
            };
        }
    };

    if let Some(pid) = child.id() {
        svc.status.upsert(&def.id, |rec| rec.pid = Some(pid));
        debug!(task_id = %def.id, pid, "subprocess spawned");
    }

    // Merge both pipes into one ordered stream of lines. The drain tasks
    // exit when the child closes its ends; dropping the last sender closes
    // the channel.
    let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
    if let Some(stdout) = child.stdout.take() {
        drain_lines(stdout, line_tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        drain_lines(stderr, line_tx.clone());
    }
    drop(line_tx);

    let tail_lines = svc.cfg.output_tail_lines;
    loop {
        tokio::select! {
            line = line_rx.recv() => match line {
                Some(line) => {
                    if output.len() == OUTPUT_BUF_LINES {
                        output.pop_front();
                    }
                    output.push_back(line.clone());
                    svc.status.upsert(&def.id, |rec| {
                        rec.recent_output = tail(output, tail_lines);
                    });
                    svc.publisher.publish_log_line(&format!("[{}] {line}", def.id));
                }
                // Both pipes closed — the process is exiting.
                None => break,
            },
            _ = cancel.cancelled() => {
                terminate(&mut child, Duration::from_secs(svc.cfg.kill_grace_secs)).await;
                return Outcome::Cancelled;
            }
        }
    }

    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => Outcome::Exited {
                code: status.code().unwrap_or(-1),
            },
            Err(e) => Outcome::Faulted {
                error: format!("wait failed: {e}"),
            },
        },
        _ = cancel.cancelled() => {
            terminate(&mut child, Duration::from_secs(svc.cfg.kill_grace_secs)).await;
            Outcome::Cancelled
        }
    }
}

/// Graceful-then-forceful termination ladder: SIGTERM, bounded grace
/// period, SIGKILL. A process that is already gone counts as terminated.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SIGTERM first so the script gets a chance to clean up.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => {}
        Err(_elapsed) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

/// Forward lines from one pipe into the shared channel on a detached task.
fn drain_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
}

fn tail(buf: &VecDeque<String>, n: usize) -> Vec<String> {
    buf.iter().rev().take(n).rev().cloned().collect()
}
