//! Task management API — everything under /api.
//!
//! Handlers are thin: parse, call the service/store, map errors to HTTP.
//! All domain rules (launch guard, kill semantics, batch partial failure)
//! live in `overseer-scheduler`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use overseer_scheduler::{BatchOutcome, SchedulerError, StatusRecord, TaskPhase};
use overseer_store::{StoreError, TaskDefinition, TaskPatch};

use crate::app::AppState;

type ApiError = (StatusCode, Json<Value>);
type ApiResult<T> = Result<T, ApiError>;

// ── Request / response shapes ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TaskCreate {
    pub id: String,
    pub script_path: String,
    pub interval_minutes: u32,
    #[serde(default)]
    pub execute_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub task_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchToggleRequest {
    pub task_ids: Vec<String>,
    pub enable: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    50
}

/// A task definition merged with its live status, as the API exposes it.
#[derive(Debug, Serialize)]
pub struct TaskView {
    pub id: String,
    pub script_path: String,
    pub interval_minutes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execute_path: Option<String>,
    pub enabled: bool,
    pub status: TaskPhase,
    pub last_success: Option<String>,
    pub last_error: Option<String>,
    /// Epoch seconds of the last launch; absent when the task never ran.
    pub last_run: Option<i64>,
    pub duration: Option<f64>,
    pub run_count: u32,
    pub output: Vec<String>,
    pub error_detail: Option<String>,
    pub error_timestamp: Option<String>,
}

fn task_view(def: TaskDefinition, status: Option<StatusRecord>) -> TaskView {
    let rec = status.unwrap_or_else(|| {
        StatusRecord::new(if def.enabled {
            TaskPhase::Idle
        } else {
            TaskPhase::Disabled
        })
    });
    TaskView {
        id: def.id,
        script_path: def.script_path,
        interval_minutes: def.interval_minutes,
        execute_path: def.execute_path,
        enabled: def.enabled,
        status: rec.phase,
        last_success: rec.last_success,
        last_error: rec.last_error,
        last_run: (rec.last_run != 0).then_some(rec.last_run),
        duration: rec.duration_secs,
        run_count: rec.run_count,
        output: rec.recent_output,
        error_detail: rec.error_detail,
        error_timestamp: rec.error_timestamp,
    }
}

// ── Error mapping ─────────────────────────────────────────────────────────────

fn scheduler_error(e: SchedulerError) -> ApiError {
    let status = match &e {
        SchedulerError::TaskNotFound { .. } => StatusCode::NOT_FOUND,
        SchedulerError::AlreadyRunning { .. } | SchedulerError::NotRunning { .. } => {
            StatusCode::CONFLICT
        }
        SchedulerError::Store(store) => store_status(store),
    };
    (status, Json(json!({ "error": e.to_string() })))
}

fn store_error(e: StoreError) -> ApiError {
    (store_status(&e), Json(json!({ "error": e.to_string() })))
}

fn store_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::TaskNotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::DuplicateTask { .. } | StoreError::InvalidDefinition(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn not_found(id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("Task not found: {id}") })),
    )
}

// ── System status ─────────────────────────────────────────────────────────────

/// GET /api/status — aggregate counts over the live status table.
pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let snapshot = state.service.status_snapshot();
    let running = snapshot
        .values()
        .filter(|r| r.phase == TaskPhase::Running)
        .count();
    let failed = snapshot
        .values()
        .filter(|r| matches!(r.phase, TaskPhase::Failed | TaskPhase::Exception))
        .count();
    let disabled = snapshot
        .values()
        .filter(|r| r.phase == TaskPhase::Disabled)
        .count();

    Json(json!({
        "total_tasks": snapshot.len(),
        "running_tasks": running,
        "failed_tasks": failed,
        "disabled_tasks": disabled,
    }))
}

// ── Task CRUD ─────────────────────────────────────────────────────────────────

/// GET /api/tasks — every definition merged with its live status.
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<TaskView>>> {
    let defs = state.store.get_all().await.map_err(store_error)?;
    let views = defs
        .into_iter()
        .map(|def| {
            let status = state.service.task_status(&def.id);
            task_view(def, status)
        })
        .collect();
    Ok(Json(views))
}

/// POST /api/tasks — create a definition; 201 on success.
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TaskCreate>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let mut def = TaskDefinition::new(&req.id, &req.script_path, req.interval_minutes);
    def.execute_path = req.execute_path.clone();
    def.validate().map_err(store_error)?;

    state
        .service
        .add(&req.id, &req.script_path, req.interval_minutes, req.execute_path)
        .await
        .map_err(scheduler_error)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "task created" })),
    ))
}

/// GET /api/tasks/{id}
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskView>> {
    let def = state
        .store
        .get(&id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| not_found(&id))?;
    let status = state.service.task_status(&id);
    Ok(Json(task_view(def, status)))
}

/// PUT /api/tasks/{id} — partial update; unset fields keep their value.
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult<Json<Value>> {
    if let Some(interval) = patch.interval_minutes {
        if interval < 1 {
            return Err(store_error(StoreError::InvalidDefinition(
                "interval_minutes must be >= 1".into(),
            )));
        }
    }
    state.store.update(&id, &patch).await.map_err(store_error)?;
    state.service.reload().await.map_err(scheduler_error)?;
    Ok(Json(json!({ "message": "task updated" })))
}

/// DELETE /api/tasks/{id} — cancels any active run first.
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.service.remove(&id).await.map_err(scheduler_error)?;
    Ok(Json(json!({ "message": "task deleted" })))
}

// ── Per-task operations ───────────────────────────────────────────────────────

/// POST /api/tasks/{id}/run — immediate launch, bypasses the enabled gate.
pub async fn run_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.service.run_now(&id).await.map_err(scheduler_error)?;
    Ok(Json(json!({ "message": "task started" })))
}

/// POST /api/tasks/{id}/restart
pub async fn restart_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.service.restart(&id).await.map_err(scheduler_error)?;
    Ok(Json(json!({ "message": "task restarted" })))
}

/// POST /api/tasks/{id}/toggle — flip the enabled flag.
pub async fn toggle_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let def = state
        .store
        .get(&id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| not_found(&id))?;
    let enable = !def.enabled;
    state
        .service
        .toggle(&id, enable)
        .await
        .map_err(scheduler_error)?;
    Ok(Json(json!({
        "message": if enable { "task enabled" } else { "task disabled" },
        "enabled": enable,
    })))
}

/// POST /api/tasks/{id}/kill
pub async fn kill_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.service.kill(&id).await.map_err(scheduler_error)?;
    Ok(Json(json!({ "message": "task stopped" })))
}

/// GET /api/tasks/{id}/status — the raw live status record.
pub async fn task_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatusRecord>> {
    if !state.store.exists(&id).await.map_err(store_error)? {
        return Err(not_found(&id));
    }
    let rec = state
        .service
        .task_status(&id)
        .unwrap_or_else(|| StatusRecord::new(TaskPhase::Idle));
    Ok(Json(rec))
}

/// GET /api/tasks/{id}/history?limit=50 — newest first.
pub async fn task_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> ApiResult<Json<Value>> {
    if !state.store.exists(&id).await.map_err(store_error)? {
        return Err(not_found(&id));
    }
    let entries = state
        .store
        .history(&id, q.limit)
        .await
        .map_err(store_error)?;
    Ok(Json(json!(entries)))
}

/// DELETE /api/tasks/{id}/history
pub async fn clear_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.store.exists(&id).await.map_err(store_error)? {
        return Err(not_found(&id));
    }
    state.store.clear_history(&id).await.map_err(store_error)?;
    Ok(Json(json!({ "message": "history cleared" })))
}

// ── Batch operations ──────────────────────────────────────────────────────────

fn batch_response(verb: &str, outcome: BatchOutcome) -> Json<Value> {
    Json(json!({
        "message": format!("{verb} {} task(s)", outcome.success_count),
        "success_count": outcome.success_count,
        "failed": outcome.failed,
    }))
}

/// POST /api/tasks/batch/toggle
pub async fn batch_toggle(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchToggleRequest>,
) -> Json<Value> {
    let outcome = state.service.batch_toggle(&req.task_ids, req.enable).await;
    let verb = if req.enable { "enabled" } else { "disabled" };
    batch_response(verb, outcome)
}

/// POST /api/tasks/batch/run
pub async fn batch_run(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchRequest>,
) -> Json<Value> {
    batch_response("started", state.service.batch_run(&req.task_ids).await)
}

/// POST /api/tasks/batch/delete
pub async fn batch_delete(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchRequest>,
) -> Json<Value> {
    batch_response("deleted", state.service.batch_remove(&req.task_ids).await)
}

/// POST /api/tasks/batch/kill
pub async fn batch_kill(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchRequest>,
) -> Json<Value> {
    batch_response("stopped", state.service.batch_kill(&req.task_ids).await)
}

/// POST /api/tasks/batch/clear-history
pub async fn batch_clear_history(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchRequest>,
) -> Json<Value> {
    batch_response(
        "cleared history for",
        state.service.batch_clear_history(&req.task_ids).await,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_of_a_never_run_task_has_no_last_run() {
        let def = TaskDefinition::new("t1", "job.py", 5);
        let view = task_view(def, None);
        assert_eq!(view.status, TaskPhase::Idle);
        assert!(view.last_run.is_none());
        assert_eq!(view.run_count, 0);
    }

    #[test]
    fn view_of_a_disabled_task_without_status_shows_disabled() {
        let mut def = TaskDefinition::new("t1", "job.py", 5);
        def.enabled = false;
        let view = task_view(def, None);
        assert_eq!(view.status, TaskPhase::Disabled);
    }

    #[test]
    fn error_codes_follow_the_taxonomy() {
        assert_eq!(
            scheduler_error(SchedulerError::TaskNotFound { id: "x".into() }).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            scheduler_error(SchedulerError::AlreadyRunning { id: "x".into() }).0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            scheduler_error(SchedulerError::NotRunning { id: "x".into() }).0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            store_error(StoreError::DuplicateTask { id: "x".into() }).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            store_error(StoreError::TaskNotFound { id: "x".into() }).0,
            StatusCode::NOT_FOUND
        );
    }
}
