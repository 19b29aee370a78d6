use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use overseer_core::config::OverseerConfig;
use overseer_scheduler::TaskService;
use overseer_store::TaskStore;

use crate::ws::broadcast::EventBroadcaster;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: OverseerConfig,
    pub service: Arc<TaskService>,
    pub store: Arc<dyn TaskStore>,
    pub broadcaster: Arc<EventBroadcaster>,
}

impl AppState {
    pub fn new(
        config: OverseerConfig,
        service: Arc<TaskService>,
        store: Arc<dyn TaskStore>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            config,
            service,
            store,
            broadcaster,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .route("/api/status", get(crate::http::tasks::system_status))
        .route(
            "/api/tasks",
            get(crate::http::tasks::list_tasks).post(crate::http::tasks::create_task),
        )
        // Batch routes are registered before the {id} routes so "batch" is
        // never captured as a task id.
        .route(
            "/api/tasks/batch/toggle",
            post(crate::http::tasks::batch_toggle),
        )
        .route("/api/tasks/batch/run", post(crate::http::tasks::batch_run))
        .route(
            "/api/tasks/batch/delete",
            post(crate::http::tasks::batch_delete),
        )
        .route("/api/tasks/batch/kill", post(crate::http::tasks::batch_kill))
        .route(
            "/api/tasks/batch/clear-history",
            post(crate::http::tasks::batch_clear_history),
        )
        .route(
            "/api/tasks/{id}",
            get(crate::http::tasks::get_task)
                .put(crate::http::tasks::update_task)
                .delete(crate::http::tasks::delete_task),
        )
        .route("/api/tasks/{id}/run", post(crate::http::tasks::run_task))
        .route(
            "/api/tasks/{id}/restart",
            post(crate::http::tasks::restart_task),
        )
        .route(
            "/api/tasks/{id}/toggle",
            post(crate::http::tasks::toggle_task),
        )
        .route("/api/tasks/{id}/kill", post(crate::http::tasks::kill_task))
        .route(
            "/api/tasks/{id}/status",
            get(crate::http::tasks::task_status),
        )
        .route(
            "/api/tasks/{id}/history",
            get(crate::http::tasks::task_history).delete(crate::http::tasks::clear_history),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
