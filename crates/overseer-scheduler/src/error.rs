use thiserror::Error;

/// Errors surfaced to callers of administrative operations.
///
/// Execution failures are not errors of the core — they become status and
/// history state instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying task store failure (includes duplicate-id and not-found
    /// definition errors raised by the store itself).
    #[error(transparent)]
    Store(#[from] overseer_store::StoreError),

    /// No task with the given id exists.
    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    /// A runner is already active for this task id.
    #[error("Task already running: {id}")]
    AlreadyRunning { id: String },

    /// The operation requires an active runner but none exists.
    #[error("Task is not running: {id}")]
    NotRunning { id: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
