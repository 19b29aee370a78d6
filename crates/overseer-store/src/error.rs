use thiserror::Error;

/// Errors that can occur within a task store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A definition with this id already exists.
    #[error("Task already exists: {id}")]
    DuplicateTask { id: String },

    /// No definition with this id exists.
    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    /// The definition failed validation (e.g. interval below 1 minute).
    #[error("Invalid task definition: {0}")]
    InvalidDefinition(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
