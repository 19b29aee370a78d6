use thiserror::Error;

/// Shared error type. Backend-specific failures live in their own crates
/// (`StoreError`, `SchedulerError`); this only covers concerns owned by
/// `overseer-core` itself.
#[derive(Debug, Error)]
pub enum OverseerError {
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, OverseerError>;
