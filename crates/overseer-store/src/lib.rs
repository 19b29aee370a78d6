//! `overseer-store` — persistence for task definitions and execution history.
//!
//! # Overview
//!
//! The scheduler core is agnostic to where task definitions live; it talks
//! to a [`TaskStore`] trait object. Three backends implement the contract:
//!
//! | Backend  | Storage                                      |
//! |----------|----------------------------------------------|
//! | `json`   | Flat JSON files (tasks + history)            |
//! | `sqlite` | Embedded SQLite via rusqlite                 |
//! | `memory` | In-process maps — dev/test and KV stand-in   |
//!
//! All backends enforce the same semantics: `add` rejects duplicate ids,
//! `update`/`delete` fail on unknown ids, history is append-only and
//! queried most-recent-first.

pub mod error;
pub mod json;
pub mod memory;
pub mod sqlite;
pub mod types;

pub use error::{Result, StoreError};
pub use json::JsonStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{HistoryEntry, TaskDefinition, TaskPatch};

use async_trait::async_trait;

/// Uniform load/save/query contract over a task definition backend.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All known task definitions, in stable (insertion/creation) order.
    async fn get_all(&self) -> Result<Vec<TaskDefinition>>;

    /// A single definition, or `None` if the id is unknown.
    async fn get(&self, id: &str) -> Result<Option<TaskDefinition>>;

    /// Persist a new definition. Fails with [`StoreError::DuplicateTask`]
    /// when the id already exists.
    async fn add(&self, def: &TaskDefinition) -> Result<()>;

    /// Merge `patch` into an existing definition field-by-field.
    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<()>;

    /// Remove a definition. Fails with [`StoreError::TaskNotFound`].
    async fn delete(&self, id: &str) -> Result<()>;

    async fn exists(&self, id: &str) -> Result<bool>;

    /// Execution history for a task, newest first, at most `limit` entries.
    async fn history(&self, id: &str, limit: usize) -> Result<Vec<HistoryEntry>>;

    /// Append one immutable history entry for a completed execution.
    async fn append_history(&self, id: &str, entry: &HistoryEntry) -> Result<()>;

    /// Drop all history for a task. A no-op for unknown ids.
    async fn clear_history(&self, id: &str) -> Result<()>;

    /// Remove history entries older than `max_age_days`. Returns the number
    /// of entries removed.
    async fn cleanup_old_history(&self, max_age_days: u32) -> Result<u64>;
}
