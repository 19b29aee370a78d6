//! In-process store — the stand-in for an external key-value backend.
//!
//! Keeps everything in `RwLock`-guarded maps. Used for development and as
//! the test double for the scheduler core; data does not survive restarts.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, Utc};

use crate::{
    error::{Result, StoreError},
    types::{HistoryEntry, TaskDefinition, TaskPatch, TIMESTAMP_FMT},
    TaskStore,
};

#[derive(Default)]
pub struct MemoryStore {
    /// Vec keeps creation order stable across `get_all` calls.
    tasks: RwLock<Vec<TaskDefinition>>,
    history: RwLock<HashMap<String, Vec<HistoryEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn get_all(&self) -> Result<Vec<TaskDefinition>> {
        Ok(self.tasks.read().expect("task map poisoned").clone())
    }

    async fn get(&self, id: &str) -> Result<Option<TaskDefinition>> {
        let tasks = self.tasks.read().expect("task map poisoned");
        Ok(tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn add(&self, def: &TaskDefinition) -> Result<()> {
        def.validate()?;
        let mut tasks = self.tasks.write().expect("task map poisoned");
        if tasks.iter().any(|t| t.id == def.id) {
            return Err(StoreError::DuplicateTask { id: def.id.clone() });
        }
        tasks.push(def.clone());
        Ok(())
    }

    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<()> {
        let mut tasks = self.tasks.write().expect("task map poisoned");
        let def = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StoreError::TaskNotFound { id: id.to_string() })?;
        patch.apply(def);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut tasks = self.tasks.write().expect("task map poisoned");
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        if tasks.len() == before {
            return Err(StoreError::TaskNotFound { id: id.to_string() });
        }
        self.history.write().expect("history map poisoned").remove(id);
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let tasks = self.tasks.read().expect("task map poisoned");
        Ok(tasks.iter().any(|t| t.id == id))
    }

    async fn history(&self, id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let history = self.history.read().expect("history map poisoned");
        let entries = history.get(id).map(Vec::as_slice).unwrap_or_default();
        // Stored oldest-first; serve newest-first.
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }

    async fn append_history(&self, id: &str, entry: &HistoryEntry) -> Result<()> {
        let mut history = self.history.write().expect("history map poisoned");
        history.entry(id.to_string()).or_default().push(entry.clone());
        Ok(())
    }

    async fn clear_history(&self, id: &str) -> Result<()> {
        let mut history = self.history.write().expect("history map poisoned");
        history.remove(id);
        Ok(())
    }

    async fn cleanup_old_history(&self, max_age_days: u32) -> Result<u64> {
        let cutoff = Utc::now().naive_utc() - Duration::days(max_age_days as i64);
        let mut removed = 0u64;
        let mut history = self.history.write().expect("history map poisoned");
        for entries in history.values_mut() {
            let before = entries.len();
            entries.retain(|e| {
                NaiveDateTime::parse_from_str(&e.timestamp, TIMESTAMP_FMT)
                    .map(|ts| ts >= cutoff)
                    // Unparseable timestamps are kept rather than destroyed.
                    .unwrap_or(true)
            });
            removed += (before - entries.len()) as u64;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_rejects_duplicate_id() {
        let store = MemoryStore::new();
        let def = TaskDefinition::new("t1", "a.py", 1);
        store.add(&def).await.unwrap();
        let err = store.add(&def).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTask { .. }));
    }

    #[tokio::test]
    async fn history_is_newest_first_and_limited() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let entry = HistoryEntry {
                timestamp: format!("2026-08-0{} 00:00:00", i + 1),
                status: "success".into(),
                message: format!("run {i}"),
            };
            store.append_history("t1", &entry).await.unwrap();
        }
        let got = store.history("t1", 2).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].message, "run 4");
        assert_eq!(got[1].message, "run 3");
    }

    #[tokio::test]
    async fn delete_unknown_id_fails() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.delete("nope").await,
            Err(StoreError::TaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_entries() {
        let store = MemoryStore::new();
        let old = HistoryEntry {
            timestamp: "2020-01-01 00:00:00".into(),
            status: "success".into(),
            message: "ancient".into(),
        };
        let fresh = HistoryEntry::now("success", "recent");
        store.append_history("t1", &old).await.unwrap();
        store.append_history("t1", &fresh).await.unwrap();
        let removed = store.cleanup_old_history(30).await.unwrap();
        assert_eq!(removed, 1);
        let left = store.history("t1", 10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].message, "recent");
    }
}
