//! JSON file backend.
//!
//! Task definitions live in one JSON array file; history lives in a sibling
//! `<stem>_history.json` keyed by task id. All reads and writes serialize
//! through a single async mutex, which is the file-level consistency
//! guarantee the core relies on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, Utc};
use tokio::sync::Mutex;
use tracing::warn;

use crate::{
    error::{Result, StoreError},
    types::{HistoryEntry, TaskDefinition, TaskPatch, TIMESTAMP_FMT},
    TaskStore,
};

pub struct JsonStore {
    tasks_path: PathBuf,
    history_path: PathBuf,
    /// Guards every load-modify-save cycle on both files.
    lock: Mutex<()>,
}

impl JsonStore {
    /// `tasks_path` is created on first write; its parent directory is
    /// created eagerly.
    pub fn new(tasks_path: impl Into<PathBuf>) -> Result<Self> {
        let tasks_path = tasks_path.into();
        if let Some(parent) = tasks_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stem = tasks_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("tasks");
        let history_path = tasks_path.with_file_name(format!("{stem}_history.json"));
        Ok(Self {
            tasks_path,
            history_path,
            lock: Mutex::new(()),
        })
    }

    fn load_tasks(&self) -> Result<Vec<TaskDefinition>> {
        load_json_or_default(&self.tasks_path)
    }

    fn save_tasks(&self, tasks: &[TaskDefinition]) -> Result<()> {
        save_json(&self.tasks_path, tasks)
    }

    fn load_history(&self) -> Result<HashMap<String, Vec<HistoryEntry>>> {
        load_json_or_default(&self.history_path)
    }

    fn save_history(&self, history: &HashMap<String, Vec<HistoryEntry>>) -> Result<()> {
        save_json(&self.history_path, history)
    }
}

fn load_json_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(&raw)?)
}

fn save_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value)?;
    std::fs::write(path, raw)?;
    Ok(())
}

#[async_trait]
impl TaskStore for JsonStore {
    async fn get_all(&self) -> Result<Vec<TaskDefinition>> {
        let _guard = self.lock.lock().await;
        self.load_tasks()
    }

    async fn get(&self, id: &str) -> Result<Option<TaskDefinition>> {
        let _guard = self.lock.lock().await;
        Ok(self.load_tasks()?.into_iter().find(|t| t.id == id))
    }

    async fn add(&self, def: &TaskDefinition) -> Result<()> {
        def.validate()?;
        let _guard = self.lock.lock().await;
        let mut tasks = self.load_tasks()?;
        if tasks.iter().any(|t| t.id == def.id) {
            return Err(StoreError::DuplicateTask { id: def.id.clone() });
        }
        tasks.push(def.clone());
        self.save_tasks(&tasks)
    }

    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut tasks = self.load_tasks()?;
        let def = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StoreError::TaskNotFound { id: id.to_string() })?;
        patch.apply(def);
        self.save_tasks(&tasks)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut tasks = self.load_tasks()?;
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        if tasks.len() == before {
            return Err(StoreError::TaskNotFound { id: id.to_string() });
        }
        self.save_tasks(&tasks)?;

        // Drop the orphaned history too; a failure here is not fatal.
        match self.load_history() {
            Ok(mut history) => {
                if history.remove(id).is_some() {
                    self.save_history(&history)?;
                }
            }
            Err(e) => warn!(task_id = %id, "history cleanup on delete failed: {e}"),
        }
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        Ok(self.load_tasks()?.iter().any(|t| t.id == id))
    }

    async fn history(&self, id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let _guard = self.lock.lock().await;
        let history = self.load_history()?;
        let entries = history.get(id).map(Vec::as_slice).unwrap_or_default();
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }

    async fn append_history(&self, id: &str, entry: &HistoryEntry) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut history = self.load_history()?;
        history.entry(id.to_string()).or_default().push(entry.clone());
        self.save_history(&history)
    }

    async fn clear_history(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut history = self.load_history()?;
        if history.remove(id).is_some() {
            self.save_history(&history)?;
        }
        Ok(())
    }

    async fn cleanup_old_history(&self, max_age_days: u32) -> Result<u64> {
        let _guard = self.lock.lock().await;
        let cutoff = Utc::now().naive_utc() - Duration::days(max_age_days as i64);
        let mut history = self.load_history()?;
        let mut removed = 0u64;
        for entries in history.values_mut() {
            let before = entries.len();
            entries.retain(|e| {
                NaiveDateTime::parse_from_str(&e.timestamp, TIMESTAMP_FMT)
                    .map(|ts| ts >= cutoff)
                    .unwrap_or(true)
            });
            removed += (before - entries.len()) as u64;
        }
        if removed > 0 {
            self.save_history(&history)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> JsonStore {
        JsonStore::new(dir.path().join("tasks.json")).unwrap()
    }

    #[tokio::test]
    async fn tasks_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = store_in(&dir);
            store.add(&TaskDefinition::new("t1", "a.py", 5)).await.unwrap();
        }
        let store = store_in(&dir);
        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "t1");
        assert_eq!(all[0].interval_minutes, 5);
    }

    #[tokio::test]
    async fn update_merges_partial_fields() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.add(&TaskDefinition::new("t1", "a.py", 5)).await.unwrap();
        let patch = TaskPatch {
            enabled: Some(false),
            ..Default::default()
        };
        store.update("t1", &patch).await.unwrap();
        let def = store.get("t1").await.unwrap().unwrap();
        assert!(!def.enabled);
        assert_eq!(def.script_path, "a.py");
    }

    #[tokio::test]
    async fn delete_removes_task_and_history() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.add(&TaskDefinition::new("t1", "a.py", 5)).await.unwrap();
        store
            .append_history("t1", &HistoryEntry::now("success", "ok"))
            .await
            .unwrap();
        store.delete("t1").await.unwrap();
        assert!(!store.exists("t1").await.unwrap());
        assert!(store.history("t1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.get_all().await.unwrap().is_empty());
        assert!(store.get("t1").await.unwrap().is_none());
    }
}
