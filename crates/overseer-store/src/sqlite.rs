//! SQLite backend via rusqlite.
//!
//! The connection lives behind a `Mutex` so the scheduler loop and the
//! admin API serialize through the same handle; SQLite's own transaction
//! semantics cover process-external writers.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::{
    error::{Result, StoreError},
    types::{HistoryEntry, TaskDefinition, TaskPatch, TIMESTAMP_FMT},
    TaskStore,
};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap `conn`, initialising the schema if needed (idempotent).
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::new(conn)
    }
}

/// Initialise the task store schema in `conn`.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
            id               TEXT    NOT NULL PRIMARY KEY,
            script_path      TEXT    NOT NULL,
            interval_minutes INTEGER NOT NULL,
            execute_path     TEXT,
            enabled          INTEGER NOT NULL DEFAULT 1,
            created_at       TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS task_history (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id     TEXT    NOT NULL,
            status      TEXT    NOT NULL,
            message     TEXT    NOT NULL,
            executed_at TEXT    NOT NULL
        ) STRICT;

        -- Newest-first history queries per task.
        CREATE INDEX IF NOT EXISTS idx_history_task
            ON task_history (task_id, executed_at DESC);
        ",
    )?;
    Ok(())
}

fn row_to_def(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskDefinition> {
    Ok(TaskDefinition {
        id: row.get(0)?,
        script_path: row.get(1)?,
        interval_minutes: row.get(2)?,
        execute_path: row.get(3)?,
        enabled: row.get::<_, i64>(4)? != 0,
    })
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn get_all(&self) -> Result<Vec<TaskDefinition>> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let mut stmt = conn.prepare_cached(
            "SELECT id, script_path, interval_minutes, execute_path, enabled
             FROM tasks ORDER BY created_at, id",
        )?;
        let defs = stmt
            .query_map([], row_to_def)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(defs)
    }

    async fn get(&self, id: &str) -> Result<Option<TaskDefinition>> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let def = conn
            .query_row(
                "SELECT id, script_path, interval_minutes, execute_path, enabled
                 FROM tasks WHERE id = ?1",
                [id],
                row_to_def,
            )
            .optional()?;
        Ok(def)
    }

    async fn add(&self, def: &TaskDefinition) -> Result<()> {
        def.validate()?;
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let exists: Option<String> = conn
            .query_row("SELECT id FROM tasks WHERE id = ?1", [&def.id], |r| r.get(0))
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::DuplicateTask { id: def.id.clone() });
        }
        conn.execute(
            "INSERT INTO tasks (id, script_path, interval_minutes, execute_path, enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                def.id,
                def.script_path,
                def.interval_minutes,
                def.execute_path,
                def.enabled as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let mut def = conn
            .query_row(
                "SELECT id, script_path, interval_minutes, execute_path, enabled
                 FROM tasks WHERE id = ?1",
                [id],
                row_to_def,
            )
            .optional()?
            .ok_or_else(|| StoreError::TaskNotFound { id: id.to_string() })?;
        patch.apply(&mut def);
        conn.execute(
            "UPDATE tasks SET script_path = ?1, interval_minutes = ?2,
                              execute_path = ?3, enabled = ?4
             WHERE id = ?5",
            params![
                def.script_path,
                def.interval_minutes,
                def.execute_path,
                def.enabled as i64,
                id,
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let n = conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(StoreError::TaskNotFound { id: id.to_string() });
        }
        conn.execute("DELETE FROM task_history WHERE task_id = ?1", [id])?;
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let found: Option<String> = conn
            .query_row("SELECT id FROM tasks WHERE id = ?1", [id], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    async fn history(&self, id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let mut stmt = conn.prepare_cached(
            "SELECT executed_at, status, message FROM task_history
             WHERE task_id = ?1 ORDER BY executed_at DESC, id DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![id, limit as i64], |row| {
                Ok(HistoryEntry {
                    timestamp: row.get(0)?,
                    status: row.get(1)?,
                    message: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    async fn append_history(&self, id: &str, entry: &HistoryEntry) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        conn.execute(
            "INSERT INTO task_history (task_id, status, message, executed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, entry.status, entry.message, entry.timestamp],
        )?;
        Ok(())
    }

    async fn clear_history(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        conn.execute("DELETE FROM task_history WHERE task_id = ?1", [id])?;
        Ok(())
    }

    async fn cleanup_old_history(&self, max_age_days: u32) -> Result<u64> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let cutoff = (Utc::now() - Duration::days(max_age_days as i64))
            .format(TIMESTAMP_FMT)
            .to_string();
        let n = conn.execute(
            "DELETE FROM task_history WHERE executed_at < ?1",
            [&cutoff],
        )?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn add_get_roundtrip() {
        let s = store();
        let mut def = TaskDefinition::new("t1", "a.py", 5);
        def.execute_path = Some("/usr/bin/python3".into());
        s.add(&def).await.unwrap();
        let got = s.get("t1").await.unwrap().unwrap();
        assert_eq!(got, def);
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let s = store();
        let def = TaskDefinition::new("t1", "a.py", 5);
        s.add(&def).await.unwrap();
        assert!(matches!(
            s.add(&def).await,
            Err(StoreError::DuplicateTask { .. })
        ));
    }

    #[tokio::test]
    async fn update_unknown_id_fails() {
        let s = store();
        let patch = TaskPatch {
            enabled: Some(false),
            ..Default::default()
        };
        assert!(matches!(
            s.update("ghost", &patch).await,
            Err(StoreError::TaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn history_ordering_and_limit() {
        let s = store();
        for i in 1..=4 {
            let entry = HistoryEntry {
                timestamp: format!("2026-08-1{i} 00:00:00"),
                status: "success".into(),
                message: format!("run {i}"),
            };
            s.append_history("t1", &entry).await.unwrap();
        }
        let got = s.history("t1", 2).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].message, "run 4");
        assert_eq!(got[1].message, "run 3");
    }

    #[tokio::test]
    async fn cleanup_deletes_expired_rows() {
        let s = store();
        s.append_history(
            "t1",
            &HistoryEntry {
                timestamp: "2020-01-01 00:00:00".into(),
                status: "failed".into(),
                message: "old".into(),
            },
        )
        .await
        .unwrap();
        s.append_history("t1", &HistoryEntry::now("success", "new"))
            .await
            .unwrap();
        assert_eq!(s.cleanup_old_history(30).await.unwrap(), 1);
        let left = s.history("t1", 10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].message, "new");
    }
}
