//! SQLite-backed store.
//!
//! The full agent record is kept as one JSON column so restore is a single
//! read; tasks and logs are additionally written as their own rows so the
//! latest state of a run is queryable without replaying the record.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::agent::{AgentId, AgentRecord, HistoryEntry};
use crate::task::Task;

use super::AgentStore;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    creator_id TEXT,
    updated_at TEXT NOT NULL,
    record TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_agents_creator ON agents(creator_id);

CREATE TABLE IF NOT EXISTS agent_tasks (
    agent_id TEXT NOT NULL,
    task_id TEXT NOT NULL,
    status TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    task TEXT NOT NULL,
    PRIMARY KEY (agent_id, task_id)
);

CREATE INDEX IF NOT EXISTS idx_tasks_agent ON agent_tasks(agent_id);

CREATE TABLE IF NOT EXISTS agent_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    action TEXT NOT NULL,
    details TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logs_agent ON agent_logs(agent_id);
"#;

/// Store keeping agents in an SQLite database file.
#[derive(Clone)]
pub struct SqliteAgentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAgentStore {
    /// Open (or create) the database at `db_path` and apply the schema.
    pub async fn new(db_path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| format!("Failed to create store directory: {}", e))?;
            }
        }

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| format!("Failed to open SQLite database: {}", e))?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| format!("Failed to apply schema: {}", e))?;
            Ok::<_, String>(conn)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Number of log rows for an agent.
    pub async fn log_count(&self, agent: AgentId) -> Result<usize, String> {
        let conn = self.conn.clone();
        let agent_id = agent.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM agent_logs WHERE agent_id = ?1",
                    params![agent_id],
                    |row| row.get(0),
                )
                .map_err(|e| e.to_string())?;
            Ok(count as usize)
        })
        .await
        .map_err(|e| e.to_string())?
    }

    /// Number of task rows for an agent.
    pub async fn task_count(&self, agent: AgentId) -> Result<usize, String> {
        let conn = self.conn.clone();
        let agent_id = agent.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM agent_tasks WHERE agent_id = ?1",
                    params![agent_id],
                    |row| row.get(0),
                )
                .map_err(|e| e.to_string())?;
            Ok(count as usize)
        })
        .await
        .map_err(|e| e.to_string())?
    }
}

#[async_trait]
impl AgentStore for SqliteAgentStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn save_agent(&self, record: &AgentRecord) -> Result<(), String> {
        let conn = self.conn.clone();
        let id = record.id.to_string();
        let name = record.name.clone();
        let creator_id = record.creator_id.clone();
        let updated_at = record.updated_at.to_rfc3339();
        let json = serde_json::to_string(record).map_err(|e| e.to_string())?;

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT OR REPLACE INTO agents (id, name, creator_id, updated_at, record)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, name, creator_id, updated_at, json],
            )
            .map_err(|e| e.to_string())?;
            Ok(())
        })
        .await
        .map_err(|e| e.to_string())?
    }

    async fn load_agent(&self, id: AgentId) -> Result<Option<AgentRecord>, String> {
        let conn = self.conn.clone();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let json: Option<String> = conn
                .query_row("SELECT record FROM agents WHERE id = ?1", params![id], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(|e| e.to_string())?;

            match json {
                Some(json) => {
                    let record: AgentRecord =
                        serde_json::from_str(&json).map_err(|e| e.to_string())?;
                    Ok(Some(record))
                }
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| e.to_string())?
    }

    async fn list_agents(&self, creator: Option<&str>) -> Result<Vec<AgentRecord>, String> {
        let conn = self.conn.clone();
        let creator = creator.map(|s| s.to_string());

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            let rows: Vec<String> = if let Some(creator) = creator {
                let mut stmt = conn
                    .prepare(
                        "SELECT record FROM agents WHERE creator_id = ?1
                         ORDER BY updated_at DESC",
                    )
                    .map_err(|e| e.to_string())?;
                let mapped = stmt
                    .query_map(params![creator], |row| row.get(0))
                    .map_err(|e| e.to_string())?;
                mapped
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| e.to_string())?
            } else {
                let mut stmt = conn
                    .prepare("SELECT record FROM agents ORDER BY updated_at DESC")
                    .map_err(|e| e.to_string())?;
                let mapped = stmt
                    .query_map([], |row| row.get(0))
                    .map_err(|e| e.to_string())?;
                mapped
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| e.to_string())?
            };

            let mut records = Vec::with_capacity(rows.len());
            for json in rows {
                let record: AgentRecord = serde_json::from_str(&json).map_err(|e| e.to_string())?;
                records.push(record);
            }
            Ok(records)
        })
        .await
        .map_err(|e| e.to_string())?
    }

    async fn delete_agent(&self, id: AgentId) -> Result<bool, String> {
        let conn = self.conn.clone();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute("DELETE FROM agent_tasks WHERE agent_id = ?1", params![id])
                .map_err(|e| e.to_string())?;
            conn.execute("DELETE FROM agent_logs WHERE agent_id = ?1", params![id])
                .map_err(|e| e.to_string())?;
            let rows = conn
                .execute("DELETE FROM agents WHERE id = ?1", params![id])
                .map_err(|e| e.to_string())?;
            Ok(rows > 0)
        })
        .await
        .map_err(|e| e.to_string())?
    }

    async fn save_task(&self, agent: AgentId, task: &Task) -> Result<(), String> {
        let conn = self.conn.clone();
        let agent_id = agent.to_string();
        let task_id = task.id().to_string();
        let status = task.status().as_str();
        let updated_at = task.updated_at().to_rfc3339();
        let json = serde_json::to_string(task).map_err(|e| e.to_string())?;

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT OR REPLACE INTO agent_tasks (agent_id, task_id, status, updated_at, task)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![agent_id, task_id, status, updated_at, json],
            )
            .map_err(|e| e.to_string())?;
            Ok(())
        })
        .await
        .map_err(|e| e.to_string())?
    }

    async fn append_log(&self, agent: AgentId, entry: &HistoryEntry) -> Result<(), String> {
        let conn = self.conn.clone();
        let agent_id = agent.to_string();
        let timestamp = entry.timestamp.to_rfc3339();
        let action = entry.action.clone();
        let details = entry.details.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO agent_logs (agent_id, timestamp, action, details)
                 VALUES (?1, ?2, ?3, ?4)",
                params![agent_id, timestamp, action, details],
            )
            .map_err(|e| e.to_string())?;
            Ok(())
        })
        .await
        .map_err(|e| e.to_string())?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::llm::MockLlm;
    use chrono::Duration;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> SqliteAgentStore {
        SqliteAgentStore::new(dir.path().join("agents.db"))
            .await
            .unwrap()
    }

    fn sample_record(name: &str, creator: Option<&str>) -> AgentRecord {
        let mut agent = Agent::new(name, "persist things", Arc::new(MockLlm::new()));
        if let Some(creator) = creator {
            agent = agent.with_creator(creator);
        }
        agent.add_task(Task::new("seed", "first task"));
        let mut record = agent.to_record();
        record
            .history
            .push(HistoryEntry::new("Agent Started", "Starting with goal: persist things"));
        record
    }

    #[tokio::test]
    async fn save_load_round_trip_preserves_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        assert!(store.is_persistent());

        let record = sample_record("roundtrip", Some("ada"));
        store.save_agent(&record).await.unwrap();

        let loaded = store.load_agent(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "roundtrip");
        assert_eq!(loaded.creator_id.as_deref(), Some("ada"));
        assert_eq!(loaded.tasks.len(), 1);
        assert_eq!(loaded.tasks[0].name(), "seed");
        assert_eq!(loaded.history.len(), 1);

        assert!(store.load_agent(AgentId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reopening_the_database_sees_saved_agents() {
        let dir = tempfile::tempdir().unwrap();
        let record = sample_record("survivor", None);

        {
            let store = open_store(&dir).await;
            store.save_agent(&record).await.unwrap();
        }

        let store = open_store(&dir).await;
        let loaded = store.load_agent(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "survivor");
    }

    #[tokio::test]
    async fn list_filters_by_creator_and_orders_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let mut old = sample_record("old", Some("ada"));
        old.updated_at = old.updated_at - Duration::minutes(5);
        let fresh = sample_record("fresh", Some("ada"));
        let other = sample_record("other", Some("grace"));

        for record in [&old, &fresh, &other] {
            store.save_agent(record).await.unwrap();
        }

        let all = store.list_agents(None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.last().unwrap().name, "old");

        let ada = store.list_agents(Some("ada")).await.unwrap();
        let names: Vec<&str> = ada.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["fresh", "old"]);
    }

    #[tokio::test]
    async fn delete_removes_tasks_and_logs_too() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let record = sample_record("doomed", None);
        let id = record.id;
        store.save_agent(&record).await.unwrap();
        store.save_task(id, &record.tasks[0]).await.unwrap();
        store
            .append_log(id, &HistoryEntry::new("Task Started", "Executing 'seed'"))
            .await
            .unwrap();
        assert_eq!(store.task_count(id).await.unwrap(), 1);
        assert_eq!(store.log_count(id).await.unwrap(), 1);

        assert!(store.delete_agent(id).await.unwrap());
        assert!(store.load_agent(id).await.unwrap().is_none());
        assert_eq!(store.task_count(id).await.unwrap(), 0);
        assert_eq!(store.log_count(id).await.unwrap(), 0);
        assert!(!store.delete_agent(id).await.unwrap());
    }

    #[tokio::test]
    async fn saving_a_task_twice_upserts_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let agent = AgentId::new();

        let mut task = Task::new("flaky", "retried work");
        store.save_task(agent, &task).await.unwrap();
        task.start().unwrap();
        store.save_task(agent, &task).await.unwrap();

        assert_eq!(store.task_count(agent).await.unwrap(), 1);

        let mut logged = 0;
        for entry in [
            HistoryEntry::new("Task Started", "Executing 'flaky'"),
            HistoryEntry::new("Task Completed", "'flaky' executed directly"),
        ] {
            store.append_log(agent, &entry).await.unwrap();
            logged += 1;
        }
        assert_eq!(store.log_count(agent).await.unwrap(), logged);
    }
}
