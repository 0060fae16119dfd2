//! Persistence providers for agents, tasks, and logs.
//!
//! Stores are best-effort collaborators: the execution engine logs and
//! swallows their errors, so an unreachable store degrades persistence
//! without changing what a run does. Two backends ship here, a
//! non-persistent in-memory store and an SQLite store keeping the full
//! agent record as JSON next to queryable per-task and per-log rows.

mod memory;
mod sqlite;

pub use memory::MemoryAgentStore;
pub use sqlite::SqliteAgentStore;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{AgentId, AgentRecord, HistoryEntry};
use crate::task::Task;

/// Persistence provider for agents.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Whether this store survives a process restart.
    fn is_persistent(&self) -> bool;

    /// Insert or replace the full record for an agent.
    async fn save_agent(&self, record: &AgentRecord) -> Result<(), String>;

    /// Load one agent's record.
    async fn load_agent(&self, id: AgentId) -> Result<Option<AgentRecord>, String>;

    /// All stored records, most recently updated first, optionally filtered
    /// to one creator.
    async fn list_agents(&self, creator: Option<&str>) -> Result<Vec<AgentRecord>, String>;

    /// Delete an agent along with its tasks and logs. Returns whether the
    /// agent existed.
    async fn delete_agent(&self, id: AgentId) -> Result<bool, String>;

    /// Insert or replace one task's current state.
    async fn save_task(&self, agent: AgentId, task: &Task) -> Result<(), String>;

    /// Append one history entry to the agent's log.
    async fn append_log(&self, agent: AgentId, entry: &HistoryEntry) -> Result<(), String>;
}

/// Store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    #[default]
    Memory,
    Sqlite,
}

impl StoreKind {
    /// Parse from a configuration value. Unknown values select the default.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "sqlite" | "db" => Self::Sqlite,
            "memory" => Self::Memory,
            _ => Self::default(),
        }
    }
}

/// Create a store of the selected kind. `db_path` matters only for SQLite.
pub async fn create_store(
    kind: StoreKind,
    db_path: PathBuf,
) -> Result<Arc<dyn AgentStore>, String> {
    match kind {
        StoreKind::Memory => Ok(Arc::new(MemoryAgentStore::new())),
        StoreKind::Sqlite => {
            let store = SqliteAgentStore::new(db_path).await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_leniently() {
        assert_eq!(StoreKind::from_str("sqlite"), StoreKind::Sqlite);
        assert_eq!(StoreKind::from_str("DB"), StoreKind::Sqlite);
        assert_eq!(StoreKind::from_str("memory"), StoreKind::Memory);
        assert_eq!(StoreKind::from_str("anything else"), StoreKind::Memory);
    }

    #[tokio::test]
    async fn factory_builds_memory_store() {
        let store = create_store(StoreKind::Memory, PathBuf::from("unused.db"))
            .await
            .unwrap();
        assert!(!store.is_persistent());
    }
}
