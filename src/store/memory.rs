//! In-memory store, non-persistent.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::agent::{AgentId, AgentRecord, HistoryEntry};
use crate::task::{Task, TaskId};

use super::AgentStore;

/// Store backed by process-local maps. Everything is gone on restart, which
/// makes it the default for tests and embedded use.
#[derive(Clone, Default)]
pub struct MemoryAgentStore {
    agents: Arc<RwLock<HashMap<AgentId, AgentRecord>>>,
    tasks: Arc<RwLock<HashMap<AgentId, HashMap<TaskId, Task>>>>,
    logs: Arc<RwLock<HashMap<AgentId, Vec<HistoryEntry>>>>,
}

impl MemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of log entries recorded for an agent.
    pub async fn log_count(&self, agent: AgentId) -> usize {
        self.logs.read().await.get(&agent).map_or(0, Vec::len)
    }

    /// Number of distinct tasks checkpointed for an agent.
    pub async fn task_count(&self, agent: AgentId) -> usize {
        self.tasks.read().await.get(&agent).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl AgentStore for MemoryAgentStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn save_agent(&self, record: &AgentRecord) -> Result<(), String> {
        self.agents.write().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn load_agent(&self, id: AgentId) -> Result<Option<AgentRecord>, String> {
        Ok(self.agents.read().await.get(&id).cloned())
    }

    async fn list_agents(&self, creator: Option<&str>) -> Result<Vec<AgentRecord>, String> {
        let mut records: Vec<AgentRecord> = self
            .agents
            .read()
            .await
            .values()
            .filter(|r| creator.is_none() || r.creator_id.as_deref() == creator)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    async fn delete_agent(&self, id: AgentId) -> Result<bool, String> {
        let existed = self.agents.write().await.remove(&id).is_some();
        self.tasks.write().await.remove(&id);
        self.logs.write().await.remove(&id);
        Ok(existed)
    }

    async fn save_task(&self, agent: AgentId, task: &Task) -> Result<(), String> {
        self.tasks
            .write()
            .await
            .entry(agent)
            .or_default()
            .insert(task.id(), task.clone());
        Ok(())
    }

    async fn append_log(&self, agent: AgentId, entry: &HistoryEntry) -> Result<(), String> {
        self.logs
            .write()
            .await
            .entry(agent)
            .or_default()
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::llm::MockLlm;
    use crate::task::DEFAULT_PRIORITY;
    use chrono::Duration;

    fn sample_record(name: &str, creator: Option<&str>) -> AgentRecord {
        let mut agent = Agent::new(name, "keep things around", Arc::new(MockLlm::new()));
        if let Some(creator) = creator {
            agent = agent.with_creator(creator);
        }
        agent.add_task("seed", "first task", DEFAULT_PRIORITY, vec![]);
        agent.to_record()
    }

    #[tokio::test]
    async fn save_load_delete_round_trip() {
        let store = MemoryAgentStore::new();
        let record = sample_record("roundtrip", None);
        let id = record.id;

        store.save_agent(&record).await.unwrap();
        let loaded = store.load_agent(id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "roundtrip");
        assert_eq!(loaded.tasks.len(), 1);

        assert!(store.delete_agent(id).await.unwrap());
        assert!(store.load_agent(id).await.unwrap().is_none());
        assert!(!store.delete_agent(id).await.unwrap());
    }

    #[tokio::test]
    async fn list_filters_by_creator_and_orders_newest_first() {
        let store = MemoryAgentStore::new();

        let mut old = sample_record("old", Some("ada"));
        old.updated_at = old.updated_at - Duration::minutes(5);
        let fresh = sample_record("fresh", Some("ada"));
        let other = sample_record("other", Some("grace"));
        let anonymous = sample_record("anonymous", None);

        for record in [&old, &fresh, &other, &anonymous] {
            store.save_agent(record).await.unwrap();
        }

        let all = store.list_agents(None).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all.last().unwrap().name, "old");

        let ada = store.list_agents(Some("ada")).await.unwrap();
        let names: Vec<&str> = ada.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["fresh", "old"]);
    }

    #[tokio::test]
    async fn tasks_upsert_and_logs_append() {
        let store = MemoryAgentStore::new();
        let agent = AgentId::new();

        let mut task = Task::new("flaky", "retried work");
        store.save_task(agent, &task).await.unwrap();
        task.start().unwrap();
        store.save_task(agent, &task).await.unwrap();
        assert_eq!(store.task_count(agent).await, 1);

        store
            .append_log(agent, &HistoryEntry::new("Task Started", "Executing 'flaky'"))
            .await
            .unwrap();
        store
            .append_log(agent, &HistoryEntry::new("Task Completed", "'flaky' executed directly"))
            .await
            .unwrap();
        assert_eq!(store.log_count(agent).await, 2);
        assert_eq!(store.task_count(AgentId::new()).await, 0);
    }
}
