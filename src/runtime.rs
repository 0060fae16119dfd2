//! Multi-agent runtime.
//!
//! The runtime owns the shared collaborators (reasoning provider, store, tool
//! registry, learning hook) and a table of agents, each behind its own async
//! lock. A running agent holds its lock for the whole run, so control requests
//! and status reads go through the [`ControlHandle`] captured at registration
//! instead of the lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::agent::{
    Agent, AgentId, AgentRecord, AgentStatus, ControlError, ControlHandle, RunOutcome, TaskCounts,
    DEFAULT_PAUSE_POLL,
};
use crate::config::{Config, ProviderKind};
use crate::learning::{Learning, RunDigestLearning};
use crate::llm::{LlmClient, MockLlm, OpenAiClient};
use crate::memory::DEFAULT_CAPACITY;
use crate::store::{create_store, AgentStore};
use crate::tools::{Tool, ToolRegistry};

/// Error from runtime-level operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("agent {0} not found")]
    UnknownAgent(AgentId),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Control(#[from] ControlError),
}

struct AgentEntry {
    agent: Arc<Mutex<Agent>>,
    control: ControlHandle,
}

/// Owns agents and the collaborators they share.
pub struct Runtime {
    llm: Arc<dyn LlmClient>,
    store: Option<Arc<dyn AgentStore>>,
    registry: ToolRegistry,
    learning: Arc<dyn Learning>,
    agents: HashMap<AgentId, AgentEntry>,
    memory_capacity: usize,
    pause_poll: Duration,
}

impl Runtime {
    /// Build a runtime with explicit collaborators.
    pub fn new(
        llm: Arc<dyn LlmClient>,
        store: Option<Arc<dyn AgentStore>>,
        registry: ToolRegistry,
    ) -> Self {
        Self {
            llm,
            store,
            registry,
            learning: Arc::new(RunDigestLearning::default()),
            agents: HashMap::new(),
            memory_capacity: DEFAULT_CAPACITY,
            pause_poll: DEFAULT_PAUSE_POLL,
        }
    }

    /// Build a runtime from configuration.
    ///
    /// An OpenAI provider without an API key falls back to the mock client
    /// with a warning rather than failing, so offline runs still work.
    pub async fn from_config(config: &Config) -> Result<Self, RuntimeError> {
        let llm: Arc<dyn LlmClient> = match config.provider {
            ProviderKind::OpenAi => match &config.api_key {
                Some(key) => {
                    let mut client = OpenAiClient::new(key.clone());
                    if let Some(url) = &config.base_url {
                        client = client.with_base_url(url);
                    }
                    if let Some(model) = &config.model {
                        client = client.with_model(model);
                    }
                    if let Some(model) = &config.embedding_model {
                        client = client.with_embedding_model(model);
                    }
                    Arc::new(client)
                }
                None => {
                    tracing::warn!("no API key configured, using the mock client");
                    Arc::new(MockLlm::new())
                }
            },
            ProviderKind::Mock => Arc::new(MockLlm::new()),
        };

        let store = create_store(config.store, config.sqlite_path.clone())
            .await
            .map_err(RuntimeError::Store)?;

        Ok(Self {
            llm,
            store: Some(store),
            registry: ToolRegistry::new(),
            learning: Arc::new(RunDigestLearning::default()),
            agents: HashMap::new(),
            memory_capacity: config.memory_capacity,
            pause_poll: config.pause_poll(),
        })
    }

    /// Replace the learning hook applied to agents created afterwards.
    pub fn with_learning(mut self, learning: Arc<dyn Learning>) -> Self {
        self.learning = learning;
        self
    }

    /// Add a tool to the runtime registry. Agents created afterwards see it;
    /// existing agents keep the registry they were created with.
    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) {
        self.registry.register(tool);
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Register a new agent and checkpoint it to the store.
    ///
    /// `tools` restricts the agent to a subset of the runtime registry; `None`
    /// grants the full registry.
    pub async fn create_agent(
        &mut self,
        name: impl Into<String>,
        goal: impl Into<String>,
        description: Option<String>,
        creator: Option<String>,
        tools: Option<&[String]>,
    ) -> AgentId {
        let registry = match tools {
            Some(names) => self.registry.subset(names),
            None => self.registry.clone(),
        };

        let mut agent = Agent::new(name, goal, self.llm.clone())
            .with_tools(registry)
            .with_memory_capacity(self.memory_capacity)
            .with_pause_poll(self.pause_poll)
            .with_learning(self.learning.clone());
        if let Some(store) = &self.store {
            agent = agent.with_store(store.clone());
        }
        if let Some(description) = description {
            agent = agent.with_description(description);
        }
        if let Some(creator) = creator {
            agent = agent.with_creator(creator);
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.save_agent(&agent.to_record()).await {
                tracing::warn!(agent = %agent.name(), error = %e, "initial save failed");
            }
        }

        let id = agent.id();
        let control = agent.control().clone();
        self.agents.insert(
            id,
            AgentEntry {
                agent: Arc::new(Mutex::new(agent)),
                control,
            },
        );
        id
    }

    /// Start an agent's run on a background task.
    ///
    /// # Errors
    /// [`RuntimeError::UnknownAgent`] for unregistered IDs, and
    /// [`ControlError::AlreadyRunning`] when a run is already active.
    pub fn run_agent(
        &self,
        id: AgentId,
    ) -> Result<JoinHandle<Result<RunOutcome, ControlError>>, RuntimeError> {
        let entry = self.entry(id)?;
        if entry.control.is_running() {
            return Err(RuntimeError::Control(ControlError::AlreadyRunning));
        }
        Ok(Agent::spawn(entry.agent.clone()))
    }

    /// Request a pause; takes effect before the next task starts.
    pub fn pause_agent(&self, id: AgentId) -> Result<(), RuntimeError> {
        self.entry(id)?.control.pause()?;
        Ok(())
    }

    /// Resume a paused run.
    pub fn resume_agent(&self, id: AgentId) -> Result<(), RuntimeError> {
        self.entry(id)?.control.resume()?;
        Ok(())
    }

    /// Request a stop. Returns whether a run was actually stopped.
    pub fn stop_agent(&self, id: AgentId) -> Result<bool, RuntimeError> {
        Ok(self.entry(id)?.control.stop())
    }

    /// Status snapshot for an agent.
    ///
    /// While a run holds the agent lock this reports control state with empty
    /// task counts instead of blocking on the run.
    pub fn agent_status(&self, id: AgentId) -> Result<AgentStatus, RuntimeError> {
        let entry = self.entry(id)?;
        match entry.agent.try_lock() {
            Ok(agent) => Ok(agent.status()),
            Err(_) => Ok(AgentStatus {
                state: entry.control.state(),
                is_running: entry.control.is_running(),
                is_paused: entry.control.is_paused(),
                counts: TaskCounts::default(),
                completion_percentage: 0.0,
            }),
        }
    }

    /// Shared handle to an agent, for direct inspection or task edits.
    pub fn agent(&self, id: AgentId) -> Result<Arc<Mutex<Agent>>, RuntimeError> {
        Ok(self.entry(id)?.agent.clone())
    }

    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Drop an agent from the runtime and delete it from the store.
    ///
    /// # Errors
    /// Running agents are not removed; stop them first.
    pub async fn remove_agent(&mut self, id: AgentId) -> Result<(), RuntimeError> {
        let entry = self.entry(id)?;
        if entry.control.is_running() {
            return Err(RuntimeError::Control(ControlError::AlreadyRunning));
        }
        self.agents.remove(&id);
        if let Some(store) = &self.store {
            if let Err(e) = store.delete_agent(id).await {
                tracing::warn!(agent = %id, error = %e, "store delete failed");
            }
        }
        Ok(())
    }

    /// Stored records, optionally filtered by creator.
    pub async fn stored_agents(&self, creator: Option<&str>) -> Result<Vec<AgentRecord>, RuntimeError> {
        match &self.store {
            Some(store) => store.list_agents(creator).await.map_err(RuntimeError::Store),
            None => Ok(Vec::new()),
        }
    }

    /// Checkpoint every agent that isn't mid-run. Returns how many were saved.
    ///
    /// Running agents are skipped; they checkpoint themselves as they go.
    pub async fn save_all(&self) -> Result<usize, RuntimeError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let mut saved = 0;
        for entry in self.agents.values() {
            let Ok(agent) = entry.agent.try_lock() else {
                continue;
            };
            store
                .save_agent(&agent.to_record())
                .await
                .map_err(RuntimeError::Store)?;
            saved += 1;
        }
        Ok(saved)
    }

    /// Restore stored agents into the runtime. Returns how many were loaded.
    ///
    /// IDs already registered are left alone. Restored agents start idle and
    /// resolve their recorded tool names against the current registry.
    pub async fn load_all(&mut self) -> Result<usize, RuntimeError> {
        let Some(store) = self.store.clone() else {
            return Ok(0);
        };
        let records = store.list_agents(None).await.map_err(RuntimeError::Store)?;

        let mut loaded = 0;
        for record in records {
            if self.agents.contains_key(&record.id) {
                continue;
            }
            let agent = Agent::from_record(
                record,
                self.llm.clone(),
                Some(store.clone()),
                &self.registry,
                Some(self.learning.clone()),
            )
            .with_pause_poll(self.pause_poll);

            let control = agent.control().clone();
            self.agents.insert(
                agent.id(),
                AgentEntry {
                    agent: Arc::new(Mutex::new(agent)),
                    control,
                },
            );
            loaded += 1;
        }
        Ok(loaded)
    }

    fn entry(&self, id: AgentId) -> Result<&AgentEntry, RuntimeError> {
        self.agents.get(&id).ok_or(RuntimeError::UnknownAgent(id))
    }
}
