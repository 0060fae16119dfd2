//! Autonomous agent: a goal, a prioritized task forest, an experience cache,
//! a capability set, and references to the external collaborators.
//!
//! The agent is the unit the execution engine operates on. A run drives the
//! forest until no runnable task remains, recording every step in the agent
//! history and the experience cache. Control (pause/resume/stop) goes through
//! a shared [`ControlHandle`] so it works while the run holds the agent lock.

pub mod control;
mod decompose;
mod engine;

pub use control::{ControlError, ControlHandle, ControlState};
pub use engine::RunOutcome;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::learning::Learning;
use crate::llm::LlmClient;
use crate::memory::ExperienceCache;
use crate::store::AgentStore;
use crate::task::{Task, TaskError, TaskId, TaskStatus};
use crate::tools::ToolRegistry;

use engine::{Engine, LoopEnd};

/// How often a paused loop re-checks the control state.
pub const DEFAULT_PAUSE_POLL: Duration = Duration::from_secs(1);

/// Priority given to the auto-seeded goal task.
const SEED_PRIORITY: i32 = 10;

/// Unique identifier for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(Uuid);

impl AgentId {
    /// Create a new unique agent ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::str::FromStr for AgentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One entry in the agent's action history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub details: String,
}

impl HistoryEntry {
    pub fn new(action: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            details: details.into(),
        }
    }
}

/// Task-status tallies across the whole forest, subtasks included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub canceled: usize,
}

/// Point-in-time snapshot of an agent's execution state.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub state: ControlState,
    pub is_running: bool,
    pub is_paused: bool,
    pub counts: TaskCounts,
    pub completion_percentage: f64,
}

/// Error from agent-level operations.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("task {0} not found")]
    TaskNotFound(TaskId),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Serializable snapshot of an agent for the persistence provider.
///
/// Collaborator references are not stored; restoring takes them as arguments
/// and re-resolves tool names against the provided registry. The recorded
/// control state is informational only: restored agents always start idle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub name: String,
    pub description: String,
    pub goal: String,
    #[serde(default)]
    pub creator_id: Option<String>,
    pub state: ControlState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tasks: Vec<Task>,
    pub history: Vec<HistoryEntry>,
    pub memory: ExperienceCache,
    pub tools: Vec<String>,
}

/// An autonomous agent executing tasks toward a goal.
pub struct Agent {
    id: AgentId,
    name: String,
    description: String,
    goal: String,
    creator_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    llm: Arc<dyn LlmClient>,
    store: Option<Arc<dyn AgentStore>>,
    tools: ToolRegistry,
    learning: Option<Arc<dyn Learning>>,
    tasks: Vec<Task>,
    history: Vec<HistoryEntry>,
    memory: ExperienceCache,
    control: ControlHandle,
    pause_poll: Duration,
}

impl Agent {
    /// Create an agent with no tools, no store, and an in-memory cache.
    pub fn new(name: impl Into<String>, goal: impl Into<String>, llm: Arc<dyn LlmClient>) -> Self {
        let goal = goal.into();
        let now = Utc::now();
        Self {
            id: AgentId::new(),
            name: name.into(),
            description: format!("Agent for tasks related to: {goal}"),
            goal,
            creator_id: None,
            created_at: now,
            updated_at: now,
            llm,
            store: None,
            tools: ToolRegistry::empty(),
            learning: None,
            tasks: Vec::new(),
            history: Vec::new(),
            memory: ExperienceCache::default(),
            control: ControlHandle::new(),
            pause_poll: DEFAULT_PAUSE_POLL,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_creator(mut self, creator_id: impl Into<String>) -> Self {
        self.creator_id = Some(creator_id.into());
        self
    }

    pub fn with_store(mut self, store: Arc<dyn AgentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_learning(mut self, learning: Arc<dyn Learning>) -> Self {
        self.learning = Some(learning);
        self
    }

    /// Replace the experience cache with one bounded at `capacity` records.
    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory = ExperienceCache::new(capacity);
        self
    }

    /// Override the pause polling interval (mainly for tests).
    pub fn with_pause_poll(mut self, poll: Duration) -> Self {
        self.pause_poll = poll;
        self
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn creator_id(&self) -> Option<&str> {
        self.creator_id.as_deref()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn memory(&self) -> &ExperienceCache {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut ExperienceCache {
        &mut self.memory
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// The shared control handle; clone it to pause or stop a running agent
    /// from outside the agent lock.
    pub fn control(&self) -> &ControlHandle {
        &self.control
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    /// Add a top-level task to the forest.
    pub fn add_task(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        priority: i32,
        tags: Vec<String>,
    ) -> &mut Task {
        let mut task = Task::new(name, description)
            .with_priority(priority)
            .with_tags(tags);
        task.set_agent(self.id.as_uuid());
        self.tasks.push(task);
        self.updated_at = Utc::now();
        let idx = self.tasks.len() - 1;
        &mut self.tasks[idx]
    }

    /// Find a task anywhere in the forest.
    pub fn find_task(&self, id: TaskId) -> Option<&Task> {
        fn walk(tasks: &[Task], id: TaskId) -> Option<&Task> {
            for task in tasks {
                if task.id() == id {
                    return Some(task);
                }
                if let Some(found) = walk(task.subtasks(), id) {
                    return Some(found);
                }
            }
            None
        }
        walk(&self.tasks, id)
    }

    fn find_task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        find_in_forest(&mut self.tasks, id)
    }

    /// Cancel a task that has not finished yet.
    ///
    /// # Errors
    /// Fails when the task is unknown or already terminal.
    pub fn cancel_task(&mut self, id: TaskId) -> Result<(), AgentError> {
        let task = self
            .find_task_mut(id)
            .ok_or(AgentError::TaskNotFound(id))?;
        task.cancel()?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record user feedback against a task anywhere in the forest.
    pub fn add_task_feedback(
        &mut self,
        id: TaskId,
        rater: &str,
        rating: u8,
        comment: Option<String>,
    ) -> Result<(), AgentError> {
        let task = self
            .find_task_mut(id)
            .ok_or(AgentError::TaskNotFound(id))?;
        task.add_feedback(rater, rating, comment);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Tally task statuses across the whole forest, subtasks included.
    pub fn task_counts(&self) -> TaskCounts {
        fn tally(tasks: &[Task], counts: &mut TaskCounts) {
            for task in tasks {
                counts.total += 1;
                match task.status() {
                    TaskStatus::Pending => counts.pending += 1,
                    TaskStatus::InProgress => counts.in_progress += 1,
                    TaskStatus::Completed => counts.completed += 1,
                    TaskStatus::Failed => counts.failed += 1,
                    TaskStatus::Canceled => counts.canceled += 1,
                }
                tally(task.subtasks(), counts);
            }
        }
        let mut counts = TaskCounts::default();
        tally(&self.tasks, &mut counts);
        counts
    }

    /// Current execution snapshot.
    pub fn status(&self) -> AgentStatus {
        let counts = self.task_counts();
        let completion_percentage = if counts.total > 0 {
            counts.completed as f64 / counts.total as f64 * 100.0
        } else {
            0.0
        };
        AgentStatus {
            state: self.control.state(),
            is_running: self.control.is_running(),
            is_paused: self.control.is_paused(),
            counts,
            completion_percentage,
        }
    }

    /// Request a pause; takes effect before the next task starts.
    pub fn pause(&self) -> Result<(), ControlError> {
        self.control.pause()
    }

    /// Resume a paused run.
    pub fn resume(&self) -> Result<(), ControlError> {
        self.control.resume()
    }

    /// Request a stop. Returns whether a run was actually stopped.
    pub fn stop(&self) -> bool {
        self.control.stop()
    }

    /// Decompose a task into children via the reasoning provider.
    ///
    /// Applies the three-tier protocol: full payload, minimal reprompt, then
    /// canned default children. A provider transport error fails the task
    /// instead of erroring here.
    pub async fn decompose_task(&mut self, id: TaskId) -> Result<(), AgentError> {
        let Self {
            id: agent_id,
            name,
            goal,
            llm,
            store,
            tools,
            tasks,
            history,
            memory,
            control,
            pause_poll,
            ..
        } = self;
        let mut engine = Engine {
            agent_id: *agent_id,
            agent_name: name.as_str(),
            goal: goal.as_str(),
            llm: Arc::clone(llm),
            store: store.clone(),
            tools,
            memory,
            history,
            control: control.clone(),
            pause_poll: *pause_poll,
        };
        let task = find_in_forest(tasks, id).ok_or(AgentError::TaskNotFound(id))?;
        engine.breakdown_task(task).await?;
        self.updated_at = Utc::now();
        self.checkpoint().await;
        Ok(())
    }

    /// Execute the task forest until nothing runnable remains.
    ///
    /// Seeds a "Main Goal" task from the goal when the forest is empty, then
    /// loops over tasks in priority order. Returns how the run ended; internal
    /// faults are reported through [`RunOutcome::Faulted`], not `Err`.
    ///
    /// # Errors
    /// Returns [`ControlError::AlreadyRunning`] when a loop is already active.
    pub async fn run(&mut self) -> Result<RunOutcome, ControlError> {
        self.control.begin()?;
        self.updated_at = Utc::now();
        tracing::info!(agent = %self.name, goal = %self.goal, "agent starting");

        let seeded = if self.tasks.is_empty() {
            let goal = self.goal.clone();
            let task = self.add_task(
                "Main Goal",
                goal,
                SEED_PRIORITY,
                vec!["main".to_string(), "auto-generated".to_string()],
            );
            Some(task.id())
        } else {
            None
        };

        let end = {
            let Self {
                id,
                name,
                goal,
                llm,
                store,
                tools,
                tasks,
                history,
                memory,
                control,
                pause_poll,
                ..
            } = self;
            let mut engine = Engine {
                agent_id: *id,
                agent_name: name.as_str(),
                goal: goal.as_str(),
                llm: Arc::clone(llm),
                store: store.clone(),
                tools,
                memory,
                history,
                control: control.clone(),
                pause_poll: *pause_poll,
            };
            engine.drive(tasks, seeded).await
        };

        let outcome = match end {
            Ok(LoopEnd::Completed) => {
                if let Some(learning) = self.learning.clone() {
                    if let Err(e) = learning.analyze(self).await {
                        tracing::warn!(agent = %self.name, error = %e, "learning pass failed");
                    }
                }
                self.control.finish();
                RunOutcome::Completed
            }
            Ok(LoopEnd::Stopped) => RunOutcome::Stopped,
            Err(e) => {
                tracing::error!(agent = %self.name, error = %e, "error in agent execution");
                self.history.push(HistoryEntry::new(
                    "Agent Error",
                    format!("Error during execution: {e}"),
                ));
                self.control.finish();
                RunOutcome::Faulted(e.to_string())
            }
        };

        self.updated_at = Utc::now();
        self.checkpoint().await;
        Ok(outcome)
    }

    /// Run a shared agent on a background Tokio task.
    ///
    /// The agent lock is held for the whole run; use the [`ControlHandle`]
    /// cloned beforehand to pause or stop it.
    pub fn spawn(
        agent: Arc<tokio::sync::Mutex<Agent>>,
    ) -> JoinHandle<Result<RunOutcome, ControlError>> {
        tokio::spawn(async move {
            let mut guard = agent.lock().await;
            guard.run().await
        })
    }

    /// Best-effort save of the full record; failures are logged, not raised.
    async fn checkpoint(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_agent(&self.to_record()).await {
                tracing::warn!(agent = %self.name, error = %e, "agent checkpoint failed");
            }
        }
    }

    /// Snapshot this agent for persistence.
    pub fn to_record(&self) -> AgentRecord {
        AgentRecord {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            goal: self.goal.clone(),
            creator_id: self.creator_id.clone(),
            state: self.control.state(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            tasks: self.tasks.clone(),
            history: self.history.clone(),
            memory: self.memory.clone(),
            tools: self.tools.names(),
        }
    }

    /// Rebuild an agent from a stored record.
    ///
    /// Recorded tool names are resolved against `registry`; names the registry
    /// no longer knows are dropped. The restored agent starts idle regardless
    /// of the state it was saved in.
    pub fn from_record(
        record: AgentRecord,
        llm: Arc<dyn LlmClient>,
        store: Option<Arc<dyn AgentStore>>,
        registry: &ToolRegistry,
        learning: Option<Arc<dyn Learning>>,
    ) -> Self {
        Self {
            id: record.id,
            name: record.name,
            description: record.description,
            goal: record.goal,
            creator_id: record.creator_id,
            created_at: record.created_at,
            updated_at: record.updated_at,
            llm,
            store,
            tools: registry.subset(&record.tools),
            learning,
            tasks: record.tasks,
            history: record.history,
            memory: record.memory,
            control: ControlHandle::new(),
            pause_poll: DEFAULT_PAUSE_POLL,
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("goal", &self.goal)
            .field("state", &self.control.state())
            .field("tasks", &self.tasks.len())
            .field("history", &self.history.len())
            .finish()
    }
}

fn find_in_forest(tasks: &mut [Task], id: TaskId) -> Option<&mut Task> {
    for task in tasks {
        if task.id() == id {
            return Some(task);
        }
        if let Some(found) = find_in_forest(task.subtasks_mut(), id) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use crate::task::DEFAULT_PRIORITY;

    fn test_agent() -> Agent {
        Agent::new("tester", "test things end to end", Arc::new(MockLlm::new()))
    }

    #[test]
    fn new_agent_defaults() {
        let agent = test_agent();
        assert_eq!(
            agent.description(),
            "Agent for tasks related to: test things end to end"
        );
        assert!(agent.tasks().is_empty());
        assert!(agent.creator_id().is_none());
        assert!(!agent.is_running());
        assert_eq!(agent.status().state, ControlState::Idle);
        assert_eq!(agent.status().completion_percentage, 0.0);
    }

    #[test]
    fn add_task_wires_agent_id() {
        let mut agent = test_agent();
        let agent_id = agent.id().as_uuid();
        let task = agent.add_task("first", "do the first thing", 7, vec!["x".to_string()]);
        assert_eq!(task.agent_id(), Some(agent_id));
        assert_eq!(task.priority(), 7);
        assert_eq!(agent.tasks().len(), 1);
    }

    #[test]
    fn find_task_descends_into_subtasks() {
        let mut agent = test_agent();
        agent.add_task("root", "root", DEFAULT_PRIORITY, vec![]);
        let root_id = agent.tasks()[0].id();
        let child = Task::new("child", "nested");
        let child_id = child.id();
        agent.find_task_mut(root_id).unwrap().add_subtask(child);

        assert!(agent.find_task(child_id).is_some());
        assert!(agent.find_task(TaskId::new()).is_none());
    }

    #[test]
    fn cancel_task_rejects_unknown_and_terminal() {
        let mut agent = test_agent();
        let id = agent.add_task("a", "a", DEFAULT_PRIORITY, vec![]).id();
        agent.cancel_task(id).unwrap();
        assert_eq!(agent.tasks()[0].status(), TaskStatus::Canceled);

        assert!(matches!(agent.cancel_task(id), Err(AgentError::Task(_))));
        assert!(matches!(
            agent.cancel_task(TaskId::new()),
            Err(AgentError::TaskNotFound(_))
        ));
    }

    #[test]
    fn feedback_lands_on_nested_tasks() {
        let mut agent = test_agent();
        agent.add_task("root", "root", DEFAULT_PRIORITY, vec![]);
        let root_id = agent.tasks()[0].id();
        let child = Task::new("child", "nested");
        let child_id = child.id();
        agent.find_task_mut(root_id).unwrap().add_subtask(child);

        agent
            .add_task_feedback(child_id, "alice", 4, Some("solid".to_string()))
            .unwrap();
        let child = agent.find_task(child_id).unwrap();
        assert_eq!(child.feedback()["alice"].rating, 4);
    }

    #[test]
    fn counts_cover_the_whole_forest() {
        let mut agent = test_agent();
        agent.add_task("a", "a", 5, vec![]);
        let b = agent.add_task("b", "b", 5, vec![]);
        b.add_subtask(Task::new("b1", "b1"));
        b.start().unwrap();
        b.subtasks_mut()[0].start().unwrap();
        b.subtasks_mut()[0]
            .complete(Some("done".to_string()))
            .unwrap();

        let status = agent.status();
        assert_eq!(status.counts.total, 3);
        assert_eq!(status.counts.pending, 1);
        assert_eq!(status.counts.in_progress, 1);
        assert_eq!(status.counts.completed, 1);
        assert!((status.completion_percentage - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn record_round_trip_preserves_forest_and_history() {
        let mut agent = test_agent().with_creator("user-7");
        agent.add_task("a", "first", 8, vec!["tag".to_string()]);
        agent
            .memory_mut()
            .add("direct_task", serde_json::json!({"task_name": "a"}), None);

        let record = agent.to_record();
        let raw = serde_json::to_string(&record).unwrap();
        let parsed: AgentRecord = serde_json::from_str(&raw).unwrap();

        let restored = Agent::from_record(
            parsed,
            Arc::new(MockLlm::new()),
            None,
            &ToolRegistry::new(),
            None,
        );
        assert_eq!(restored.id(), agent.id());
        assert_eq!(restored.creator_id(), Some("user-7"));
        assert_eq!(restored.tasks().len(), 1);
        assert_eq!(restored.tasks()[0].name(), "a");
        assert_eq!(restored.memory().len(), 1);
        assert_eq!(restored.status().state, ControlState::Idle);
    }

    #[test]
    fn from_record_drops_unknown_tools() {
        let mut agent = test_agent().with_tools(ToolRegistry::new());
        agent.add_task("a", "a", DEFAULT_PRIORITY, vec![]);
        let mut record = agent.to_record();
        record.tools.push("legacy_tool".to_string());

        let restored = Agent::from_record(
            record,
            Arc::new(MockLlm::new()),
            None,
            &ToolRegistry::new(),
            None,
        );
        assert_eq!(
            restored.tools().names(),
            vec!["content_generator", "web_search"]
        );
    }
}
