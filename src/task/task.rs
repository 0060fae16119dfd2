//! Core Task type: one node in an agent's work tree.
//!
//! # Invariants
//! - `completed_at` is set iff the status is terminal
//! - `id` is unique within a process and immutable once assigned
//! - Subtasks form a strict tree; every child's `parent_id` points at the
//!   task that owns it

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Priority assigned to tasks that do not specify one.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Unique identifier for a task.
///
/// # Properties
/// - Globally unique within an execution context
/// - Immutable once created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new unique task ID.
    ///
    /// # Postcondition
    /// Returns a fresh ID that has never been used before in this process.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a task in its lifecycle.
///
/// # State Machine
/// ```text
/// Pending -> InProgress -> Completed
///                      \-> Failed
///                      \-> Canceled
///        \-> Canceled
/// ```
///
/// Terminal states have no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is waiting to be executed
    Pending,
    /// Task is currently being executed
    InProgress,
    /// Task completed successfully
    Completed,
    /// Task failed; the error lives in `Task::error_message`
    Failed,
    /// Task was canceled before completion
    Canceled,
}

impl TaskStatus {
    /// Check if the task is in a terminal state.
    ///
    /// # Property
    /// `is_terminal() => no further transitions are legal`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    /// Check if the task is still active (can make progress).
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::InProgress)
    }

    /// Stable string form, used in store columns and log details.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single rater's feedback on a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFeedback {
    /// Rating in 1..=5
    pub rating: u8,
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A unit of work owned by an agent.
///
/// Tasks own their children (`subtasks`): the forest is a strict tree with no
/// shared ownership. The `parent_id` back-pointer exists for lookup only.
///
/// # Invariants
/// - `completed_at.is_some() == status.is_terminal()`
/// - `error_message` is set only by a `Failed` transition
///
/// All mutation after construction goes through explicit methods; status in
/// particular only moves through validated transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    name: String,
    description: String,
    /// Higher priority runs first
    priority: i32,
    tags: Vec<String>,
    status: TaskStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    /// Owning agent, set when the task enters an agent's forest
    agent_id: Option<Uuid>,
    parent_id: Option<TaskId>,
    /// Collaborator-authored result text, set on completion
    result: Option<String>,
    /// Set only when the task fails
    error_message: Option<String>,
    /// Rater identity -> feedback
    #[serde(default)]
    feedback: HashMap<String, TaskFeedback>,
    /// Free-form annotations, e.g. suggested capability names
    #[serde(default)]
    metadata: HashMap<String, Value>,
    #[serde(default)]
    subtasks: Vec<Task>,
}

impl Task {
    /// Create a new Pending task with the default priority and no tags.
    ///
    /// # Postconditions
    /// - `status == Pending`, `completed_at == None`
    /// - `id` is a fresh unique identifier
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            name: name.into(),
            description: description.into(),
            priority: DEFAULT_PRIORITY,
            tags: Vec::new(),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            agent_id: None,
            parent_id: None,
            result: None,
            error_message: None,
            feedback: HashMap::new(),
            metadata: HashMap::new(),
            subtasks: Vec::new(),
        }
    }

    /// Set the priority (builder style).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the tags (builder style).
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    // Getters - all return references to preserve immutability semantics

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn agent_id(&self) -> Option<Uuid> {
        self.agent_id
    }

    pub fn parent_id(&self) -> Option<TaskId> {
        self.parent_id
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    pub fn feedback(&self) -> &HashMap<String, TaskFeedback> {
        &self.feedback
    }

    pub fn subtasks(&self) -> &[Task] {
        &self.subtasks
    }

    pub(crate) fn subtasks_mut(&mut self) -> &mut [Task] {
        &mut self.subtasks
    }

    pub fn has_subtasks(&self) -> bool {
        !self.subtasks.is_empty()
    }

    /// Check if this task is a subtask (has a parent).
    pub fn is_subtask(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Check whether any task in this subtree (excluding `self`) is Pending.
    ///
    /// The scheduler uses this to re-enter an InProgress composite whose
    /// subtree was left unfinished by an earlier stop.
    pub fn has_pending_descendant(&self) -> bool {
        self.subtasks
            .iter()
            .any(|s| s.status == TaskStatus::Pending || s.has_pending_descendant())
    }

    /// Capability names suggested for this task by the decomposition step.
    ///
    /// Reads the `suggested_tools` metadata entry; absent or malformed
    /// entries yield an empty list.
    pub fn suggested_tools(&self) -> Vec<String> {
        self.metadata
            .get("suggested_tools")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    // Structural mutation

    /// Attach a child task, wiring its parent and agent references.
    pub fn add_subtask(&mut self, mut child: Task) {
        child.parent_id = Some(self.id);
        child.agent_id = self.agent_id;
        self.subtasks.push(child);
        self.touch();
    }

    /// Attach a free-form metadata annotation.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
        self.touch();
    }

    /// Record feedback from an external rater; the rating is clamped to 1..=5.
    /// A repeat rating from the same rater replaces the previous one.
    pub fn add_feedback(&mut self, rater: impl Into<String>, rating: u8, comment: Option<String>) {
        let feedback = TaskFeedback {
            rating: rating.clamp(1, 5),
            comment,
            timestamp: Utc::now(),
        };
        self.feedback.insert(rater.into(), feedback);
        self.touch();
    }

    pub(crate) fn set_agent(&mut self, agent_id: Uuid) {
        self.agent_id = Some(agent_id);
    }

    // State transitions - explicit and validated

    /// Transition to a new status.
    ///
    /// # Postconditions
    /// - `updated_at` is refreshed
    /// - entering a terminal state sets `completed_at`
    ///
    /// # Errors
    /// Returns `Err` if the transition is not part of the state machine.
    pub fn update_status(&mut self, status: TaskStatus) -> Result<(), TaskError> {
        let legal = matches!(
            (self.status, status),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::Pending, TaskStatus::Canceled)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
                | (TaskStatus::InProgress, TaskStatus::Canceled)
        );
        if !legal {
            return Err(TaskError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }
        self.status = status;
        self.touch();
        if status.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// Transition to InProgress.
    ///
    /// # Precondition
    /// `self.status == Pending`
    pub fn start(&mut self) -> Result<(), TaskError> {
        self.update_status(TaskStatus::InProgress)
    }

    /// Transition to Completed, storing the result payload.
    ///
    /// # Precondition
    /// `self.status == InProgress`
    pub fn complete(&mut self, result: Option<String>) -> Result<(), TaskError> {
        self.update_status(TaskStatus::Completed)?;
        self.result = result;
        Ok(())
    }

    /// Transition to Failed, storing the error message.
    ///
    /// # Precondition
    /// `self.status == InProgress`
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TaskError> {
        self.update_status(TaskStatus::Failed)?;
        self.error_message = Some(error.into());
        Ok(())
    }

    /// Transition to Canceled. Available from any non-terminal state.
    pub fn cancel(&mut self) -> Result<(), TaskError> {
        self.update_status(TaskStatus::Canceled)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Errors that can occur during task operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_task_is_pending_with_defaults() {
        let task = Task::new("Research", "Find prior art");
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.priority(), DEFAULT_PRIORITY);
        assert!(task.completed_at().is_none());
        assert!(task.result().is_none());
        assert!(task.error_message().is_none());
        assert!(!task.is_subtask());
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut task = Task::new("Write report", "Draft the report");
        task.start().unwrap();
        assert_eq!(task.status(), TaskStatus::InProgress);
        assert!(task.completed_at().is_none());

        task.complete(Some("done".to_string())).unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.result(), Some("done"));
        assert!(task.completed_at().is_some());
    }

    #[test]
    fn fail_records_error_and_completion_time() {
        let mut task = Task::new("Fetch", "Fetch data");
        task.start().unwrap();
        task.fail("connection refused").unwrap();
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.error_message(), Some("connection refused"));
        assert!(task.completed_at().is_some());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut task = Task::new("t", "d");
        assert!(task.complete(None).is_err());
        assert!(task.fail("nope").is_err());

        task.start().unwrap();
        assert!(task.start().is_err());

        task.complete(None).unwrap();
        assert!(task.start().is_err());
        assert!(task.fail("late").is_err());
        assert!(task.cancel().is_err());
    }

    #[test]
    fn cancel_from_pending_and_in_progress() {
        let mut pending = Task::new("a", "d");
        pending.cancel().unwrap();
        assert_eq!(pending.status(), TaskStatus::Canceled);
        assert!(pending.completed_at().is_some());

        let mut running = Task::new("b", "d");
        running.start().unwrap();
        running.cancel().unwrap();
        assert_eq!(running.status(), TaskStatus::Canceled);
    }

    #[test]
    fn add_subtask_wires_parent_and_agent() {
        let agent = Uuid::new_v4();
        let mut parent = Task::new("parent", "d");
        parent.set_agent(agent);
        parent.add_subtask(Task::new("child", "d"));

        let child = &parent.subtasks()[0];
        assert_eq!(child.parent_id(), Some(parent.id()));
        assert_eq!(child.agent_id(), Some(agent));
        assert!(parent.has_subtasks());
    }

    #[test]
    fn pending_descendants_seen_through_nesting() {
        let mut root = Task::new("root", "d");
        let mut mid = Task::new("mid", "d");
        mid.add_subtask(Task::new("leaf", "d"));
        root.add_subtask(mid);
        assert!(root.has_pending_descendant());

        root.subtasks_mut()[0].subtasks_mut()[0].start().unwrap();
        root.subtasks_mut()[0].subtasks_mut()[0]
            .complete(None)
            .unwrap();
        assert!(!root.has_pending_descendant());
    }

    #[test]
    fn feedback_rating_is_clamped() {
        let mut task = Task::new("t", "d");
        task.add_feedback("alice", 9, Some("great".to_string()));
        task.add_feedback("bob", 0, None);
        assert_eq!(task.feedback()["alice"].rating, 5);
        assert_eq!(task.feedback()["bob"].rating, 1);

        task.add_feedback("alice", 2, None);
        assert_eq!(task.feedback()["alice"].rating, 2);
        assert_eq!(task.feedback().len(), 2);
    }

    #[test]
    fn suggested_tools_reads_metadata() {
        let mut task = Task::new("t", "d");
        assert!(task.suggested_tools().is_empty());

        task.add_metadata("suggested_tools", json!(["web_search", "content_generator"]));
        assert_eq!(
            task.suggested_tools(),
            vec!["web_search".to_string(), "content_generator".to_string()]
        );

        task.add_metadata("suggested_tools", json!("not-a-list"));
        assert!(task.suggested_tools().is_empty());
    }

    #[test]
    fn serde_round_trip_preserves_tree() {
        let mut root = Task::new("root", "d").with_priority(10);
        root.set_agent(Uuid::new_v4());
        root.add_subtask(Task::new("child-a", "d").with_priority(7));
        root.add_subtask(Task::new("child-b", "d"));
        root.subtasks_mut()[0].start().unwrap();
        root.subtasks_mut()[0].complete(Some("ok".to_string())).unwrap();

        let json = serde_json::to_string(&root).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id(), root.id());
        assert_eq!(back.priority(), 10);
        assert_eq!(back.subtasks().len(), 2);
        assert_eq!(back.subtasks()[0].id(), root.subtasks()[0].id());
        assert_eq!(back.subtasks()[0].status(), TaskStatus::Completed);
        assert_eq!(back.subtasks()[0].result(), Some("ok"));
        assert_eq!(back.subtasks()[1].parent_id(), Some(root.id()));
        assert_eq!(back.agent_id(), root.agent_id());
    }
}
