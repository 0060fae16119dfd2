//! Post-run learning hook.
//!
//! After a run completes naturally the agent hands itself to its learning
//! collaborator for analysis. The hook is advisory: an error here is logged
//! by the caller and never changes the run outcome. The built-in
//! [`RunDigestLearning`] condenses the run into a digest and reports it on
//! the tracing stream; richer implementations can mine the task forest and
//! experience cache for whatever they need.

use async_trait::async_trait;

use crate::agent::{Agent, TaskCounts};
use crate::task::{Task, TaskStatus};

/// Post-run analysis collaborator.
#[async_trait]
pub trait Learning: Send + Sync {
    /// Analyze a finished run. Called once per natural completion, after the
    /// final history entry and before the agent returns to idle.
    async fn analyze(&self, agent: &Agent) -> Result<(), String>;
}

/// One failed task noted in a digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub name: String,
    pub error: String,
}

/// Condensed view of a finished run.
#[derive(Debug, Clone)]
pub struct RunDigest {
    pub agent_name: String,
    pub goal: String,
    pub counts: TaskCounts,
    /// Failed tasks anywhere in the forest, in traversal order.
    pub failures: Vec<TaskFailure>,
    pub cache_records: usize,
}

impl RunDigest {
    pub fn from_agent(agent: &Agent) -> Self {
        fn collect(tasks: &[Task], failures: &mut Vec<TaskFailure>) {
            for task in tasks {
                if task.status() == TaskStatus::Failed {
                    failures.push(TaskFailure {
                        name: task.name().to_string(),
                        error: task
                            .error_message()
                            .unwrap_or("Unknown error")
                            .to_string(),
                    });
                }
                collect(task.subtasks(), failures);
            }
        }
        let mut failures = Vec::new();
        collect(agent.tasks(), &mut failures);
        Self {
            agent_name: agent.name().to_string(),
            goal: agent.goal().to_string(),
            counts: agent.task_counts(),
            failures,
            cache_records: agent.memory().len(),
        }
    }
}

/// Default learning pass: condense the run and report it at info level.
#[derive(Debug, Default)]
pub struct RunDigestLearning;

#[async_trait]
impl Learning for RunDigestLearning {
    async fn analyze(&self, agent: &Agent) -> Result<(), String> {
        let digest = RunDigest::from_agent(agent);
        tracing::info!(
            agent = %digest.agent_name,
            goal = %digest.goal,
            total = digest.counts.total,
            completed = digest.counts.completed,
            failed = digest.counts.failed,
            cache_records = digest.cache_records,
            "run digest"
        );
        for failure in &digest.failures {
            tracing::info!(
                agent = %digest.agent_name,
                task = %failure.name,
                error = %failure.error,
                "failure noted"
            );
        }
        Ok(())
    }
}
