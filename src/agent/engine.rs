//! The execution loop: scheduling, decomposition, direct execution, and
//! composite settlement.
//!
//! The engine borrows the mutable halves of an [`super::Agent`] (forest,
//! history, cache) for the duration of a run so the loop can mutate them while
//! the immutable collaborators stay shared. Control state is observed between
//! tasks, never mid-task: a stop request lets the current task finish, a pause
//! parks the loop before the next one.
//!
//! Persistence is strictly best-effort here. Store failures are logged and
//! swallowed; an unreachable store never changes what the loop does.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_recursion::async_recursion;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;

use crate::llm::{LlmClient, LlmError};
use crate::memory::ExperienceCache;
use crate::store::AgentStore;
use crate::task::{Task, TaskError, TaskId, TaskStatus};
use crate::tools::{Tool, ToolInfo, ToolRegistry};

use super::control::{ControlHandle, ControlState};
use super::decompose;
use super::{AgentError, AgentId, HistoryEntry};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The loop drained the forest; no runnable task remained.
    Completed,
    /// A stop request ended the loop between tasks.
    Stopped,
    /// The loop aborted on an internal fault (an illegal task transition).
    Faulted(String),
}

/// How the inner loop ended; the caller folds this into [`RunOutcome`].
#[derive(Debug)]
pub(super) enum LoopEnd {
    Completed,
    Stopped,
}

/// Fault that aborts the loop. Provider and tool errors never end up here;
/// they become task failures.
#[derive(Debug, Error)]
pub(super) enum EngineError {
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl From<EngineError> for AgentError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Task(e) => AgentError::Task(e),
        }
    }
}

/// Mutable view over one agent for the duration of a run.
pub(super) struct Engine<'a> {
    pub(super) agent_id: AgentId,
    pub(super) agent_name: &'a str,
    pub(super) goal: &'a str,
    pub(super) llm: Arc<dyn LlmClient>,
    pub(super) store: Option<Arc<dyn AgentStore>>,
    pub(super) tools: &'a ToolRegistry,
    pub(super) memory: &'a mut ExperienceCache,
    pub(super) history: &'a mut Vec<HistoryEntry>,
    pub(super) control: ControlHandle,
    pub(super) pause_poll: Duration,
}

impl Engine<'_> {
    /// Drive the forest to quiescence.
    ///
    /// `decompose_first` names a freshly seeded goal task to break down before
    /// the first scheduling pass.
    pub(super) async fn drive(
        &mut self,
        tasks: &mut [Task],
        decompose_first: Option<TaskId>,
    ) -> Result<LoopEnd, EngineError> {
        let goal = self.goal;
        self.log("Agent Started", format!("Starting with goal: {goal}"))
            .await;

        if let Some(id) = decompose_first {
            if let Some(task) = tasks.iter_mut().find(|t| t.id() == id) {
                self.breakdown_task(task).await?;
            }
        }

        self.run_loop(tasks).await
    }

    /// Repeated scheduling passes over the top-level tasks.
    ///
    /// Each pass snapshots the runnable set, sorted by priority (descending)
    /// with creation time as the tie-break, and executes it in order. Passes
    /// repeat because executing a task can make it runnable again: a
    /// decomposed task stays pending, and a composite stays in progress until
    /// its subtree settles. The loop ends when a pass finds nothing runnable.
    async fn run_loop(&mut self, tasks: &mut [Task]) -> Result<LoopEnd, EngineError> {
        loop {
            if self.control.state() == ControlState::Stopped {
                self.log("Agent Stopped", "Manual stop requested".to_string())
                    .await;
                return Ok(LoopEnd::Stopped);
            }

            let mut runnable: Vec<(i32, DateTime<Utc>, TaskId)> = tasks
                .iter()
                .filter(|t| is_runnable(t))
                .map(|t| (t.priority(), t.created_at(), t.id()))
                .collect();
            if runnable.is_empty() {
                break;
            }
            runnable.sort_by_key(|(priority, created, _)| (Reverse(*priority), *created));

            for (_, _, id) in runnable {
                self.wait_if_paused().await;
                if self.control.state() == ControlState::Stopped {
                    self.log("Agent Stopped", "Manual stop requested".to_string())
                        .await;
                    return Ok(LoopEnd::Stopped);
                }
                let Some(task) = tasks.iter_mut().find(|t| t.id() == id) else {
                    continue;
                };
                self.execute_task(task).await?;
            }
        }

        self.log(
            "All Tasks Completed",
            "Agent finished executing all tasks".to_string(),
        )
        .await;
        Ok(LoopEnd::Completed)
    }

    /// Park while paused, recording the transitions the loop observed.
    async fn wait_if_paused(&mut self) {
        if !self.control.is_paused() {
            return;
        }
        self.log("Agent Paused", "Execution paused".to_string()).await;
        while self.control.is_paused() {
            tokio::time::sleep(self.pause_poll).await;
        }
        if self.control.state() == ControlState::Running {
            self.log("Agent Resumed", "Execution resumed".to_string())
                .await;
        }
    }

    #[async_recursion]
    async fn execute_task(&mut self, task: &mut Task) -> Result<(), EngineError> {
        if task.has_subtasks() {
            self.execute_composite(task).await
        } else {
            self.execute_direct(task).await
        }
    }

    /// Drive a composite's children in priority order, then settle the parent.
    async fn execute_composite(&mut self, task: &mut Task) -> Result<(), EngineError> {
        let name = task.name().to_string();
        if task.status() == TaskStatus::Pending {
            self.log("Task Started", format!("Executing '{name}'")).await;
            task.start()?;
            self.checkpoint_task(task).await;
        }

        let mut runnable: Vec<(i32, DateTime<Utc>, TaskId)> = task
            .subtasks()
            .iter()
            .filter(|t| is_runnable(t))
            .map(|t| (t.priority(), t.created_at(), t.id()))
            .collect();
        runnable.sort_by_key(|(priority, created, _)| (Reverse(*priority), *created));

        for (_, _, id) in runnable {
            self.wait_if_paused().await;
            if self.control.state() == ControlState::Stopped {
                // The outer loop records the stop; the subtree stays as-is
                // and is picked up again on the next run.
                return Ok(());
            }
            let Some(child) = task.subtasks_mut().iter_mut().find(|t| t.id() == id) else {
                continue;
            };
            self.execute_task(child).await?;
        }

        self.judge_composite(task).await
    }

    /// Settle a composite whose runnable children have been driven: failures
    /// aggregate into the parent, a fully completed set gets summarized, and
    /// anything still active leaves the parent in progress.
    async fn judge_composite(&mut self, task: &mut Task) -> Result<(), EngineError> {
        if task.subtasks().iter().any(|t| t.status().is_active()) {
            return Ok(());
        }

        let failed: Vec<String> = task
            .subtasks()
            .iter()
            .filter(|t| t.status() == TaskStatus::Failed)
            .map(|t| {
                format!(
                    "{}: {}",
                    t.name(),
                    t.error_message().unwrap_or("Unknown error")
                )
            })
            .collect();

        if !failed.is_empty() {
            let name = task.name().to_string();
            let reasons = failed.join("; ");
            task.fail(format!("Subtasks failed: {reasons}"))?;
            self.checkpoint_task(task).await;
            self.log(
                "Task Failed",
                format!("'{name}' failed due to subtask failures"),
            )
            .await;
            let record = json!({
                "task_name": task.name(),
                "task_description": task.description(),
                "error": reasons,
                "subtasks": task.subtasks().iter().map(shallow_task_json).collect::<Vec<_>>(),
            });
            self.memory
                .add("failed_task", record, Some(success_meta(false)));
            return Ok(());
        }

        if task
            .subtasks()
            .iter()
            .all(|t| t.status() == TaskStatus::Completed)
        {
            return self.summarize_composite(task).await;
        }

        // Completed/Canceled mix: nothing failed, nothing to summarize.
        Ok(())
    }

    /// Merge completed child results into the parent via the provider.
    async fn summarize_composite(&mut self, task: &mut Task) -> Result<(), EngineError> {
        let name = task.name().to_string();
        let results_text = task
            .subtasks()
            .iter()
            .map(|t| format!("{}: {}", t.name(), t.result().unwrap_or_default()))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = summary_prompt(task.name(), task.description(), &results_text);

        match self.llm.generate(&prompt, None).await {
            Ok(summary) => {
                task.complete(Some(summary.clone()))?;
                self.checkpoint_task(task).await;
                self.log(
                    "Task Completed",
                    format!("'{name}' completed with all subtasks"),
                )
                .await;
                let record = json!({
                    "task_name": task.name(),
                    "task_description": task.description(),
                    "result": summary,
                    "subtasks": task.subtasks().iter().map(shallow_task_json).collect::<Vec<_>>(),
                });
                self.memory
                    .add("completed_task", record, Some(success_meta(true)));
            }
            Err(e) => {
                tracing::error!(
                    agent = %self.agent_name,
                    task = %name,
                    error = %e,
                    "error generating summary"
                );
                task.fail(format!("Error generating summary: {e}"))?;
                self.checkpoint_task(task).await;
            }
        }
        Ok(())
    }

    /// Execute a leaf through the provider and its suggested tools.
    async fn execute_direct(&mut self, task: &mut Task) -> Result<(), EngineError> {
        let name = task.name().to_string();
        self.log("Task Started", format!("Executing '{name}'")).await;
        task.start()?;
        self.checkpoint_task(task).await;

        // Unknown suggested names are skipped, not errors.
        let resolved: Vec<Arc<dyn Tool>> = task
            .suggested_tools()
            .iter()
            .filter_map(|n| self.tools.find(n))
            .collect();

        let catalog = self.tools.list_tools();
        let context = json!({
            "agent_goal": self.goal,
            "task_name": task.name(),
            "task_description": task.description(),
            "available_tools": catalog,
        });
        let prompt = direct_prompt(self.goal, task.name(), task.description(), &catalog);

        match self.perform_direct(task, &resolved, &prompt, &context).await {
            Ok(result) => {
                task.complete(Some(result.clone()))?;
                self.checkpoint_task(task).await;
                self.log("Task Completed", format!("'{name}' executed directly"))
                    .await;
                let record = json!({
                    "task_name": task.name(),
                    "task_description": task.description(),
                    "prompt": prompt,
                    "result": result,
                    "tools_used": resolved.iter().map(|t| t.name()).collect::<Vec<_>>(),
                });
                self.memory
                    .add("direct_task", record, Some(success_meta(true)));
            }
            Err(e) => {
                let message = e.to_string();
                task.fail(message.clone())?;
                self.checkpoint_task(task).await;
                self.log(
                    "Task Failed",
                    format!("'{name}' failed with error: {message}"),
                )
                .await;
                let record = json!({
                    "task_name": task.name(),
                    "task_description": task.description(),
                    "error": message,
                });
                self.memory
                    .add("direct_task", record, Some(success_meta(false)));
            }
        }
        Ok(())
    }

    /// The direct-execution conversation: a primary answer, one instruction
    /// pass per resolved tool, and an integration pass when tools produced
    /// output. A tool that errors contributes its failure line instead of
    /// failing the task; provider errors abort the whole conversation.
    async fn perform_direct(
        &self,
        task: &Task,
        tools: &[Arc<dyn Tool>],
        prompt: &str,
        context: &Value,
    ) -> Result<String, LlmError> {
        let mut result = self.llm.generate(prompt, Some(context)).await?;

        if !tools.is_empty() {
            let mut tool_lines = Vec::new();
            for tool in tools {
                let ask = tool_prompt(task.description(), tool.name(), tool.description());
                let instructions = self.llm.generate(&ask, None).await?;
                match tool.run(task.description(), &instructions).await {
                    Ok(out) => tool_lines.push(format!("Tool {} result: {}", tool.name(), out)),
                    Err(e) => tool_lines.push(format!("Tool {} failed: {}", tool.name(), e)),
                }
            }
            if !tool_lines.is_empty() {
                let merged =
                    integration_prompt(task.description(), &result, &tool_lines.join("\n"));
                result = self.llm.generate(&merged, None).await?;
            }
        }

        Ok(result)
    }

    /// Split a task into children via the three-tier decomposition protocol:
    /// the full payload, a minimal reprompt, then canned default children.
    ///
    /// On success the task stays pending so the scheduler picks the new
    /// children up in its next pass. Provider transport errors fail the task.
    pub(super) async fn breakdown_task(&mut self, task: &mut Task) -> Result<(), EngineError> {
        let name = task.name().to_string();
        self.log("Task Breakdown Started", format!("Breaking down task: {name}"))
            .await;

        let catalog = self.tools.list_tools();
        let context = json!({
            "agent_goal": self.goal,
            "task_name": task.name(),
            "task_description": task.description(),
            "available_tools": catalog,
        });
        let prompt =
            decompose::primary_prompt(self.goal, task.name(), task.description(), &catalog);

        let response = match self.llm.generate(&prompt, Some(&context)).await {
            Ok(response) => response,
            Err(e) => return self.breakdown_error(task, e).await,
        };
        self.log(
            "LLM Response",
            "Received response for task breakdown".to_string(),
        )
        .await;

        if let Some(specs) = decompose::parse_primary(&response) {
            let count = specs.len();
            for spec in specs {
                let mut child = Task::new(spec.name, spec.description).with_priority(spec.priority);
                if let Some(tools) = spec.tools {
                    child.add_metadata("suggested_tools", json!(tools));
                }
                task.add_subtask(child);
            }
            self.checkpoint_subtree(task).await;
            self.log(
                "Task Breakdown Completed",
                format!("Divided '{name}' into {count} subtasks"),
            )
            .await;
            return Ok(());
        }

        tracing::warn!(
            agent = %self.agent_name,
            task = %name,
            "unparseable decomposition payload, reprompting"
        );
        let reprompt = decompose::minimal_reprompt(task.description());
        let response = match self.llm.generate(&reprompt, None).await {
            Ok(response) => response,
            Err(e) => return self.breakdown_error(task, e).await,
        };

        if let Some(specs) = decompose::parse_minimal(&response) {
            let count = specs.len();
            for spec in specs {
                task.add_subtask(Task::new(spec.name, spec.description));
            }
            self.checkpoint_subtree(task).await;
            self.log(
                "Task Breakdown Completed (Fallback)",
                format!("Divided '{name}' into {count} subtasks using fallback method"),
            )
            .await;
            return Ok(());
        }

        self.log(
            "Task Breakdown Failed",
            format!("Could not break down '{name}' properly. Creating default subtasks."),
        )
        .await;
        for spec in decompose::default_children(task.description()) {
            task.add_subtask(Task::new(spec.name, spec.description));
        }
        self.checkpoint_subtree(task).await;
        Ok(())
    }

    /// A transport error during decomposition fails the task.
    async fn breakdown_error(
        &mut self,
        task: &mut Task,
        error: LlmError,
    ) -> Result<(), EngineError> {
        tracing::error!(
            agent = %self.agent_name,
            task = %task.name(),
            error = %error,
            "error during task breakdown"
        );
        self.log("Task Breakdown Error", format!("Error: {error}")).await;
        if task.status() == TaskStatus::Pending {
            task.start()?;
        }
        task.fail(format!("Could not break down task: {error}"))?;
        self.checkpoint_task(task).await;
        Ok(())
    }

    /// Record an action in the tracing stream, the log store, and the
    /// in-memory history. Never fails.
    async fn log(&mut self, action: &str, details: String) {
        tracing::info!(agent = %self.agent_name, action, %details);
        let entry = HistoryEntry::new(action, details);
        if let Some(store) = &self.store {
            if let Err(e) = store.append_log(self.agent_id, &entry).await {
                tracing::warn!(agent = %self.agent_name, error = %e, "log append failed");
            }
        }
        self.history.push(entry);
    }

    /// Best-effort save of one task's current state.
    async fn checkpoint_task(&self, task: &Task) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_task(self.agent_id, task).await {
                tracing::warn!(
                    agent = %self.agent_name,
                    task = %task.id(),
                    error = %e,
                    "task checkpoint failed"
                );
            }
        }
    }

    /// Checkpoint a freshly decomposed parent and each new child.
    async fn checkpoint_subtree(&self, task: &Task) {
        self.checkpoint_task(task).await;
        for child in task.subtasks() {
            self.checkpoint_task(child).await;
        }
    }
}

/// Whether the scheduler should pick a task up: never started, or started
/// but left with unfinished work underneath by an earlier stop.
fn is_runnable(task: &Task) -> bool {
    match task.status() {
        TaskStatus::Pending => true,
        TaskStatus::InProgress => task.has_pending_descendant(),
        _ => false,
    }
}

/// One-level snapshot of a task for experience records.
fn shallow_task_json(task: &Task) -> Value {
    json!({
        "id": task.id(),
        "name": task.name(),
        "description": task.description(),
        "status": task.status(),
        "priority": task.priority(),
        "result": task.result(),
        "error_message": task.error_message(),
    })
}

fn success_meta(success: bool) -> HashMap<String, Value> {
    HashMap::from([("success".to_string(), Value::Bool(success))])
}

fn direct_prompt(goal: &str, task_name: &str, task_description: &str, tools: &[ToolInfo]) -> String {
    let rendered_tools = serde_json::to_string_pretty(tools).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"You are an AI agent whose job is to execute the following task based on the provided information.

Overall goal: {goal}

Task to execute:
Name: {task_name}
Description: {task_description}

Tools available to you:
{rendered_tools}

Execute the task and provide a detailed and comprehensive result."#
    )
}

fn tool_prompt(task_description: &str, tool_name: &str, tool_description: &str) -> String {
    format!(
        r#"I need to use the "{tool_name}" tool to carry out the task:
{task_description}

Tool description: {tool_description}

How can I use this tool effectively to carry out the task? Provide precise and detailed inputs for using the tool."#
    )
}

fn integration_prompt(task_description: &str, result: &str, tools_output: &str) -> String {
    format!(
        r#"I have executed the task:
{task_description}

And reached the following result:
{result}

I also used the following tools:
{tools_output}

Merge the tool results with the main result into a comprehensive, integrated answer."#
    )
}

fn summary_prompt(task_name: &str, task_description: &str, results_text: &str) -> String {
    format!(
        r#"You are an AI agent summarizing and merging subtask results into a single comprehensive outcome.

Main task: {task_name}
Task description: {task_description}

Subtask results:
{results_text}

Summarize these results into a comprehensive, coherent answer. Provide an analysis of the results and final conclusions."#
    )
}
