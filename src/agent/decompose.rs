//! Decomposition protocol: prompt builders and response parsing.
//!
//! The engine asks the reasoning provider to split a task into children.
//! Parsing is tiered: the full payload (name, description, priority,
//! suggested tools) is tried first, then a stricter reprompt accepting a
//! minimal payload, and finally a canned set of default children so a task
//! never dead-ends on a malformed reply. Provider transport errors are not
//! handled here; they fail the task upstream.

use serde::Deserialize;

use crate::task::DEFAULT_PRIORITY;
use crate::tools::ToolInfo;

/// Subtask from the primary decomposition payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubtaskSpec {
    pub name: String,
    pub description: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Suggested tool names; `None` when the provider omitted the key.
    #[serde(default)]
    pub tools: Option<Vec<String>>,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

/// Subtask from the minimal fallback payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MinimalSpec {
    pub name: String,
    pub description: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    subtasks: Vec<T>,
}

/// Prompt for the primary decomposition attempt.
pub fn primary_prompt(
    goal: &str,
    task_name: &str,
    task_description: &str,
    tools: &[ToolInfo],
) -> String {
    let rendered_tools =
        serde_json::to_string_pretty(tools).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"You are an AI agent whose job is to break tasks into smaller, more actionable steps.

Overall goal: {goal}

Task to break down:
Name: {task_name}
Description: {task_description}

Tools available to you:
{rendered_tools}

Break this task into 3-7 smaller steps that are logical and well connected.

Answer in the following JSON format:
{{
    "subtasks": [
        {{
            "name": "subtask 1 name",
            "description": "detailed description of subtask 1",
            "priority": 5,
            "tools": ["tool_name_1", "tool_name_2"]
        }},
        ...
    ]
}}"#
    )
}

/// Stricter reprompt used when the primary response did not parse.
pub fn minimal_reprompt(task_description: &str) -> String {
    format!(
        r#"I could not understand your previous response. Please break the task "{task_description}" into smaller steps.

Answer only with JSON in the following format:
{{
    "subtasks": [
        {{
            "name": "subtask name",
            "description": "detailed description"
        }},
        ...
    ]
}}"#
    )
}

/// Parse the primary payload. `None` means fall through to the next tier.
pub fn parse_primary(response: &str) -> Option<Vec<SubtaskSpec>> {
    serde_json::from_str::<Envelope<SubtaskSpec>>(extract_json(response))
        .ok()
        .map(|envelope| envelope.subtasks)
}

/// Parse the minimal payload. `None` means fall through to default children.
pub fn parse_minimal(response: &str) -> Option<Vec<MinimalSpec>> {
    serde_json::from_str::<Envelope<MinimalSpec>>(extract_json(response))
        .ok()
        .map(|envelope| envelope.subtasks)
}

/// The canned last-resort children for a task that resisted decomposition.
pub fn default_children(task_description: &str) -> Vec<MinimalSpec> {
    vec![
        MinimalSpec {
            name: "Research".to_string(),
            description: format!("Gather information about {task_description}"),
        },
        MinimalSpec {
            name: "Analysis".to_string(),
            description: format!("Analyze the information related to {task_description}"),
        },
        MinimalSpec {
            name: "Execution".to_string(),
            description: format!("Execute the primary actions for {task_description}"),
        },
        MinimalSpec {
            name: "Summary".to_string(),
            description: format!("Summarize findings and results from {task_description}"),
        },
    ]
}

/// Unwrap a Markdown code fence if the provider added one.
fn extract_json(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(fenced) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let fenced = fenced.strip_prefix("json").unwrap_or(fenced);
    fenced.strip_suffix("```").unwrap_or(fenced).trim()
}
