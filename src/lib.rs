//! # Taskforge
//!
//! Autonomous agent engine: an agent takes a goal, breaks it into a priority
//! tree of tasks with an LLM, executes the leaves with its tools, and rolls
//! results and failures back up the tree.
//!
//! This library provides:
//! - A task tree with a validated lifecycle and per-task feedback
//! - A priority execution loop with pause/resume/stop control
//! - Three-tier LLM decomposition with deterministic fallbacks
//! - A bounded experience cache with similarity search per agent
//! - Pluggable persistence (in-memory or SQLite) and post-run learning
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │             Runtime              │
//!        │  (agents + shared collaborators) │
//!        └────────────────┬─────────────────┘
//!                         │
//!                         ▼
//!                ┌─────────────────┐       LlmClient
//!                │      Agent      │──────▶AgentStore
//!                │ (task forest +  │       ToolRegistry
//!                │  control state) │       Learning
//!                └─────────────────┘
//! ```
//!
//! ## Task Flow
//! 1. Seed the goal as the root task (or take a prepared forest)
//! 2. Break tasks down via the reasoning provider
//! 3. Execute leaves in priority order with the agent's tools
//! 4. Aggregate subtask results and failures into their parent
//!
//! ## Modules
//! - `agent`: the agent, its control handle, and the execution loop
//! - `task`: task tree, lifecycle, and feedback
//! - `llm`: reasoning provider abstraction (OpenAI-compatible + mock)
//! - `memory`: bounded experience cache
//! - `tools`: capability registry the engine drives during execution
//! - `store`: persistence providers (in-memory, SQLite)
//! - `learning`: post-run analysis hook
//! - `runtime`: multi-agent ownership and control
//! - `config`: environment-driven configuration

pub mod agent;
pub mod config;
pub mod learning;
pub mod llm;
pub mod memory;
pub mod runtime;
pub mod store;
pub mod task;
pub mod tools;

pub use agent::{Agent, AgentId, AgentStatus, ControlState, RunOutcome};
pub use config::Config;
pub use llm::{LlmClient, MockLlm, OpenAiClient};
pub use memory::ExperienceCache;
pub use runtime::Runtime;
pub use store::{AgentStore, MemoryAgentStore, SqliteAgentStore};
pub use task::{Task, TaskId, TaskStatus};
pub use tools::{Tool, ToolRegistry};

/// Install a tracing subscriber reading `RUST_LOG`, defaulting to
/// `taskforge=debug`.
///
/// Call once at startup. Embedding applications that install their own
/// subscriber should skip this.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("taskforge=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
