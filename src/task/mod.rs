//! Task module - the work-tree data model and its state machine.
//!
//! Tasks are plain data with validated transitions; everything that *drives*
//! them (scheduling, decomposition, execution) lives in `crate::agent`.

pub mod task;

pub use task::{Task, TaskError, TaskFeedback, TaskId, TaskStatus, DEFAULT_PRIORITY};
