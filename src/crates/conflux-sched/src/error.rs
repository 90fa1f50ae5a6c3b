//! Error types for graph bookkeeping, capacity accounting and task runs.

use thiserror::Error;

/// Errors surfaced by the scheduling subsystem.
#[derive(Debug, Error)]
pub enum SchedError {
    /// A node key was added twice.
    #[error("node '{0}' already exists")]
    DuplicateNode(String),

    /// An operation referenced a key the graph does not know.
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    /// A state-machine operation was applied in the wrong state.
    #[error("node '{key}' is {actual}, expected {expected}")]
    InvalidTransition {
        key: String,
        expected: &'static str,
        actual: String,
    },

    /// `acquire_immediate` was called without enough capacity.
    #[error("resource '{resource}' has {available}, needs {needed}")]
    Insufficient {
        resource: String,
        needed: u64,
        available: u64,
    },

    /// A key was consumed or inspected without a registered task.
    #[error("no task registered for '{0}'")]
    UnknownTask(String),

    /// A key was consumed that is not in the ready queue.
    #[error("task '{0}' is not queued as ready")]
    NotQueued(String),

    /// A streaming runner ended without producing a final output.
    #[error("task '{0}' streamed no output")]
    EmptyStream(String),

    /// A task runner failed.
    #[error("task failed: {0}")]
    Task(String),
}

impl SchedError {
    /// Construct a task-failure error from anything string-like.
    pub fn task(msg: impl Into<String>) -> Self {
        Self::Task(msg.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SchedError>;
