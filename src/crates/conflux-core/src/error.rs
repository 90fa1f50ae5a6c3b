//! Error types for pipeline construction and execution
//!
//! All errors implement `std::error::Error` via the `thiserror` crate. A
//! stage-work error (a user-supplied transform, predicate or callback
//! failing) propagates to the caller of the protocol operation and leaves
//! the stage open; only `finish`/`fault` close a stage.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by pipeline stages.
#[derive(Debug, Error)]
pub enum FlowError {
    /// A user-supplied closure inside a stage failed.
    #[error("stage '{stage}' failed: {message}")]
    Stage {
        /// Name of the stage whose work failed
        stage: String,
        /// Error description
        message: String,
    },

    /// A protocol operation was invoked in a state that forbids it.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A timeout stage exceeded its deadline with `throw_on_timeout` set.
    #[error("upstream pull exceeded deadline of {0:?}")]
    Timeout(Duration),

    /// A reorder stage ran out of buffer space waiting for the next key.
    #[error("reorder buffer exceeded capacity of {cap} while waiting for key {waiting_for}")]
    ReorderOverflow {
        /// Configured buffer capacity
        cap: usize,
        /// The monotonic key the stage is blocked on
        waiting_for: u64,
    },

    /// A distribute selector produced an out-of-range branch index.
    #[error("selector chose branch {index} but only {branches} branches exist")]
    BranchIndex {
        /// Index returned by the selector
        index: usize,
        /// Number of wired branches
        branches: usize,
    },

    /// Free-form error, mostly raised from user closures.
    #[error("{0}")]
    Message(String),
}

impl FlowError {
    /// Construct a free-form error from anything string-like.
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }

    /// Construct a stage-work error.
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FlowError>;
