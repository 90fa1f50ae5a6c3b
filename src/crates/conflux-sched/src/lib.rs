//! # conflux-sched: resource-aware dependency scheduling
//!
//! A scheduling subsystem that drives heterogeneous task graphs through
//! bounded resources:
//!
//! - [`DependencyGraph`]: keyed nodes in a six-state machine
//!   (`pending → ready → running → completed`, with `fail` as the retry
//!   edge and `abort` cascading through dependents), announcing every
//!   newly-ready node synchronously.
//! - [`ResourceCapacitySource`]: hierarchical multi-resource counters
//!   with atomic all-or-nothing acquisition and release signaling.
//! - [`PriorityDependencySource`]: an aging priority queue over the
//!   graph's ready set with FIFO tie-breaks.
//! - [`TaskPool`]: the peek-check-acquire-run-release loop, emitting
//!   [`TaskProgress`] envelopes as an async stream.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use conflux_sched::{
//!     AgingPolicy, DependencyGraph, PriorityDependencySource, ResourceCapacitySource,
//!     ResourceCost, ScheduledTask, TaskPool, TaskRunner,
//! };
//! use futures::StreamExt;
//!
//! # async fn example() -> conflux_sched::Result<()> {
//! let source = PriorityDependencySource::new(
//!     DependencyGraph::new(),
//!     Arc::new(|_key: &String| 1.0),
//!     AgingPolicy::none(),
//! );
//! source.add_task(
//!     ScheduledTask::new("fetch".to_string(), TaskRunner::one_shot(|| async { Ok(1) }))
//!         .with_cost(ResourceCost::slots(1)),
//!     &[],
//! )?;
//!
//! let capacity = ResourceCapacitySource::new("root", ResourceCost::slots(2));
//! let pool = TaskPool::new(source, capacity);
//! let mut stream = Box::pin(pool.run_tasks(false));
//! while let Some(envelope) = stream.next().await {
//!     println!("{:?}", envelope?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Failure handling is structured rather than thrown: a failed runner
//! surfaces as a [`TaskProgress::Error`] envelope (or the stream's `Err`
//! item under `stop_on_error`), and an `on_error` hook that calls
//! [`PriorityDependencySource::fail`] puts the node back in the ready
//! queue for a retry without its cost ever being double-counted.

pub mod capacity;
pub mod cost;
pub mod error;
pub mod graph;
pub mod pool;
pub mod priority;
pub mod task;

pub use capacity::ResourceCapacitySource;
pub use cost::{ResourceCost, CAPACITY};
pub use error::{Result, SchedError};
pub use graph::{DependencyGraph, NodeState, ReadyObserver, StateTransition};
pub use pool::TaskPool;
pub use priority::{AgingPolicy, PriorityDependencySource, PriorityFn};
pub use task::{
    CompleteHook, ErrorHook, RunnerInvocation, ScheduledTask, TaskProgress, TaskRunner,
};
