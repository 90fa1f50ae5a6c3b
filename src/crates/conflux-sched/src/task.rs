//! Task descriptors and the progress envelope emitted by the pool runner.

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cost::ResourceCost;
use crate::error::{Result, SchedError};

/// Hook invoked after a task completes successfully.
pub type CompleteHook<K> = Arc<dyn Fn(&K) + Send + Sync>;

/// Hook invoked after a task fails; typically returns the node to ready
/// through the priority source for a retry.
pub type ErrorHook<K> = Arc<dyn Fn(&K, &SchedError) + Send + Sync>;

/// How a task produces output. Runners are `FnMut` factories so a retried
/// task can be invoked again from scratch.
pub enum TaskRunner<O> {
    /// Resolves to a single final output.
    OneShot(Box<dyn FnMut() -> BoxFuture<'static, Result<O>> + Send>),
    /// Yields intermediate outputs; the stream's last item is the final
    /// output.
    Streaming(Box<dyn FnMut() -> BoxStream<'static, Result<O>> + Send>),
}

impl<O: Send + 'static> TaskRunner<O> {
    /// One-shot runner from an async closure.
    pub fn one_shot<F, Fut>(mut f: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<O>> + Send + 'static,
    {
        Self::OneShot(Box::new(move || f().boxed()))
    }

    /// Streaming runner from a stream-returning closure.
    pub fn streaming<F>(mut f: F) -> Self
    where
        F: FnMut() -> BoxStream<'static, Result<O>> + Send + 'static,
    {
        Self::Streaming(Box::new(move || f()))
    }
}

/// A live invocation produced by calling a runner once.
pub enum RunnerInvocation<O> {
    Future(BoxFuture<'static, Result<O>>),
    Stream(BoxStream<'static, Result<O>>),
}

/// A schedulable unit of work keyed into the dependency graph.
pub struct ScheduledTask<K, O> {
    pub key: K,
    pub runner: TaskRunner<O>,
    pub cost: ResourceCost,
    pub on_complete: Option<CompleteHook<K>>,
    pub on_error: Option<ErrorHook<K>>,
}

impl<K, O: Send + 'static> ScheduledTask<K, O> {
    pub fn new(key: K, runner: TaskRunner<O>) -> Self {
        Self {
            key,
            runner,
            cost: ResourceCost::none(),
            on_complete: None,
            on_error: None,
        }
    }

    pub fn with_cost(mut self, cost: ResourceCost) -> Self {
        self.cost = cost;
        self
    }

    pub fn on_complete(mut self, hook: impl Fn(&K) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&K, &SchedError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Invoke the runner, producing one live invocation.
    pub(crate) fn invoke(&mut self) -> RunnerInvocation<O> {
        match &mut self.runner {
            TaskRunner::OneShot(f) => RunnerInvocation::Future(f()),
            TaskRunner::Streaming(f) => RunnerInvocation::Stream(f()),
        }
    }
}

/// Progress envelope emitted by the pool runner, one per observable task
/// event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskProgress<K, O> {
    /// A streaming task yielded a partial result.
    Intermediate { task_id: K, value: O },
    /// A task completed successfully.
    Final { task_id: K, value: O },
    /// A task failed; the message is the runner's error rendering.
    Error { task_id: K, error: String },
}

impl<K, O> TaskProgress<K, O> {
    pub fn task_id(&self) -> &K {
        match self {
            TaskProgress::Intermediate { task_id, .. }
            | TaskProgress::Final { task_id, .. }
            | TaskProgress::Error { task_id, .. } => task_id,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, TaskProgress::Final { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TaskProgress::Error { .. })
    }
}
