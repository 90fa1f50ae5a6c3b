//! The scheduling loop: drive ready tasks through bounded resources and
//! stream their progress.
//!
//! Each cycle peeks the best ready task, checks affordability, then
//! acquires resources and consumes the task with no suspension point in
//! between, so the check-then-act pair cannot interleave with another
//! mutation. Runners execute on spawned tasks and funnel their events back
//! through a channel; the loop releases resources, fires hooks and feeds
//! the dependency graph as events arrive. When nothing is startable the
//! loop sleeps on whichever fires first: a runner event, a "became ready"
//! signal, or a capacity release.

use futures::stream::Stream;
use futures::StreamExt;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::capacity::ResourceCapacitySource;
use crate::cost::ResourceCost;
use crate::error::{Result, SchedError};
use crate::graph::NodeState;
use crate::priority::PriorityDependencySource;
use crate::task::{RunnerInvocation, TaskProgress};

enum RunnerEvent<K, O> {
    Intermediate(K, O),
    Final(K, O),
    Failed(K, SchedError),
}

enum Wake<K, O> {
    Event(RunnerEvent<K, O>),
    Ready,
    Released,
    Closed,
}

struct Flight {
    cost: ResourceCost,
    handle: JoinHandle<()>,
}

/// In-flight registry that aborts runners and returns their resources if
/// the envelope stream is dropped mid-run.
struct FlightGuard<K> {
    capacity: Arc<ResourceCapacitySource>,
    inflight: HashMap<K, Flight>,
}

impl<K: Eq + Hash> FlightGuard<K> {
    fn new(capacity: Arc<ResourceCapacitySource>) -> Self {
        Self {
            capacity,
            inflight: HashMap::new(),
        }
    }

    fn insert(&mut self, key: K, cost: ResourceCost, handle: JoinHandle<()>) {
        self.inflight.insert(key, Flight { cost, handle });
    }

    fn remove(&mut self, key: &K) -> Option<ResourceCost> {
        self.inflight.remove(key).map(|f| f.cost)
    }

    fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}

impl<K> Drop for FlightGuard<K> {
    fn drop(&mut self) {
        for (_, flight) in self.inflight.drain() {
            flight.handle.abort();
            self.capacity.release(&flight.cost);
        }
    }
}

/// Runs scheduled tasks from a priority source under a capacity source,
/// emitting [`TaskProgress`] envelopes.
pub struct TaskPool<K, O> {
    source: Arc<PriorityDependencySource<K, O>>,
    capacity: Arc<ResourceCapacitySource>,
}

impl<K, O> TaskPool<K, O>
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new(
        source: Arc<PriorityDependencySource<K, O>>,
        capacity: Arc<ResourceCapacitySource>,
    ) -> Self {
        Self { source, capacity }
    }

    /// Drive the pool to completion, streaming progress envelopes.
    ///
    /// With `stop_on_error` the first task failure is rethrown as the
    /// stream's `Err` item and the pool tears down (in-flight runners are
    /// aborted, held resources released). Without it, failures surface as
    /// [`TaskProgress::Error`] envelopes and the loop keeps going.
    ///
    /// Dropping the stream mid-run has the same teardown behavior as
    /// `stop_on_error`: cooperative cancellation of in-flight runners and
    /// release of everything still held.
    pub fn run_tasks(
        &self,
        stop_on_error: bool,
    ) -> impl Stream<Item = Result<TaskProgress<K, O>>> + Send + 'static {
        let source = self.source.clone();
        let capacity = self.capacity.clone();

        async_stream::stream! {
            let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<RunnerEvent<K, O>>();
            let mut flight = FlightGuard::new(capacity.clone());

            loop {
                // Launch everything affordable, best-first.
                if let Err(e) = launch_ready(&source, &capacity, &ev_tx, &mut flight) {
                    yield Err(e);
                    return;
                }
                if source.is_done() && flight.is_empty() {
                    break;
                }

                let wake = tokio::select! {
                    ev = ev_rx.recv() => match ev {
                        Some(ev) => Wake::Event(ev),
                        None => Wake::Closed,
                    },
                    _ = source.wait_ready() => Wake::Ready,
                    _ = capacity.wait_release() => Wake::Released,
                };

                match wake {
                    Wake::Event(RunnerEvent::Intermediate(key, value)) => {
                        yield Ok(TaskProgress::Intermediate { task_id: key, value });
                    }
                    Wake::Event(RunnerEvent::Final(key, value)) => {
                        let cost = flight.remove(&key);
                        if let Err(e) = source.complete(&key) {
                            tracing::warn!(task = %key, error = %e, "completion bookkeeping failed");
                        }
                        let (on_complete, _) = source.hooks_of(&key);
                        if let Some(hook) = on_complete {
                            hook(&key);
                        }
                        if let Some(cost) = cost {
                            capacity.release(&cost);
                        }
                        tracing::debug!(task = %key, "task completed");
                        yield Ok(TaskProgress::Final { task_id: key, value });
                    }
                    Wake::Event(RunnerEvent::Failed(key, err)) => {
                        let cost = flight.remove(&key);
                        let (_, on_error) = source.hooks_of(&key);
                        if let Some(hook) = on_error {
                            hook(&key, &err);
                        }
                        // A hook that wants a retry has already re-readied
                        // the node; anything still running can never finish,
                        // so abort it to keep the run terminating.
                        if source.state_of(&key) == Some(NodeState::Running) {
                            if let Err(e) = source.abort(&key) {
                                tracing::warn!(task = %key, error = %e, "abort bookkeeping failed");
                            }
                        }
                        if let Some(cost) = cost {
                            capacity.release(&cost);
                        }
                        tracing::warn!(task = %key, error = %err, "task failed");
                        if stop_on_error {
                            yield Err(err);
                            return;
                        }
                        yield Ok(TaskProgress::Error {
                            task_id: key,
                            error: err.to_string(),
                        });
                    }
                    Wake::Ready | Wake::Released => {}
                    Wake::Closed => break,
                }
            }
        }
    }
}

/// Start every affordable ready task, best-first. Resource acquisition and
/// queue consumption happen back to back with no await between them.
fn launch_ready<K, O>(
    source: &Arc<PriorityDependencySource<K, O>>,
    capacity: &Arc<ResourceCapacitySource>,
    ev_tx: &mpsc::UnboundedSender<RunnerEvent<K, O>>,
    flight: &mut FlightGuard<K>,
) -> Result<()>
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
    O: Send + 'static,
{
    while let Some(key) = source.peek() {
        let cost = source.cost_of(&key)?;
        if !capacity.can_acquire(&cost) {
            // The best candidate is unaffordable; wait for a release
            // rather than starting lower-priority work over its head.
            break;
        }
        capacity.acquire_immediate(&cost)?;
        if let Err(e) = source.consume(&key) {
            capacity.release(&cost);
            // Another scheduler sharing this source won the peek/consume
            // race; re-peek instead of failing the run.
            if matches!(e, SchedError::NotQueued(_)) {
                continue;
            }
            return Err(e);
        }
        if let Err(e) = source.start(&key) {
            capacity.release(&cost);
            if matches!(e, SchedError::InvalidTransition { .. }) {
                continue;
            }
            return Err(e);
        }
        let invocation = match source.invoke(&key) {
            Ok(inv) => inv,
            Err(e) => {
                capacity.release(&cost);
                return Err(e);
            }
        };
        tracing::debug!(task = %key, "task started");
        let handle = tokio::spawn(drive_runner(key.clone(), invocation, ev_tx.clone()));
        flight.insert(key, cost, handle);
    }
    Ok(())
}

/// Run one invocation to completion, funneling events back to the loop.
async fn drive_runner<K, O>(
    key: K,
    invocation: RunnerInvocation<O>,
    tx: mpsc::UnboundedSender<RunnerEvent<K, O>>,
) where
    K: Clone + Display + Send + 'static,
    O: Send + 'static,
{
    match invocation {
        RunnerInvocation::Future(fut) => match fut.await {
            Ok(value) => {
                let _ = tx.send(RunnerEvent::Final(key, value));
            }
            Err(e) => {
                let _ = tx.send(RunnerEvent::Failed(key, e));
            }
        },
        RunnerInvocation::Stream(mut stream) => {
            // Hold one item back: the last stream item is the final output,
            // everything before it is intermediate.
            let mut previous: Option<O> = None;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(value) => {
                        if let Some(p) = previous.replace(value) {
                            if tx.send(RunnerEvent::Intermediate(key.clone(), p)).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(RunnerEvent::Failed(key, e));
                        return;
                    }
                }
            }
            match previous {
                Some(value) => {
                    let _ = tx.send(RunnerEvent::Final(key, value));
                }
                None => {
                    let err = SchedError::EmptyStream(key.to_string());
                    let _ = tx.send(RunnerEvent::Failed(key, err));
                }
            }
        }
    }
}
