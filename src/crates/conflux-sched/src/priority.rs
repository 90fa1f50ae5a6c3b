//! Priority-ordered view over the dependency graph's ready set.
//!
//! The source subscribes to the graph's ready events at construction, so
//! every node that becomes ready is enqueued synchronously with its ready
//! timestamp. Effective priority is recomputed on every peek because aging
//! moves it with wall-clock time; ties break FIFO by ready order.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use conflux_core::WaitObject;

use crate::error::{Result, SchedError};
use crate::graph::{DependencyGraph, NodeState};
use crate::task::{CompleteHook, ErrorHook, RunnerInvocation, ScheduledTask};
use crate::ResourceCost;

/// User-supplied base priority per key.
pub type PriorityFn<K> = Arc<dyn Fn(&K) -> f64 + Send + Sync>;

/// Aging parameters: a waiting task's effective priority grows by
/// `rate_per_ms` for every waited millisecond, capped at `max_boost`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgingPolicy {
    pub rate_per_ms: f64,
    pub max_boost: f64,
}

impl AgingPolicy {
    /// No aging: effective priority equals base priority.
    pub fn none() -> Self {
        Self {
            rate_per_ms: 0.0,
            max_boost: 0.0,
        }
    }

    pub fn new(rate_per_ms: f64, max_boost: f64) -> Self {
        Self {
            rate_per_ms,
            max_boost,
        }
    }
}

impl Default for AgingPolicy {
    fn default() -> Self {
        Self::none()
    }
}

struct ReadyEntry<K> {
    key: K,
    ready_at: Instant,
    seq: u64,
}

#[derive(Default)]
struct ReadyQueue<K> {
    entries: Vec<ReadyEntry<K>>,
    seq: u64,
}

/// Ready-task source combining a dependency graph, a task registry and an
/// aging priority queue. Shared by reference between the pool runner and
/// task hooks, so all state lives behind interior locks.
pub struct PriorityDependencySource<K, O> {
    graph: Mutex<DependencyGraph<K>>,
    tasks: Mutex<HashMap<K, ScheduledTask<K, O>>>,
    queue: Arc<Mutex<ReadyQueue<K>>>,
    ready_signal: Arc<WaitObject<()>>,
    base_priority: PriorityFn<K>,
    aging: AgingPolicy,
}

impl<K, O> PriorityDependencySource<K, O>
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
    O: Send + 'static,
{
    /// Wrap a graph. Nodes already ready are enqueued immediately; every
    /// later ready event is enqueued by the subscribed observer.
    pub fn new(
        mut graph: DependencyGraph<K>,
        base_priority: PriorityFn<K>,
        aging: AgingPolicy,
    ) -> Arc<Self> {
        let queue: Arc<Mutex<ReadyQueue<K>>> = Arc::new(Mutex::new(ReadyQueue {
            entries: Vec::new(),
            seq: 0,
        }));
        let ready_signal = Arc::new(WaitObject::new());

        {
            let queue = queue.clone();
            let signal = ready_signal.clone();
            graph.on_ready(Arc::new(move |key: &K| {
                let mut q = queue.lock();
                let seq = q.seq;
                q.seq += 1;
                q.entries.push(ReadyEntry {
                    key: key.clone(),
                    ready_at: Instant::now(),
                    seq,
                });
                signal.resolve(());
            }));
        }
        // Nodes that were ready before we subscribed.
        {
            let mut q = queue.lock();
            for key in graph.ready().iter() {
                let seq = q.seq;
                q.seq += 1;
                q.entries.push(ReadyEntry {
                    key: key.clone(),
                    ready_at: Instant::now(),
                    seq,
                });
            }
        }

        Arc::new(Self {
            graph: Mutex::new(graph),
            tasks: Mutex::new(HashMap::new()),
            queue,
            ready_signal,
            base_priority,
            aging,
        })
    }

    /// Shorthand: fresh empty graph, uniform base priority, no aging.
    pub fn uniform() -> Arc<Self> {
        Self::new(DependencyGraph::new(), Arc::new(|_| 0.0), AgingPolicy::none())
    }

    /// Register a task and add its node to the graph in one step. The task
    /// registry is updated first so an immediately-ready node is already
    /// startable when the ready event fires.
    pub fn add_task(&self, task: ScheduledTask<K, O>, deps: &[K]) -> Result<()> {
        let key = task.key.clone();
        let previous = self.tasks.lock().insert(key.clone(), task);
        if let Err(e) = self.graph.lock().add_node(key.clone(), deps.iter().cloned()) {
            let mut tasks = self.tasks.lock();
            match previous {
                Some(prev) => {
                    tasks.insert(key, prev);
                }
                None => {
                    tasks.remove(&key);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// The effective priority of a queued key, if queued.
    pub fn effective_priority(&self, key: &K) -> Option<f64> {
        let queue = self.queue.lock();
        queue
            .entries
            .iter()
            .find(|e| &e.key == key)
            .map(|e| self.effective_of(e))
    }

    fn effective_of(&self, entry: &ReadyEntry<K>) -> f64 {
        let base = (self.base_priority)(&entry.key);
        let waited_ms = entry.ready_at.elapsed().as_millis() as f64;
        base + (self.aging.rate_per_ms * waited_ms).min(self.aging.max_boost)
    }

    /// The best ready task right now, without removing it. Recomputed per
    /// call because aging shifts priorities between calls.
    pub fn peek(&self) -> Option<K> {
        let queue = self.queue.lock();
        let tasks = self.tasks.lock();
        queue
            .entries
            .iter()
            .filter(|e| tasks.contains_key(&e.key))
            .max_by(|a, b| {
                let (ea, eb) = (self.effective_of(a), self.effective_of(b));
                ea.partial_cmp(&eb)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    // FIFO tie-break: the earlier seq wins, so when priorities
                    // tie the "max" is the entry with the smaller seq.
                    .then_with(|| b.seq.cmp(&a.seq))
            })
            .map(|e| e.key.clone())
    }

    /// Remove a key from the ready queue; the caller has decided to start
    /// it. The task stays registered so a retry can re-invoke its runner.
    pub fn consume(&self, key: &K) -> Result<()> {
        let mut queue = self.queue.lock();
        let pos = queue
            .entries
            .iter()
            .position(|e| &e.key == key)
            .ok_or_else(|| SchedError::NotQueued(key.to_string()))?;
        queue.entries.remove(pos);
        Ok(())
    }

    /// Invoke the runner of a registered task, producing a live invocation.
    pub fn invoke(&self, key: &K) -> Result<RunnerInvocation<O>> {
        let mut tasks = self.tasks.lock();
        let task = tasks
            .get_mut(key)
            .ok_or_else(|| SchedError::UnknownTask(key.to_string()))?;
        Ok(task.invoke())
    }

    /// Cost of a registered task.
    pub fn cost_of(&self, key: &K) -> Result<ResourceCost> {
        let tasks = self.tasks.lock();
        tasks
            .get(key)
            .map(|t| t.cost.clone())
            .ok_or_else(|| SchedError::UnknownTask(key.to_string()))
    }

    /// Completion and error hooks of a registered task.
    pub fn hooks_of(&self, key: &K) -> (Option<CompleteHook<K>>, Option<ErrorHook<K>>) {
        let tasks = self.tasks.lock();
        match tasks.get(key) {
            Some(t) => (t.on_complete.clone(), t.on_error.clone()),
            None => (None, None),
        }
    }

    /// `ready → running` in the graph.
    pub fn start(&self, key: &K) -> Result<()> {
        self.graph.lock().start(key)
    }

    /// `running → completed`; dependents becoming ready are enqueued by the
    /// subscribed observer before this returns.
    pub fn complete(&self, key: &K) -> Result<Vec<K>> {
        self.graph.lock().complete(key)
    }

    /// `running → ready`: return the task to the queue for a retry.
    pub fn fail(&self, key: &K) -> Result<()> {
        self.graph.lock().fail(key)
    }

    /// Abort a node, cascade through dependents, and purge every newly
    /// aborted key from the ready queue.
    pub fn abort(&self, key: &K) -> Result<Vec<K>> {
        let aborted = self.graph.lock().abort(key)?;
        let mut queue = self.queue.lock();
        queue.entries.retain(|e| !aborted.contains(&e.key));
        Ok(aborted)
    }

    pub fn state_of(&self, key: &K) -> Option<NodeState> {
        self.graph.lock().state_of(key)
    }

    pub fn failures_of(&self, key: &K) -> Option<u32> {
        self.graph.lock().failures_of(key)
    }

    /// True when the graph has nothing pending, ready or running.
    pub fn is_done(&self) -> bool {
        self.graph.lock().is_done()
    }

    /// Number of keys currently queued as ready.
    pub fn queued_len(&self) -> usize {
        self.queue.lock().entries.len()
    }

    /// Wait for the next "became ready" signal.
    pub async fn wait_ready(&self) {
        self.ready_signal.wait().await
    }
}
