//! Keyed dependency graph with a six-state node machine.
//!
//! Nodes are added `pending` (or `ready` when unblocked) and move through
//! `ready → running → completed`, with `fail` returning a running node to
//! `ready` for retry and `abort` cascading through transitive dependents.
//! The per-state key sets are disjoint and always partition the node set.
//! Every transition into `ready` is announced synchronously to observers
//! registered at construction time, which is what lets a priority source
//! enqueue newly-ready work without polling.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::{Result, SchedError};

/// Observer invoked synchronously for every node entering `ready`.
pub type ReadyObserver<K> = Arc<dyn Fn(&K) + Send + Sync>;

/// Node lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl NodeState {
    fn as_str(self) -> &'static str {
        match self {
            NodeState::Pending => "pending",
            NodeState::Ready => "ready",
            NodeState::Running => "running",
            NodeState::Completed => "completed",
            NodeState::Failed => "failed",
            NodeState::Aborted => "aborted",
        }
    }
}

/// One recorded state change.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub state: NodeState,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
struct NodeEntry<K> {
    deps: HashSet<K>,
    dependents: HashSet<K>,
    state: NodeState,
    entered_at: DateTime<Utc>,
    history: Vec<StateTransition>,
    failures: u32,
}

/// A dependency graph over keys of type `K`.
pub struct DependencyGraph<K> {
    nodes: HashMap<K, NodeEntry<K>>,
    pending: HashSet<K>,
    ready: HashSet<K>,
    running: HashSet<K>,
    completed: HashSet<K>,
    failed: HashSet<K>,
    aborted: HashSet<K>,
    observers: Vec<ReadyObserver<K>>,
}

impl<K> Default for DependencyGraph<K>
where
    K: Clone + Eq + Hash + Display,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> DependencyGraph<K>
where
    K: Clone + Eq + Hash + Display,
{
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            pending: HashSet::new(),
            ready: HashSet::new(),
            running: HashSet::new(),
            completed: HashSet::new(),
            failed: HashSet::new(),
            aborted: HashSet::new(),
            observers: Vec::new(),
        }
    }

    /// Register a ready observer. Observers added before nodes see every
    /// ready event the graph ever emits.
    pub fn on_ready(&mut self, observer: ReadyObserver<K>) {
        self.observers.push(observer);
    }

    /// Insert a node. Initial state is `ready` when its dependency set is
    /// empty or already completed, `aborted` when any dependency is already
    /// aborted, and `pending` otherwise.
    pub fn add_node(&mut self, key: K, deps: impl IntoIterator<Item = K>) -> Result<NodeState> {
        if self.nodes.contains_key(&key) {
            return Err(SchedError::DuplicateNode(key.to_string()));
        }
        let deps: HashSet<K> = deps.into_iter().collect();
        for dep in &deps {
            if !self.nodes.contains_key(dep) {
                return Err(SchedError::UnknownNode(dep.to_string()));
            }
        }

        let any_aborted = deps.iter().any(|d| self.aborted.contains(d));
        let all_completed = deps.iter().all(|d| self.completed.contains(d));
        let initial = if any_aborted {
            NodeState::Aborted
        } else if all_completed {
            NodeState::Ready
        } else {
            NodeState::Pending
        };

        for dep in &deps {
            if let Some(entry) = self.nodes.get_mut(dep) {
                entry.dependents.insert(key.clone());
            }
        }
        let now = Utc::now();
        self.nodes.insert(
            key.clone(),
            NodeEntry {
                deps,
                dependents: HashSet::new(),
                state: initial,
                entered_at: now,
                history: vec![StateTransition { state: initial, at: now }],
                failures: 0,
            },
        );
        self.state_set_mut(initial).insert(key.clone());
        tracing::debug!(node = %key, state = initial.as_str(), "node added");
        if initial == NodeState::Ready {
            self.emit_ready(&key);
        }
        Ok(initial)
    }

    /// `ready → running`.
    pub fn start(&mut self, key: &K) -> Result<()> {
        self.transition(key, NodeState::Ready, NodeState::Running)
    }

    /// `running → completed`. Returns the dependents that became `ready`.
    pub fn complete(&mut self, key: &K) -> Result<Vec<K>> {
        self.transition(key, NodeState::Running, NodeState::Completed)?;
        let dependents: Vec<K> = self
            .nodes
            .get(key)
            .map(|e| e.dependents.iter().cloned().collect())
            .unwrap_or_default();

        let mut newly_ready = Vec::new();
        for dep_key in dependents {
            let eligible = match self.nodes.get(&dep_key) {
                Some(entry) => {
                    entry.state == NodeState::Pending
                        && entry.deps.iter().all(|d| self.completed.contains(d))
                }
                None => false,
            };
            if eligible {
                self.transition(&dep_key, NodeState::Pending, NodeState::Ready)?;
                newly_ready.push(dep_key);
            }
        }
        Ok(newly_ready)
    }

    /// `running → ready`: the retry edge. The failure count is recorded and
    /// the node is announced ready again.
    pub fn fail(&mut self, key: &K) -> Result<()> {
        self.transition(key, NodeState::Running, NodeState::Ready)?;
        if let Some(entry) = self.nodes.get_mut(key) {
            entry.failures += 1;
        }
        Ok(())
    }

    /// `running → failed`: terminal failure under a host abort policy.
    /// Dependents can never run, so they are aborted; returns their keys.
    pub fn fail_terminal(&mut self, key: &K) -> Result<Vec<K>> {
        self.transition(key, NodeState::Running, NodeState::Failed)?;
        if let Some(entry) = self.nodes.get_mut(key) {
            entry.failures += 1;
        }
        Ok(self.abort_dependents_of(key))
    }

    /// Abort a node (any non-completed state) and cascade through its
    /// transitive dependents. Returns every key newly aborted.
    pub fn abort(&mut self, key: &K) -> Result<Vec<K>> {
        let entry = self
            .nodes
            .get(key)
            .ok_or_else(|| SchedError::UnknownNode(key.to_string()))?;
        if matches!(entry.state, NodeState::Completed | NodeState::Aborted) {
            return Ok(Vec::new());
        }
        let mut newly = vec![key.clone()];
        self.force_state(key, NodeState::Aborted);
        newly.extend(self.abort_dependents_of(key));
        Ok(newly)
    }

    fn abort_dependents_of(&mut self, key: &K) -> Vec<K> {
        let mut newly = Vec::new();
        let mut frontier: VecDeque<K> = self
            .nodes
            .get(key)
            .map(|e| e.dependents.iter().cloned().collect())
            .unwrap_or_default();
        while let Some(k) = frontier.pop_front() {
            let abortable = self
                .nodes
                .get(&k)
                .map(|e| !matches!(e.state, NodeState::Completed | NodeState::Aborted))
                .unwrap_or(false);
            if !abortable {
                continue;
            }
            self.force_state(&k, NodeState::Aborted);
            newly.push(k.clone());
            if let Some(entry) = self.nodes.get(&k) {
                frontier.extend(entry.dependents.iter().cloned());
            }
        }
        newly
    }

    /// Current state of a node.
    pub fn state_of(&self, key: &K) -> Option<NodeState> {
        self.nodes.get(key).map(|e| e.state)
    }

    /// Failure count of a node.
    pub fn failures_of(&self, key: &K) -> Option<u32> {
        self.nodes.get(key).map(|e| e.failures)
    }

    /// When the node entered its current state.
    pub fn entered_at_of(&self, key: &K) -> Option<DateTime<Utc>> {
        self.nodes.get(key).map(|e| e.entered_at)
    }

    /// Recorded transitions of a node, oldest first.
    pub fn history_of(&self, key: &K) -> Option<&[StateTransition]> {
        self.nodes.get(key).map(|e| e.history.as_slice())
    }

    pub fn pending(&self) -> &HashSet<K> {
        &self.pending
    }

    pub fn ready(&self) -> &HashSet<K> {
        &self.ready
    }

    pub fn running(&self) -> &HashSet<K> {
        &self.running
    }

    pub fn completed(&self) -> &HashSet<K> {
        &self.completed
    }

    pub fn failed(&self) -> &HashSet<K> {
        &self.failed
    }

    pub fn aborted(&self) -> &HashSet<K> {
        &self.aborted
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.nodes.contains_key(key)
    }

    /// True when no node can make further progress.
    pub fn is_done(&self) -> bool {
        self.pending.is_empty() && self.ready.is_empty() && self.running.is_empty()
    }

    fn transition(&mut self, key: &K, from: NodeState, to: NodeState) -> Result<()> {
        let entry = self
            .nodes
            .get(key)
            .ok_or_else(|| SchedError::UnknownNode(key.to_string()))?;
        if entry.state != from {
            return Err(SchedError::InvalidTransition {
                key: key.to_string(),
                expected: from.as_str(),
                actual: entry.state.as_str().to_string(),
            });
        }
        self.force_state(key, to);
        if to == NodeState::Ready {
            self.emit_ready(key);
        }
        Ok(())
    }

    fn force_state(&mut self, key: &K, to: NodeState) {
        let Some(entry) = self.nodes.get_mut(key) else {
            return;
        };
        let from = entry.state;
        let now = Utc::now();
        entry.state = to;
        entry.entered_at = now;
        entry.history.push(StateTransition { state: to, at: now });
        self.state_set_mut(from).remove(key);
        self.state_set_mut(to).insert(key.clone());
        tracing::debug!(node = %key, from = from.as_str(), to = to.as_str(), "node transition");
    }

    fn state_set_mut(&mut self, state: NodeState) -> &mut HashSet<K> {
        match state {
            NodeState::Pending => &mut self.pending,
            NodeState::Ready => &mut self.ready,
            NodeState::Running => &mut self.running,
            NodeState::Completed => &mut self.completed,
            NodeState::Failed => &mut self.failed,
            NodeState::Aborted => &mut self.aborted,
        }
    }

    fn emit_ready(&self, key: &K) {
        for observer in &self.observers {
            observer(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn diamond() -> DependencyGraph<&'static str> {
        let mut g = DependencyGraph::new();
        g.add_node("a", []).unwrap();
        g.add_node("b", ["a"]).unwrap();
        g.add_node("c", ["a"]).unwrap();
        g.add_node("d", ["b", "c"]).unwrap();
        g
    }

    #[test]
    fn test_initial_states() {
        let g = diamond();
        assert_eq!(g.state_of(&"a"), Some(NodeState::Ready));
        assert_eq!(g.state_of(&"b"), Some(NodeState::Pending));
        assert_eq!(g.state_of(&"d"), Some(NodeState::Pending));
        assert!(!g.is_done());
    }

    #[test]
    fn test_duplicate_and_unknown_nodes_rejected() {
        let mut g = DependencyGraph::new();
        g.add_node("a", []).unwrap();
        assert!(matches!(
            g.add_node("a", []),
            Err(SchedError::DuplicateNode(_))
        ));
        assert!(matches!(
            g.add_node("b", ["ghost"]),
            Err(SchedError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_complete_unlocks_dependents() {
        let mut g = diamond();
        g.start(&"a").unwrap();
        let ready = g.complete(&"a").unwrap();
        assert_eq!(ready.len(), 2);
        assert!(ready.contains(&"b") && ready.contains(&"c"));
        assert_eq!(g.state_of(&"d"), Some(NodeState::Pending));

        g.start(&"b").unwrap();
        g.complete(&"b").unwrap();
        g.start(&"c").unwrap();
        let ready = g.complete(&"c").unwrap();
        assert_eq!(ready, vec!["d"]);

        g.start(&"d").unwrap();
        g.complete(&"d").unwrap();
        assert!(g.is_done());
    }

    #[test]
    fn test_state_sets_partition_nodes() {
        let mut g = diamond();
        g.start(&"a").unwrap();
        let total = g.pending().len()
            + g.ready().len()
            + g.running().len()
            + g.completed().len()
            + g.failed().len()
            + g.aborted().len();
        assert_eq!(total, g.len());
    }

    #[test]
    fn test_fail_returns_node_to_ready() {
        let mut g = DependencyGraph::new();
        g.add_node("x", []).unwrap();
        g.start(&"x").unwrap();
        g.fail(&"x").unwrap();
        assert_eq!(g.state_of(&"x"), Some(NodeState::Ready));
        assert_eq!(g.failures_of(&"x"), Some(1));
        // Retry works.
        g.start(&"x").unwrap();
        g.complete(&"x").unwrap();
        assert!(g.is_done());
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut g = DependencyGraph::new();
        g.add_node("x", []).unwrap();
        assert!(matches!(
            g.complete(&"x"),
            Err(SchedError::InvalidTransition { .. })
        ));
        assert!(g.fail(&"x").is_err());
        g.start(&"x").unwrap();
        assert!(g.start(&"x").is_err());
    }

    #[test]
    fn test_abort_cascades_to_transitive_dependents() {
        let mut g = diamond();
        let aborted = g.abort(&"b").unwrap();
        assert!(aborted.contains(&"b"));
        assert!(aborted.contains(&"d"));
        assert_eq!(aborted.len(), 2);
        assert_eq!(g.state_of(&"c"), Some(NodeState::Pending));

        // An aborted node never becomes ready.
        g.start(&"a").unwrap();
        let ready = g.complete(&"a").unwrap();
        assert_eq!(ready, vec!["c"]);
        assert_eq!(g.state_of(&"b"), Some(NodeState::Aborted));
        assert_eq!(g.state_of(&"d"), Some(NodeState::Aborted));
    }

    #[test]
    fn test_abort_skips_completed_nodes() {
        let mut g = diamond();
        g.start(&"a").unwrap();
        g.complete(&"a").unwrap();
        let aborted = g.abort(&"a").unwrap();
        assert!(aborted.is_empty());
        assert_eq!(g.state_of(&"a"), Some(NodeState::Completed));
    }

    #[test]
    fn test_fail_terminal_aborts_dependents() {
        let mut g = diamond();
        g.start(&"a").unwrap();
        g.complete(&"a").unwrap();
        g.start(&"b").unwrap();
        let aborted = g.fail_terminal(&"b").unwrap();
        assert_eq!(g.state_of(&"b"), Some(NodeState::Failed));
        assert_eq!(aborted, vec!["d"]);
        // c can still finish, after which nothing is left to run.
        g.start(&"c").unwrap();
        g.complete(&"c").unwrap();
        assert!(g.is_done());
    }

    #[test]
    fn test_ready_events_fire_synchronously() {
        let seen: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let observer_log = seen.clone();
        let mut g = DependencyGraph::new();
        g.on_ready(Arc::new(move |k: &&'static str| {
            observer_log.lock().push(*k);
        }));

        g.add_node("a", []).unwrap();
        assert_eq!(seen.lock().clone(), vec!["a"]);

        g.add_node("b", ["a"]).unwrap();
        g.start(&"a").unwrap();
        g.complete(&"a").unwrap();
        assert_eq!(seen.lock().clone(), vec!["a", "b"]);

        // fail re-announces readiness.
        g.start(&"b").unwrap();
        g.fail(&"b").unwrap();
        assert_eq!(seen.lock().clone(), vec!["a", "b", "b"]);
    }

    #[test]
    fn test_node_added_under_aborted_dep_is_aborted() {
        let mut g = DependencyGraph::new();
        g.add_node("a", []).unwrap();
        g.abort(&"a").unwrap();
        let state = g.add_node("late", ["a"]).unwrap();
        assert_eq!(state, NodeState::Aborted);
        assert!(g.is_done());
    }

    #[test]
    fn test_history_records_transitions() {
        let mut g = DependencyGraph::new();
        g.add_node("x", []).unwrap();
        g.start(&"x").unwrap();
        g.fail(&"x").unwrap();
        g.start(&"x").unwrap();
        g.complete(&"x").unwrap();
        let states: Vec<NodeState> = g
            .history_of(&"x")
            .unwrap()
            .iter()
            .map(|t| t.state)
            .collect();
        assert_eq!(
            states,
            vec![
                NodeState::Ready,
                NodeState::Running,
                NodeState::Ready,
                NodeState::Running,
                NodeState::Completed
            ]
        );
    }
}
