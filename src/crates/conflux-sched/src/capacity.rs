//! Hierarchical multi-resource capacity accounting.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use conflux_core::WaitObject;

use crate::cost::ResourceCost;
use crate::error::{Result, SchedError};

/// A mutable pool of named resource counters with an optional parent.
///
/// Acquisition is all-or-nothing across every resource a cost names, and an
/// acquire through a child also acquires from every ancestor. A node only
/// constrains resources it has counters for; costs naming other resources
/// pass through to ancestors untouched, which lets a child pool bound
/// `capacity` while the root bounds memory. Every release signals the
/// release gate of the node and of every ancestor, waking blocked
/// schedulers.
pub struct ResourceCapacitySource {
    label: String,
    counters: Mutex<HashMap<String, u64>>,
    parent: Option<Arc<ResourceCapacitySource>>,
    released: WaitObject<()>,
}

impl ResourceCapacitySource {
    /// A root capacity pool.
    pub fn new(label: impl Into<String>, limits: ResourceCost) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            counters: Mutex::new(limits.iter().map(|(k, v)| (k.to_string(), v)).collect()),
            parent: None,
            released: WaitObject::new(),
        })
    }

    /// A child pool: acquisitions here also draw on `parent` and all of its
    /// ancestors.
    pub fn child_of(
        parent: &Arc<ResourceCapacitySource>,
        label: impl Into<String>,
        limits: ResourceCost,
    ) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            counters: Mutex::new(limits.iter().map(|(k, v)| (k.to_string(), v)).collect()),
            parent: Some(parent.clone()),
            released: WaitObject::new(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Pure synchronous check: does every level from here to the root have
    /// enough of every resource the cost names?
    pub fn can_acquire(&self, cost: &ResourceCost) -> bool {
        {
            let counters = self.counters.lock();
            for (resource, needed) in cost.iter() {
                if let Some(available) = counters.get(resource) {
                    if *available < needed {
                        return false;
                    }
                }
            }
        }
        match &self.parent {
            Some(parent) => parent.can_acquire(cost),
            None => true,
        }
    }

    /// Synchronous atomic decrement across all named resources, propagated
    /// to every ancestor. All-or-nothing: on failure at any level nothing
    /// stays decremented.
    pub fn acquire_immediate(&self, cost: &ResourceCost) -> Result<()> {
        {
            let mut counters = self.counters.lock();
            for (resource, needed) in cost.iter() {
                if let Some(available) = counters.get(resource) {
                    if *available < needed {
                        return Err(SchedError::Insufficient {
                            resource: resource.to_string(),
                            needed,
                            available: *available,
                        });
                    }
                }
            }
            for (resource, needed) in cost.iter() {
                if let Some(available) = counters.get_mut(resource) {
                    *available -= needed;
                }
            }
        }
        if let Some(parent) = &self.parent {
            if let Err(e) = parent.acquire_immediate(cost) {
                // Roll back the local decrement so the failure is clean.
                let mut counters = self.counters.lock();
                for (resource, needed) in cost.iter() {
                    if let Some(available) = counters.get_mut(resource) {
                        *available += needed;
                    }
                }
                return Err(e);
            }
        }
        tracing::trace!(pool = %self.label, "resources acquired");
        Ok(())
    }

    /// Synchronous atomic increment across all named resources, propagated
    /// to every ancestor; each level signals its release gate.
    pub fn release(&self, cost: &ResourceCost) {
        {
            let mut counters = self.counters.lock();
            for (resource, amount) in cost.iter() {
                if let Some(available) = counters.get_mut(resource) {
                    *available += amount;
                }
            }
        }
        tracing::trace!(pool = %self.label, "resources released");
        self.released.resolve(());
        if let Some(parent) = &self.parent {
            parent.release(cost);
        }
    }

    /// Wait until something is released at this level or at any ancestor.
    ///
    /// An acquire blocked here may be starved by the parent rather than by
    /// this node, and the freeing release can come from a sibling subtree;
    /// such a release only signals the shared ancestors, so the wait must
    /// cover the whole chain.
    pub async fn wait_release(&self) {
        let mut gates = vec![&self.released];
        let mut cursor = self.parent.as_deref();
        while let Some(parent) = cursor {
            gates.push(&parent.released);
            cursor = parent.parent.as_deref();
        }
        let waits = gates
            .into_iter()
            .map(|gate| Box::pin(gate.wait()))
            .collect::<Vec<_>>();
        futures::future::select_all(waits).await;
    }

    /// Remaining amount of a resource tracked at this level.
    pub fn remaining(&self, resource: &str) -> Option<u64> {
        self.counters.lock().get(resource).copied()
    }
}
