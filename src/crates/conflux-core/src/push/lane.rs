//! Dynamically mutable segment of a push chain.
//!
//! A lane is an ordered list of same-typed mapper slots that can be
//! spliced while values are in flight: `insert_after`, `remove` and
//! `replace` are keyed by slot identity and serialized against deliveries
//! through a read-write lock. Deliveries run over a snapshot of the slot
//! list, so a mutation never tears a value mid-traversal.

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{FlowError, Result};
use crate::obj::{BoxPush, Capability, ObjMeta, PushObj, SharedLife, Step};

/// A lane slot's work function: `None` drops the value (filter behavior).
pub type LaneStageFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<Option<T>>> + Send + Sync>;

struct LaneSlot<T> {
    id: Uuid,
    stage: LaneStageFn<T>,
}

/// Cloneable handle to a mutable stage list shared with the wired chain.
pub struct PushLane<T> {
    slots: Arc<RwLock<Vec<LaneSlot<T>>>>,
}

impl<T> Clone for PushLane<T> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<T: Send + 'static> PushLane<T> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Append a mapper slot; returns its identity for later mutation.
    pub fn append(&self, stage: LaneStageFn<T>) -> Uuid {
        let id = Uuid::new_v4();
        self.slots.write().push(LaneSlot { id, stage });
        id
    }

    /// Append a sync mapper.
    pub fn append_map(&self, f: impl Fn(T) -> T + Send + Sync + 'static) -> Uuid {
        self.append(lane_map(f))
    }

    /// Insert a slot immediately after the slot with the given identity.
    pub fn insert_after(&self, after: Uuid, stage: LaneStageFn<T>) -> Result<Uuid> {
        let mut slots = self.slots.write();
        let pos = slots
            .iter()
            .position(|s| s.id == after)
            .ok_or_else(|| FlowError::IllegalState(format!("no lane slot {after}")))?;
        let id = Uuid::new_v4();
        slots.insert(pos + 1, LaneSlot { id, stage });
        Ok(id)
    }

    /// Remove the slot with the given identity.
    pub fn remove(&self, id: Uuid) -> Result<()> {
        let mut slots = self.slots.write();
        let pos = slots
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| FlowError::IllegalState(format!("no lane slot {id}")))?;
        slots.remove(pos);
        Ok(())
    }

    /// Swap the work function of the slot with the given identity.
    pub fn replace(&self, id: Uuid, stage: LaneStageFn<T>) -> Result<()> {
        let mut slots = self.slots.write();
        let slot = slots
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| FlowError::IllegalState(format!("no lane slot {id}")))?;
        slot.stage = stage;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    async fn apply(&self, value: T) -> Result<Option<T>> {
        // Snapshot under the read lock; mutation waits for the write lock
        // and never observes a half-traversed delivery.
        let stages: Vec<LaneStageFn<T>> = self.slots.read().iter().map(|s| s.stage.clone()).collect();
        let mut current = value;
        for stage in stages {
            match stage(current).await? {
                Some(v) => current = v,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

impl<T: Send + 'static> Default for PushLane<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a lane slot from a sync transform.
pub fn lane_map<T: Send + 'static>(
    f: impl Fn(T) -> T + Send + Sync + 'static,
) -> LaneStageFn<T> {
    Arc::new(move |v| {
        let out = f(v);
        Box::pin(async move { Ok(Some(out)) })
    })
}

/// Build a lane slot from a sync predicate.
pub fn lane_filter<T: Send + 'static>(
    p: impl Fn(&T) -> bool + Send + Sync + 'static,
) -> LaneStageFn<T> {
    Arc::new(move |v| {
        let keep = p(&v);
        Box::pin(async move { Ok(if keep { Some(v) } else { None }) })
    })
}

/// The wired stage delegating to a [`PushLane`] before its downstream.
pub struct LaneStage<T> {
    meta: ObjMeta,
    life: SharedLife,
    lane: PushLane<T>,
    down: BoxPush<T>,
}

impl<T: Send + 'static> LaneStage<T> {
    pub fn new(lane: PushLane<T>, down: BoxPush<T>) -> Self {
        Self {
            meta: ObjMeta::new("push_lane", &[Capability::Push]),
            life: SharedLife::new(),
            lane,
            down,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> PushObj for LaneStage<T> {
    type Item = T;

    async fn push(&self, value: T) -> Result<Step<()>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        match self.lane.apply(value).await? {
            Some(v) => self.down.push(v).await,
            None => Ok(Step::Next(())),
        }
    }

    async fn finish(&self) -> Result<Step<()>> {
        if self.life.finish() {
            self.down.finish().await?;
        }
        Ok(Step::Done(None))
    }

    async fn fault(&self, err: FlowError) -> Result<Step<()>> {
        if self.life.fault() {
            self.down.fault(err).await?;
        }
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkCollect;

    #[tokio::test]
    async fn test_lane_applies_slots_in_order() {
        let lane = PushLane::new();
        lane.append_map(|v: i32| v + 1);
        lane.append_map(|v: i32| v * 10);

        let sink = SinkCollect::new();
        let buf = sink.buffer();
        let stage = LaneStage::new(lane, Box::new(sink) as BoxPush<i32>);
        stage.push(4).await.unwrap();
        assert_eq!(buf.lock().clone(), vec![50]);
    }

    #[tokio::test]
    async fn test_lane_mutation_between_pushes() {
        let lane = PushLane::new();
        let first = lane.append_map(|v: i32| v + 1);

        let sink = SinkCollect::new();
        let buf = sink.buffer();
        let stage = LaneStage::new(lane.clone(), Box::new(sink) as BoxPush<i32>);

        stage.push(1).await.unwrap();

        // Splice in a doubling slot after the increment, then drop the
        // increment entirely.
        let doubler = lane.insert_after(first, lane_map(|v: i32| v * 2)).unwrap();
        stage.push(1).await.unwrap();
        lane.remove(first).unwrap();
        stage.push(1).await.unwrap();
        lane.replace(doubler, lane_map(|v: i32| v * 100)).unwrap();
        stage.push(1).await.unwrap();

        assert_eq!(buf.lock().clone(), vec![2, 4, 2, 100]);
    }

    #[tokio::test]
    async fn test_lane_filter_slot_drops() {
        let lane = PushLane::new();
        lane.append(lane_filter(|v: &i32| *v > 0));

        let sink = SinkCollect::new();
        let buf = sink.buffer();
        let stage = LaneStage::new(lane, Box::new(sink) as BoxPush<i32>);
        stage.push(-1).await.unwrap();
        stage.push(3).await.unwrap();
        assert_eq!(buf.lock().clone(), vec![3]);
    }

    #[tokio::test]
    async fn test_lane_unknown_slot_errors() {
        let lane: PushLane<i32> = PushLane::new();
        assert!(lane.remove(Uuid::new_v4()).is_err());
        assert!(lane.replace(Uuid::new_v4(), lane_map(|v| v)).is_err());
    }
}
