//! Two-phase push construction: accumulate a recipe, build backward at a
//! terminal.
//!
//! Fluent operations compose a backward-construction closure instead of
//! instantiating stages eagerly; nothing is wired until a terminal method
//! supplies the sink, at which point the recipe folds in reverse so every
//! stage is constructed with its downstream already in hand. Each fluent
//! call consumes the recipe by move: a consumed chain cannot be built on
//! twice, which is the consumed-chain safety the facade contract asks for.

use std::sync::Arc;

use super::lane::{LaneStage, PushLane};
use super::serial::Serial;
use super::{
    CallbackPhase, Distribute, Fork, PushBufferWhen, PushCallback, PushFilter, PushFlatten,
    PushMap, PushReduce, PushWindow, RoundRobinTo,
};
use crate::error::{FlowError, Result};
use crate::funcs::{fold_fn, map_fn, pred_fn};
use crate::obj::{BoxPush, Capability, ObjMeta, PushObj, Step};
use crate::sink::{SharedBuffer, SinkCallback, SinkCallbacks, SinkCollect};

type BuildFn<I, O> = Box<dyn FnOnce(BoxPush<O>) -> BoxPush<I> + Send>;

/// An immutable push-chain recipe from producer type `I` to sink type `O`.
pub struct PushRecipe<I, O> {
    build: BuildFn<I, O>,
}

impl<I: Send + 'static> PushRecipe<I, I> {
    /// The empty recipe: the producer feeds the sink directly.
    pub fn new() -> Self {
        Self {
            build: Box::new(|sink| sink),
        }
    }
}

impl<I: Send + 'static> Default for PushRecipe<I, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Send + 'static, O: Send + 'static> PushRecipe<I, O> {
    /// Append a transform stage.
    pub fn map<U: Send + 'static>(
        self,
        f: impl FnMut(O) -> U + Send + 'static,
    ) -> PushRecipe<I, U> {
        let prev = self.build;
        PushRecipe {
            build: Box::new(move |sink: BoxPush<U>| {
                prev(Box::new(PushMap::new(map_fn(f), sink)))
            }),
        }
    }

    /// Append a predicate stage.
    pub fn filter(self, p: impl FnMut(&O) -> bool + Send + 'static) -> PushRecipe<I, O> {
        let prev = self.build;
        PushRecipe {
            build: Box::new(move |sink: BoxPush<O>| {
                prev(Box::new(PushFilter::new(pred_fn(p), sink)))
            }),
        }
    }

    /// Append a running-accumulator stage.
    pub fn reduce<A: Clone + Send + 'static>(
        self,
        seed: A,
        f: impl FnMut(A, O) -> A + Send + 'static,
    ) -> PushRecipe<I, A> {
        let prev = self.build;
        PushRecipe {
            build: Box::new(move |sink: BoxPush<A>| {
                prev(Box::new(PushReduce::new(seed, fold_fn(f), sink)))
            }),
        }
    }

    /// Append a fixed-size grouping stage.
    pub fn window(self, size: usize) -> PushRecipe<I, Vec<O>> {
        let prev = self.build;
        PushRecipe {
            build: Box::new(move |sink: BoxPush<Vec<O>>| {
                prev(Box::new(PushWindow::new(size, sink)))
            }),
        }
    }

    /// Append a condition-flushed buffering stage.
    pub fn buffer_when(
        self,
        cond: impl FnMut(&[O]) -> bool + Send + 'static,
    ) -> PushRecipe<I, Vec<O>> {
        let prev = self.build;
        PushRecipe {
            build: Box::new(move |sink: BoxPush<Vec<O>>| {
                prev(Box::new(PushBufferWhen::new(cond, sink)))
            }),
        }
    }

    /// Append a serialization gate: at most one value in flight downstream.
    pub fn serial(self) -> PushRecipe<I, O> {
        let prev = self.build;
        PushRecipe {
            build: Box::new(move |sink: BoxPush<O>| prev(Box::new(Serial::new(sink)))),
        }
    }

    /// Append a callback invoked before downstream delivery.
    pub fn pre_callback(self, f: impl FnMut(&O) + Send + 'static) -> PushRecipe<I, O>
    where
        O: Clone,
    {
        let prev = self.build;
        PushRecipe {
            build: Box::new(move |sink: BoxPush<O>| {
                prev(Box::new(PushCallback::new(CallbackPhase::Before, f, sink)))
            }),
        }
    }

    /// Append a callback invoked after downstream delivery resolved.
    pub fn post_callback(self, f: impl FnMut(&O) + Send + 'static) -> PushRecipe<I, O>
    where
        O: Clone,
    {
        let prev = self.build;
        PushRecipe {
            build: Box::new(move |sink: BoxPush<O>| {
                prev(Box::new(PushCallback::new(CallbackPhase::After, f, sink)))
            }),
        }
    }

    /// Append a dynamically mutable lane segment.
    pub fn through_lane(self, lane: &PushLane<O>) -> PushRecipe<I, O> {
        let prev = self.build;
        let lane = lane.clone();
        PushRecipe {
            build: Box::new(move |sink: BoxPush<O>| prev(Box::new(LaneStage::new(lane, sink)))),
        }
    }

    /// Terminal: wire the recipe into a single sink.
    pub fn into_sink(self, sink: BoxPush<O>) -> PushChain<I> {
        PushChain::over((self.build)(sink))
    }

    /// Terminal: broadcast to every branch, sequentially per value.
    pub fn fork(self, branches: Vec<BoxPush<O>>) -> PushChain<I>
    where
        O: Clone,
    {
        self.into_sink(Box::new(Fork::new(branches)))
    }

    /// Terminal: route each value to exactly one selector-chosen branch.
    pub fn distribute(
        self,
        selector: impl FnMut(&O) -> usize + Send + 'static,
        branches: Vec<BoxPush<O>>,
    ) -> PushChain<I> {
        self.into_sink(Box::new(Distribute::new(selector, branches)))
    }

    /// Terminal: strict rotation across branches.
    pub fn round_robin_to(self, branches: Vec<BoxPush<O>>) -> PushChain<I> {
        self.into_sink(Box::new(RoundRobinTo::new(branches)))
    }

    /// Terminal: invoke every callback with every value.
    pub fn to_callbacks(self, callbacks: Vec<SinkCallback<O>>) -> PushChain<I> {
        self.into_sink(Box::new(SinkCallbacks::new(callbacks)))
    }

    /// Terminal: collect into a shared array; returns the chain and the
    /// buffer it fills.
    pub fn to_vec(self) -> (PushChain<I>, SharedBuffer<O>) {
        self.to_vec_with(SharedBuffer::default())
    }

    /// Terminal: collect into an existing shared array.
    pub fn to_vec_with(self, buf: SharedBuffer<O>) -> (PushChain<I>, SharedBuffer<O>) {
        let sink = SinkCollect::with_buffer(buf.clone());
        (self.into_sink(Box::new(sink)), buf)
    }
}

impl<I: Send + 'static, O> PushRecipe<I, Vec<O>>
where
    O: Send + 'static,
    Vec<O>: Send,
{
    /// Append an un-batching stage: elements of each batch are delivered
    /// downstream one by one.
    pub fn flatten(self) -> PushRecipe<I, O> {
        let prev = self.build;
        PushRecipe {
            build: Box::new(move |sink: BoxPush<O>| {
                prev(Box::new(PushFlatten::<Vec<O>, O>::new(sink)))
            }),
        }
    }
}

/// A live push chain: the shareable head of a backward-built stage line.
///
/// Cloning the chain clones the handle, not the stages, so concurrent
/// producers can feed the same chain.
pub struct PushChain<I> {
    meta: ObjMeta,
    head: Arc<dyn PushObj<Item = I>>,
}

impl<I> Clone for PushChain<I> {
    fn clone(&self) -> Self {
        Self {
            meta: self.meta.clone(),
            head: self.head.clone(),
        }
    }
}

impl<I: Send + 'static> PushChain<I> {
    fn over(head: BoxPush<I>) -> Self {
        Self {
            meta: ObjMeta::new("push_chain", &[Capability::Push]),
            head: Arc::from(head),
        }
    }

    /// Deliver one value through the whole chain.
    pub async fn push(&self, value: I) -> Result<Step<()>> {
        self.head.push(value).await
    }

    /// Close the chain and everything downstream.
    pub async fn finish(&self) -> Result<Step<()>> {
        self.head.finish().await
    }

    /// Close the chain with an error.
    pub async fn fault(&self, err: FlowError) -> Result<Step<()>> {
        self.head.fault(err).await
    }

    pub fn meta(&self) -> &ObjMeta {
        &self.meta
    }

    /// Box this chain handle so it can serve as a branch of another chain.
    pub fn into_branch(self) -> BoxPush<I> {
        Box::new(self)
    }
}

#[async_trait::async_trait]
impl<I: Send + 'static> PushObj for PushChain<I> {
    type Item = I;

    async fn push(&self, value: I) -> Result<Step<()>> {
        self.head.push(value).await
    }

    async fn finish(&self) -> Result<Step<()>> {
        self.head.finish().await
    }

    async fn fault(&self, err: FlowError) -> Result<Step<()>> {
        self.head.fault(err).await
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }
}
