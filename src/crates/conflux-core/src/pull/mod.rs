//! Demand-driven 1-to-1 pull links.
//!
//! A pull link owns exactly one upstream stage and does its work inside
//! `next()`: demand propagates strictly upstream, so with no consumer there
//! is no work. Every link re-reads its configuration (closures via setters,
//! sizes via public fields) on each call, and none of them pre-fetch -
//! the eager variants live in [`timing`](crate::pull::timing).
//!
//! Demand discipline: a link's `next()` calls its upstream's `next()` at
//! most once per yielded value. `Filter` re-enters its own pull loop for
//! dropped values and `FlatMap` amortizes one upstream pull across an inner
//! sub-sequence; both stay within the contract.

pub mod reorder;
pub mod timing;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashSet;
use std::hash::Hash;

use crate::error::{FlowError, Result};
use crate::funcs::{fold_fn, map_fn, pred_fn, AsyncFold, AsyncMap, AsyncPred};
use crate::obj::{Capability, Lifecycle, ObjMeta, PullObj, Step};

/// Transforms each upstream value through a (possibly async) function.
pub struct Map<S: PullObj, U> {
    meta: ObjMeta,
    life: Lifecycle,
    upstream: S,
    transform: AsyncMap<S::Item, U>,
}

impl<S: PullObj, U: Send + 'static> Map<S, U> {
    pub fn new(upstream: S, f: impl FnMut(S::Item) -> U + Send + 'static) -> Self {
        Self::with_async(upstream, map_fn(f))
    }

    pub fn with_async(upstream: S, transform: AsyncMap<S::Item, U>) -> Self {
        Self {
            meta: ObjMeta::new("map", &[Capability::Pull]),
            life: Lifecycle::default(),
            upstream,
            transform,
        }
    }

    /// Swap the transform; the very next `next()` uses the new one.
    pub fn set_transform(&mut self, transform: AsyncMap<S::Item, U>) {
        self.transform = transform;
    }
}

#[async_trait]
impl<S: PullObj, U: Send + 'static> PullObj for Map<S, U> {
    type Item = U;

    async fn next(&mut self) -> Result<Step<U>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        match self.upstream.next().await? {
            Step::Next(v) => {
                let fut = (self.transform)(v);
                Ok(Step::Next(fut.await?))
            }
            Step::Done(_) => Ok(Step::Done(None)),
        }
    }

    async fn finish(&mut self) -> Result<Step<U>> {
        if self.life.finish() {
            self.upstream.finish().await?;
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<U>> {
        if self.life.fault() {
            self.upstream.fault(err).await?;
        }
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjMeta {
        &mut self.meta
    }
}

/// Yields only the upstream values matching a (possibly async) predicate.
pub struct Filter<S: PullObj> {
    meta: ObjMeta,
    life: Lifecycle,
    upstream: S,
    predicate: AsyncPred<S::Item>,
}

impl<S: PullObj> Filter<S> {
    pub fn new(upstream: S, p: impl FnMut(&S::Item) -> bool + Send + 'static) -> Self {
        Self::with_async(upstream, pred_fn(p))
    }

    pub fn with_async(upstream: S, predicate: AsyncPred<S::Item>) -> Self {
        Self {
            meta: ObjMeta::new("filter", &[Capability::Pull]),
            life: Lifecycle::default(),
            upstream,
            predicate,
        }
    }

    /// Swap the predicate; effective on the very next call.
    pub fn set_predicate(&mut self, predicate: AsyncPred<S::Item>) {
        self.predicate = predicate;
    }
}

#[async_trait]
impl<S: PullObj> PullObj for Filter<S> {
    type Item = S::Item;

    async fn next(&mut self) -> Result<Step<S::Item>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        loop {
            match self.upstream.next().await? {
                Step::Next(v) => {
                    if (self.predicate)(&v).await? {
                        return Ok(Step::Next(v));
                    }
                }
                Step::Done(_) => return Ok(Step::Done(None)),
            }
        }
    }

    async fn finish(&mut self) -> Result<Step<S::Item>> {
        if self.life.finish() {
            self.upstream.finish().await?;
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<S::Item>> {
        if self.life.fault() {
            self.upstream.fault(err).await?;
        }
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjMeta {
        &mut self.meta
    }
}

/// Expands each upstream value into an async sub-sequence; the whole inner
/// sequence is yielded before the next upstream value is pulled.
pub struct FlatMap<S: PullObj, U> {
    meta: ObjMeta,
    life: Lifecycle,
    upstream: S,
    expand: Box<dyn FnMut(S::Item) -> BoxStream<'static, Result<U>> + Send>,
    inner: Option<BoxStream<'static, Result<U>>>,
}

impl<S: PullObj, U: Send + 'static> FlatMap<S, U> {
    /// Expand through a sync function producing a finite batch.
    pub fn new<I>(upstream: S, mut f: impl FnMut(S::Item) -> I + Send + 'static) -> Self
    where
        I: IntoIterator<Item = U>,
        I::IntoIter: Send + 'static,
    {
        Self::with_stream(upstream, move |v| {
            futures::stream::iter(f(v).into_iter().map(Ok)).boxed()
        })
    }

    /// Expand through a function producing an async stream.
    pub fn with_stream(
        upstream: S,
        expand: impl FnMut(S::Item) -> BoxStream<'static, Result<U>> + Send + 'static,
    ) -> Self {
        Self {
            meta: ObjMeta::new("flat_map", &[Capability::Pull]),
            life: Lifecycle::default(),
            upstream,
            expand: Box::new(expand),
            inner: None,
        }
    }
}

#[async_trait]
impl<S: PullObj, U: Send + 'static> PullObj for FlatMap<S, U> {
    type Item = U;

    async fn next(&mut self) -> Result<Step<U>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        loop {
            if let Some(inner) = self.inner.as_mut() {
                match inner.next().await {
                    Some(item) => return Ok(Step::Next(item?)),
                    None => self.inner = None,
                }
            }
            match self.upstream.next().await? {
                Step::Next(v) => self.inner = Some((self.expand)(v)),
                Step::Done(_) => return Ok(Step::Done(None)),
            }
        }
    }

    async fn finish(&mut self) -> Result<Step<U>> {
        if self.life.finish() {
            self.inner = None;
            self.upstream.finish().await?;
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<U>> {
        if self.life.fault() {
            self.inner = None;
            self.upstream.fault(err).await?;
        }
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjMeta {
        &mut self.meta
    }
}

/// Streams the running accumulator after every upstream value.
///
/// This is a streaming scan, not a terminal fold: each pull consumes one
/// upstream value and yields the updated accumulator.
pub struct Reduce<S: PullObj, A> {
    meta: ObjMeta,
    life: Lifecycle,
    upstream: S,
    fold: AsyncFold<A, S::Item>,
    acc: Option<A>,
    // Lifts the first value into the accumulator in seedless mode.
    lift: Option<Box<dyn FnMut(S::Item) -> A + Send>>,
}

impl<S: PullObj, A: Clone + Send + 'static> Reduce<S, A> {
    /// Seeded reduction: the accumulator starts from `seed`.
    pub fn new(upstream: S, seed: A, f: impl FnMut(A, S::Item) -> A + Send + 'static) -> Self {
        Self::with_async(upstream, Some(seed), fold_fn(f))
    }

    pub fn with_async(upstream: S, seed: Option<A>, fold: AsyncFold<A, S::Item>) -> Self {
        Self {
            meta: ObjMeta::new("reduce", &[Capability::Pull]),
            life: Lifecycle::default(),
            upstream,
            fold,
            acc: seed,
            lift: None,
        }
    }
}

impl<S> Reduce<S, S::Item>
where
    S: PullObj,
    S::Item: Clone,
{
    /// Seedless reduction: the first upstream value becomes the accumulator
    /// and is yielded as-is.
    pub fn running(
        upstream: S,
        f: impl FnMut(S::Item, S::Item) -> S::Item + Send + 'static,
    ) -> Self {
        let mut link = Self::with_async(upstream, None, fold_fn(f));
        link.lift = Some(Box::new(|v| v));
        link
    }
}

#[async_trait]
impl<S: PullObj, A: Clone + Send + 'static> PullObj for Reduce<S, A> {
    type Item = A;

    async fn next(&mut self) -> Result<Step<A>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        match self.upstream.next().await? {
            Step::Next(v) => {
                let next_acc = match self.acc.take() {
                    Some(acc) => {
                        let fut = (self.fold)(acc, v);
                        fut.await?
                    }
                    None => match self.lift.as_mut() {
                        Some(lift) => lift(v),
                        None => {
                            return Err(FlowError::IllegalState(
                                "reduce has neither a seed nor a first-value lift".into(),
                            ))
                        }
                    },
                };
                self.acc = Some(next_acc.clone());
                Ok(Step::Next(next_acc))
            }
            Step::Done(_) => Ok(Step::Done(None)),
        }
    }

    async fn finish(&mut self) -> Result<Step<A>> {
        if self.life.finish() {
            self.upstream.finish().await?;
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<A>> {
        if self.life.fault() {
            self.upstream.fault(err).await?;
        }
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjMeta {
        &mut self.meta
    }
}

/// Suppresses values whose key has been seen before. The key set persists
/// for the lifetime of the link.
pub struct Dedupe<S: PullObj, K> {
    meta: ObjMeta,
    life: Lifecycle,
    upstream: S,
    key: Box<dyn FnMut(&S::Item) -> K + Send>,
    seen: HashSet<K>,
}

impl<S: PullObj, K: Hash + Eq + Send + 'static> Dedupe<S, K> {
    pub fn new(upstream: S, key: impl FnMut(&S::Item) -> K + Send + 'static) -> Self {
        Self {
            meta: ObjMeta::new("dedupe", &[Capability::Pull]),
            life: Lifecycle::default(),
            upstream,
            key: Box::new(key),
            seen: HashSet::new(),
        }
    }

    /// Number of distinct keys seen so far.
    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }
}

impl<S> Dedupe<S, S::Item>
where
    S: PullObj,
    S::Item: Clone + Hash + Eq,
{
    /// Deduplicate on the values themselves.
    pub fn identity(upstream: S) -> Self {
        Self::new(upstream, |v| v.clone())
    }
}

#[async_trait]
impl<S: PullObj, K: Hash + Eq + Send + 'static> PullObj for Dedupe<S, K> {
    type Item = S::Item;

    async fn next(&mut self) -> Result<Step<S::Item>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        loop {
            match self.upstream.next().await? {
                Step::Next(v) => {
                    let k = (self.key)(&v);
                    if self.seen.insert(k) {
                        return Ok(Step::Next(v));
                    }
                }
                Step::Done(_) => return Ok(Step::Done(None)),
            }
        }
    }

    async fn finish(&mut self) -> Result<Step<S::Item>> {
        if self.life.finish() {
            self.upstream.finish().await?;
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<S::Item>> {
        if self.life.fault() {
            self.upstream.fault(err).await?;
        }
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjMeta {
        &mut self.meta
    }
}

/// Passes values through unchanged, invoking a callback synchronously
/// between the pull and the yield.
pub struct Tap<S: PullObj> {
    meta: ObjMeta,
    life: Lifecycle,
    upstream: S,
    callback: Box<dyn FnMut(&S::Item) + Send>,
}

impl<S: PullObj> Tap<S> {
    pub fn new(upstream: S, callback: impl FnMut(&S::Item) + Send + 'static) -> Self {
        Self {
            meta: ObjMeta::new("tap", &[Capability::Pull]),
            life: Lifecycle::default(),
            upstream,
            callback: Box::new(callback),
        }
    }

    /// Swap the callback; effective on the very next call.
    pub fn set_callback(&mut self, callback: impl FnMut(&S::Item) + Send + 'static) {
        self.callback = Box::new(callback);
    }
}

#[async_trait]
impl<S: PullObj> PullObj for Tap<S> {
    type Item = S::Item;

    async fn next(&mut self) -> Result<Step<S::Item>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        match self.upstream.next().await? {
            Step::Next(v) => {
                (self.callback)(&v);
                Ok(Step::Next(v))
            }
            Step::Done(_) => Ok(Step::Done(None)),
        }
    }

    async fn finish(&mut self) -> Result<Step<S::Item>> {
        if self.life.finish() {
            self.upstream.finish().await?;
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<S::Item>> {
        if self.life.fault() {
            self.upstream.fault(err).await?;
        }
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjMeta {
        &mut self.meta
    }
}

/// Collects upstream values into groups of exactly `size`.
///
/// A trailing partial group is the stage's *return value*: it travels in
/// the `Done` payload and is never yielded as a regular window.
pub struct Window<S: PullObj> {
    meta: ObjMeta,
    life: Lifecycle,
    /// Group size, hot-swappable between pulls.
    pub size: usize,
    upstream: S,
    buf: Vec<S::Item>,
}

impl<S: PullObj> Window<S> {
    pub fn new(upstream: S, size: usize) -> Self {
        Self {
            meta: ObjMeta::new("window", &[Capability::Pull]),
            life: Lifecycle::default(),
            size,
            upstream,
            buf: Vec::new(),
        }
    }
}

#[async_trait]
impl<S: PullObj> PullObj for Window<S> {
    type Item = Vec<S::Item>;

    async fn next(&mut self) -> Result<Step<Vec<S::Item>>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        if self.size == 0 {
            return Err(FlowError::IllegalState("window size must be positive".into()));
        }
        self.life.activate();
        loop {
            match self.upstream.next().await? {
                Step::Next(v) => {
                    self.buf.push(v);
                    if self.buf.len() >= self.size {
                        return Ok(Step::Next(std::mem::take(&mut self.buf)));
                    }
                }
                Step::Done(_) => {
                    self.life.finish();
                    let partial = std::mem::take(&mut self.buf);
                    return if partial.is_empty() {
                        Ok(Step::Done(None))
                    } else {
                        Ok(Step::Done(Some(partial)))
                    };
                }
            }
        }
    }

    async fn finish(&mut self) -> Result<Step<Vec<S::Item>>> {
        if self.life.finish() {
            self.upstream.finish().await?;
            let partial = std::mem::take(&mut self.buf);
            if !partial.is_empty() {
                return Ok(Step::Done(Some(partial)));
            }
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<Vec<S::Item>>> {
        if self.life.fault() {
            self.buf.clear();
            self.upstream.fault(err).await?;
        }
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjMeta {
        &mut self.meta
    }
}

/// Collects upstream values and flushes whenever a condition over the
/// current buffer holds. The trailing remainder is the `Done` payload,
/// mirroring [`Window`]'s trailing rule.
pub struct BufferWhen<S: PullObj> {
    meta: ObjMeta,
    life: Lifecycle,
    upstream: S,
    condition: Box<dyn FnMut(&[S::Item]) -> bool + Send>,
    buf: Vec<S::Item>,
}

impl<S: PullObj> BufferWhen<S> {
    pub fn new(upstream: S, condition: impl FnMut(&[S::Item]) -> bool + Send + 'static) -> Self {
        Self {
            meta: ObjMeta::new("buffer_when", &[Capability::Pull]),
            life: Lifecycle::default(),
            upstream,
            condition: Box::new(condition),
            buf: Vec::new(),
        }
    }

    /// Swap the flush condition; effective on the very next call.
    pub fn set_condition(&mut self, condition: impl FnMut(&[S::Item]) -> bool + Send + 'static) {
        self.condition = Box::new(condition);
    }
}

#[async_trait]
impl<S: PullObj> PullObj for BufferWhen<S> {
    type Item = Vec<S::Item>;

    async fn next(&mut self) -> Result<Step<Vec<S::Item>>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        loop {
            match self.upstream.next().await? {
                Step::Next(v) => {
                    self.buf.push(v);
                    if (self.condition)(&self.buf) {
                        return Ok(Step::Next(std::mem::take(&mut self.buf)));
                    }
                }
                Step::Done(_) => {
                    self.life.finish();
                    let rest = std::mem::take(&mut self.buf);
                    return if rest.is_empty() {
                        Ok(Step::Done(None))
                    } else {
                        Ok(Step::Done(Some(rest)))
                    };
                }
            }
        }
    }

    async fn finish(&mut self) -> Result<Step<Vec<S::Item>>> {
        if self.life.finish() {
            self.upstream.finish().await?;
            let rest = std::mem::take(&mut self.buf);
            if !rest.is_empty() {
                return Ok(Step::Done(Some(rest)));
            }
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<Vec<S::Item>>> {
        if self.life.fault() {
            self.buf.clear();
            self.upstream.fault(err).await?;
        }
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjMeta {
        &mut self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::map_fn;
    use crate::obj::PullExt;
    use crate::source::SourceBuffer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_map_transforms_each_value() {
        let mut link = Map::new(SourceBuffer::new(1..=3), |v| v * 10);
        assert_eq!(link.collect_values().await.unwrap(), vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_map_hot_swap_takes_effect_next_call() {
        let mut link = Map::new(SourceBuffer::new(1..=3), |v| v + 1);
        assert_eq!(link.next().await.unwrap(), Step::Next(2));
        link.set_transform(map_fn(|v: i32| v * 100));
        assert_eq!(link.next().await.unwrap(), Step::Next(200));
    }

    #[tokio::test]
    async fn test_filter_drops_non_matching() {
        let mut link = Filter::new(SourceBuffer::new(1..=6), |v: &i32| v % 2 == 0);
        assert_eq!(link.collect_values().await.unwrap(), vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn test_flat_map_drains_inner_before_pulling() {
        let mut link = FlatMap::new(SourceBuffer::new(vec![1, 10]), |v| vec![v, v + 1, v + 2]);
        assert_eq!(
            link.collect_values().await.unwrap(),
            vec![1, 2, 3, 10, 11, 12]
        );
    }

    #[tokio::test]
    async fn test_reduce_streams_running_accumulator() {
        let mut link = Reduce::new(SourceBuffer::new(vec![1, 2, 3]), 0, |acc, v| acc + v);
        assert_eq!(link.collect_values().await.unwrap(), vec![1, 3, 6]);
    }

    #[tokio::test]
    async fn test_running_reduce_uses_first_value_as_seed() {
        let mut link = Reduce::running(SourceBuffer::new(vec![5, 2, 3]), |acc, v| acc + v);
        assert_eq!(link.next().await.unwrap(), Step::Next(5));
        assert_eq!(link.next().await.unwrap(), Step::Next(7));
        assert_eq!(link.next().await.unwrap(), Step::Next(10));
    }

    #[tokio::test]
    async fn test_dedupe_suppresses_seen_keys_forever() {
        let mut link = Dedupe::identity(SourceBuffer::new(vec![1, 2, 1, 3, 2, 1]));
        assert_eq!(link.collect_values().await.unwrap(), vec![1, 2, 3]);
        assert_eq!(link.seen_len(), 3);
    }

    #[tokio::test]
    async fn test_tap_sees_every_value_unchanged() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let mut link = Tap::new(SourceBuffer::new(1..=4), move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(link.collect_values().await.unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_window_groups_and_returns_partial() {
        let mut link = Window::new(SourceBuffer::new(1..=5), 2);
        assert_eq!(link.next().await.unwrap(), Step::Next(vec![1, 2]));
        assert_eq!(link.next().await.unwrap(), Step::Next(vec![3, 4]));
        // The trailing partial group is the return value, never yielded.
        assert_eq!(link.next().await.unwrap(), Step::Done(Some(vec![5])));
        assert_eq!(link.next().await.unwrap(), Step::Done(None));
    }

    #[tokio::test]
    async fn test_window_collect_skips_partial() {
        let mut link = Window::new(SourceBuffer::new(1..=5), 2);
        assert_eq!(
            link.collect_values().await.unwrap(),
            vec![vec![1, 2], vec![3, 4]]
        );
    }

    #[tokio::test]
    async fn test_window_size_hot_swap() {
        let mut link = Window::new(SourceBuffer::new(1..=9), 2);
        assert_eq!(link.next().await.unwrap(), Step::Next(vec![1, 2]));
        link.size = 3;
        assert_eq!(link.next().await.unwrap(), Step::Next(vec![3, 4, 5]));
    }

    #[tokio::test]
    async fn test_buffer_when_flushes_on_condition() {
        let mut link = BufferWhen::new(SourceBuffer::new(1..=7), |buf: &[i32]| {
            buf.iter().sum::<i32>() >= 6
        });
        assert_eq!(link.next().await.unwrap(), Step::Next(vec![1, 2, 3]));
        assert_eq!(link.next().await.unwrap(), Step::Next(vec![4, 5]));
        assert_eq!(link.next().await.unwrap(), Step::Next(vec![6]));
        // 7 alone never satisfies the condition, so it is the return value.
        assert_eq!(link.next().await.unwrap(), Step::Done(Some(vec![7])));
    }

    #[tokio::test]
    async fn test_finish_propagates_upstream_once() {
        let mut link = Map::new(SourceBuffer::new(1..=100), |v| v);
        link.next().await.unwrap();
        link.finish().await.unwrap();
        assert_eq!(link.next().await.unwrap(), Step::Done(None));
        // Idempotent: a second finish and a late fault are no-ops.
        link.finish().await.unwrap();
        link.fault(FlowError::message("late")).await.unwrap();
        assert_eq!(link.next().await.unwrap(), Step::Done(None));
    }

    #[tokio::test]
    async fn test_stage_error_leaves_link_open() {
        let mut calls = 0;
        let mut link = Map::with_async(
            SourceBuffer::new(vec![1, 2]),
            Box::new(move |v: i32| {
                calls += 1;
                let fail = calls == 1;
                Box::pin(async move {
                    if fail {
                        Err(FlowError::message("first call fails"))
                    } else {
                        Ok(v * 2)
                    }
                })
            }),
        );
        assert!(link.next().await.is_err());
        // The error propagated but did not close the stage.
        assert_eq!(link.next().await.unwrap(), Step::Next(4));
    }
}
