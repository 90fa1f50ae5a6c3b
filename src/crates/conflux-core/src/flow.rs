//! Fluent forward-construction facade for pull pipelines.
//!
//! `Flow` is a thin, chainable layer over the pull Obj constructors: each
//! operation appends one link and returns a new flow by move, so a
//! consumed flow cannot be built on twice. Everything here boxes into
//! [`BoxPull`], trading a little dispatch for composability.

use futures::Stream;
use std::hash::Hash;
use std::time::Duration;

use crate::combine::labeled::{
    LabeledConcat, LabeledRace, LabeledRaceCutoff, LabeledRaceRobin, LabeledRoundRobin,
    LabeledValue, LabeledZip,
};
use crate::combine::race::{Attributed, Race, RaceCutoff, RaceRobin};
use crate::combine::{Concat, RoundRobin, Zip};
use crate::error::Result;
use crate::obj::{BoxPull, PullExt, PullObj, Step};
use crate::pull::reorder::Reorder;
use crate::pull::timing::{Prefetch, Timeout};
use crate::pull::{BufferWhen, Dedupe, Filter, FlatMap, Map, Reduce, Tap, Window};
use crate::source::{SourceBuffer, SourceStream};

/// A chainable pull pipeline ending in values of type `T`.
pub struct Flow<T: Send + 'static> {
    inner: BoxPull<T>,
}

impl<T: Send + 'static> Flow<T> {
    /// Start a flow from any pull stage.
    pub fn source(obj: impl PullObj<Item = T> + 'static) -> Self {
        Self {
            inner: Box::new(obj),
        }
    }

    /// Start a flow over a finite in-memory sequence.
    pub fn from_iter(items: impl IntoIterator<Item = T>) -> Self {
        Self::source(SourceBuffer::new(items))
    }

    /// Start a flow over an async stream.
    pub fn from_stream(stream: impl Stream<Item = T> + Send + 'static) -> Self {
        Self::source(SourceStream::new(stream))
    }

    /// Merge flows source-by-source.
    pub fn concat(flows: Vec<Flow<T>>) -> Self {
        Self::source(Concat::new(flows.into_iter().map(|f| f.inner).collect()))
    }

    /// Merge flows in strict rotation.
    pub fn round_robin(flows: Vec<Flow<T>>) -> Self {
        Self::source(RoundRobin::new(
            flows.into_iter().map(|f| f.inner).collect(),
        ))
    }

    /// Merge flows positionally, one value per active flow per round.
    pub fn zip(flows: Vec<Flow<T>>) -> Flow<Vec<T>> {
        Flow::source(Zip::new(flows.into_iter().map(|f| f.inner).collect()))
    }

    /// Race flows, attributing each value to its source index.
    pub fn race(flows: Vec<Flow<T>>) -> Flow<Attributed<T>> {
        Flow::source(Race::new(flows.into_iter().map(|f| f.inner).collect()))
    }

    /// Fair race: every active flow yields once per round.
    pub fn race_robin(flows: Vec<Flow<T>>) -> Flow<Attributed<T>> {
        Flow::source(RaceRobin::new(
            flows.into_iter().map(|f| f.inner).collect(),
        ))
    }

    /// Race with a per-wait deadline; laggards are discarded.
    pub fn race_cutoff(flows: Vec<Flow<T>>, deadline: Duration) -> Flow<Attributed<T>> {
        Flow::source(RaceCutoff::new(
            flows.into_iter().map(|f| f.inner).collect(),
            deadline,
        ))
    }

    /// Merge keyed flows source-by-source, labeling each value.
    pub fn concat_labeled(flows: Vec<(String, Flow<T>)>) -> Flow<LabeledValue<T>> {
        Flow::source(LabeledConcat::new(
            flows.into_iter().map(|(k, f)| (k, f.inner)).collect(),
        ))
    }

    /// Merge keyed flows in rotation, labeling each value.
    pub fn round_robin_labeled(flows: Vec<(String, Flow<T>)>) -> Flow<LabeledValue<T>> {
        Flow::source(LabeledRoundRobin::new(
            flows.into_iter().map(|(k, f)| (k, f.inner)).collect(),
        ))
    }

    /// Zip keyed flows, labeling each slot of every round.
    pub fn zip_labeled(flows: Vec<(String, Flow<T>)>) -> Flow<Vec<LabeledValue<T>>> {
        Flow::source(LabeledZip::new(
            flows.into_iter().map(|(k, f)| (k, f.inner)).collect(),
        ))
    }

    /// Race keyed flows, labeling each value with its source key.
    pub fn race_labeled(flows: Vec<(String, Flow<T>)>) -> Flow<LabeledValue<T>> {
        Flow::source(LabeledRace::new(
            flows.into_iter().map(|(k, f)| (k, f.inner)).collect(),
        ))
    }

    /// Fair race over keyed flows, labeling each value.
    pub fn race_robin_labeled(flows: Vec<(String, Flow<T>)>) -> Flow<LabeledValue<T>> {
        Flow::source(LabeledRaceRobin::new(
            flows.into_iter().map(|(k, f)| (k, f.inner)).collect(),
        ))
    }

    /// Deadline race over keyed flows, labeling each value.
    pub fn race_cutoff_labeled(
        flows: Vec<(String, Flow<T>)>,
        deadline: Duration,
    ) -> Flow<LabeledValue<T>> {
        Flow::source(LabeledRaceCutoff::new(
            flows.into_iter().map(|(k, f)| (k, f.inner)).collect(),
            deadline,
        ))
    }

    /// Append a transform link.
    pub fn map<U: Send + 'static>(self, f: impl FnMut(T) -> U + Send + 'static) -> Flow<U> {
        Flow::source(Map::new(self.inner, f))
    }

    /// Append a predicate link.
    pub fn filter(self, p: impl FnMut(&T) -> bool + Send + 'static) -> Flow<T> {
        Flow::source(Filter::new(self.inner, p))
    }

    /// Append an expansion link.
    pub fn flat_map<U, I>(self, f: impl FnMut(T) -> I + Send + 'static) -> Flow<U>
    where
        U: Send + 'static,
        I: IntoIterator<Item = U>,
        I::IntoIter: Send + 'static,
    {
        Flow::source(FlatMap::new(self.inner, f))
    }

    /// Append a running-accumulator link.
    pub fn reduce<A: Clone + Send + 'static>(
        self,
        seed: A,
        f: impl FnMut(A, T) -> A + Send + 'static,
    ) -> Flow<A> {
        Flow::source(Reduce::new(self.inner, seed, f))
    }

    /// Append a key-set deduplication link.
    pub fn dedupe_by<K: Hash + Eq + Send + 'static>(
        self,
        key: impl FnMut(&T) -> K + Send + 'static,
    ) -> Flow<T> {
        Flow::source(Dedupe::new(self.inner, key))
    }

    /// Append an observation link.
    pub fn tap(self, f: impl FnMut(&T) + Send + 'static) -> Flow<T> {
        Flow::source(Tap::new(self.inner, f))
    }

    /// Append a fixed-size grouping link.
    pub fn window(self, size: usize) -> Flow<Vec<T>> {
        Flow::source(Window::new(self.inner, size))
    }

    /// Append a condition-flushed buffering link.
    pub fn buffer_when(self, cond: impl FnMut(&[T]) -> bool + Send + 'static) -> Flow<Vec<T>> {
        Flow::source(BufferWhen::new(self.inner, cond))
    }

    /// Append a deadline link.
    pub fn timeout(self, deadline: Duration, throw_on_timeout: bool) -> Flow<T> {
        Flow::source(Timeout::new(self.inner, deadline, throw_on_timeout))
    }

    /// Append an eager prefetch link keeping up to `depth` pulls in flight.
    pub fn prefetch(self, depth: usize) -> Flow<T> {
        Flow::source(Prefetch::new(self.inner, depth))
    }

    /// Append a monotonic-key resequencing link.
    pub fn reorder(self, start_key: u64, key: impl FnMut(&T) -> u64 + Send + 'static) -> Flow<T> {
        Flow::source(Reorder::new(self.inner, start_key, key))
    }

    /// Drain the flow into a vector, discarding any return value.
    pub async fn collect(mut self) -> Result<Vec<T>> {
        self.inner.collect_values().await
    }

    /// Drain the flow, returning yielded values and the return value.
    pub async fn drain(mut self) -> Result<(Vec<T>, Option<T>)> {
        self.inner.drain().await
    }

    /// Pull a single step, for callers that drive demand themselves.
    pub async fn next(&mut self) -> Result<Step<T>> {
        self.inner.next().await
    }

    /// Unwrap into the underlying boxed stage.
    pub fn into_inner(self) -> BoxPull<T> {
        self.inner
    }
}

impl<T: Clone + Hash + Eq + Send + 'static> Flow<T> {
    /// Deduplicate on the values themselves.
    pub fn dedupe(self) -> Flow<T> {
        Flow::source(Dedupe::identity(self.inner))
    }
}
