//! Source stages: where values enter a pull pipeline.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use futures::Stream;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval};

use crate::error::{FlowError, Result};
use crate::obj::{Capability, Lifecycle, ObjMeta, PullObj, Step};

/// A source over a finite, ordered, in-memory sequence.
pub struct SourceBuffer<T> {
    meta: ObjMeta,
    life: Lifecycle,
    items: VecDeque<T>,
}

impl<T: Send + 'static> SourceBuffer<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            meta: ObjMeta::new("source_buffer", &[Capability::Source, Capability::Pull]),
            life: Lifecycle::default(),
            items: items.into_iter().collect(),
        }
    }

    /// Number of values not yet yielded.
    pub fn remaining(&self) -> usize {
        self.items.len()
    }
}

#[async_trait]
impl<T: Send + 'static> PullObj for SourceBuffer<T> {
    type Item = T;

    async fn next(&mut self) -> Result<Step<T>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        match self.items.pop_front() {
            Some(v) => Ok(Step::Next(v)),
            None => Ok(Step::Done(None)),
        }
    }

    async fn finish(&mut self) -> Result<Step<T>> {
        self.life.finish();
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, _err: FlowError) -> Result<Step<T>> {
        self.life.fault();
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjMeta {
        &mut self.meta
    }
}

/// A source that yields a monotonically increasing tick count at a fixed
/// period. The period is re-read on every pull, so it can be retuned while
/// the pipeline runs.
pub struct SourceTimer {
    meta: ObjMeta,
    life: Lifecycle,
    /// Tick period, hot-swappable between pulls.
    pub period: Duration,
    armed_period: Duration,
    interval: Interval,
    ticks: u64,
}

impl SourceTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            meta: ObjMeta::new("source_timer", &[Capability::Source, Capability::Pull]),
            life: Lifecycle::default(),
            period,
            armed_period: period,
            interval: interval_at(Instant::now() + period, period),
            ticks: 0,
        }
    }

    /// Ticks yielded so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

#[async_trait]
impl PullObj for SourceTimer {
    type Item = u64;

    async fn next(&mut self) -> Result<Step<u64>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        if self.period != self.armed_period {
            self.armed_period = self.period;
            self.interval = interval_at(Instant::now() + self.period, self.period);
        }
        self.interval.tick().await;
        let tick = self.ticks;
        self.ticks += 1;
        Ok(Step::Next(tick))
    }

    async fn finish(&mut self) -> Result<Step<u64>> {
        self.life.finish();
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, _err: FlowError) -> Result<Step<u64>> {
        self.life.fault();
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjMeta {
        &mut self.meta
    }
}

/// Adapter wrapping an arbitrary async stream as a pull source.
///
/// This is how foreign async iterators enter a pipeline: anything that
/// implements [`futures::Stream`] becomes an Obj.
pub struct SourceStream<T> {
    meta: ObjMeta,
    life: Lifecycle,
    inner: BoxStream<'static, Result<T>>,
}

impl<T: Send + 'static> SourceStream<T> {
    /// Wrap an infallible stream.
    pub fn new(stream: impl Stream<Item = T> + Send + 'static) -> Self {
        Self::from_try_stream(stream.map(Ok))
    }

    /// Wrap a stream whose items are already `Result`s; errors propagate as
    /// stage-work errors without closing the source.
    pub fn from_try_stream(stream: impl Stream<Item = Result<T>> + Send + 'static) -> Self {
        Self {
            meta: ObjMeta::new("source_stream", &[Capability::Source, Capability::Pull]),
            life: Lifecycle::default(),
            inner: stream.boxed(),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> PullObj for SourceStream<T> {
    type Item = T;

    async fn next(&mut self) -> Result<Step<T>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        match self.inner.next().await {
            Some(item) => Ok(Step::Next(item?)),
            None => Ok(Step::Done(None)),
        }
    }

    async fn finish(&mut self) -> Result<Step<T>> {
        self.life.finish();
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, _err: FlowError) -> Result<Step<T>> {
        self.life.fault();
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjMeta {
        &mut self.meta
    }
}
