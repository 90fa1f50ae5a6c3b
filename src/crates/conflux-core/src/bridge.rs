//! Bridges between the push and pull data-flow modes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{FlowError, Result};
use crate::obj::{BoxPush, Capability, Lifecycle, ObjMeta, PullObj, PushObj, SharedLife, Step};
use crate::wait::WaitObject;

struct BridgeShared<T> {
    queue: Mutex<VecDeque<T>>,
    gate: WaitObject<()>,
    closed: AtomicBool,
}

/// Push side of a push-to-pull buffer bridge.
pub struct BridgeSink<T> {
    meta: ObjMeta,
    life: SharedLife,
    shared: Arc<BridgeShared<T>>,
}

/// Pull side of a push-to-pull buffer bridge.
pub struct BridgeSource<T> {
    meta: ObjMeta,
    life: Lifecycle,
    shared: Arc<BridgeShared<T>>,
}

/// A paired (sink, source) over one shared ordered buffer.
///
/// The sink appends, the source drains in order, and a shared last-wins
/// gate wakes the source whenever an append lands on an empty buffer. The
/// source reports done only after the sink has been finished AND the
/// buffer is drained. The buffer is unbounded: backpressure, if needed,
/// must be imposed upstream of the sink.
pub fn push_pull_buffer<T: Send + 'static>() -> (BridgeSink<T>, BridgeSource<T>) {
    let shared = Arc::new(BridgeShared {
        queue: Mutex::new(VecDeque::new()),
        gate: WaitObject::new(),
        closed: AtomicBool::new(false),
    });
    (
        BridgeSink {
            meta: ObjMeta::new("bridge_sink", &[Capability::Sink, Capability::Bridge]),
            life: SharedLife::new(),
            shared: shared.clone(),
        },
        BridgeSource {
            meta: ObjMeta::new("bridge_source", &[Capability::Source, Capability::Bridge]),
            life: Lifecycle::default(),
            shared,
        },
    )
}

#[async_trait]
impl<T: Send + 'static> PushObj for BridgeSink<T> {
    type Item = T;

    async fn push(&self, value: T) -> Result<Step<()>> {
        if self.life.is_closed() || self.shared.closed.load(Ordering::Acquire) {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        self.shared.queue.lock().push_back(value);
        self.shared.gate.resolve(());
        Ok(Step::Next(()))
    }

    async fn finish(&self) -> Result<Step<()>> {
        if self.life.finish() {
            self.shared.closed.store(true, Ordering::Release);
            // Wake the source so it can observe the close.
            self.shared.gate.resolve(());
        }
        Ok(Step::Done(None))
    }

    async fn fault(&self, _err: FlowError) -> Result<Step<()>> {
        if self.life.fault() {
            self.shared.closed.store(true, Ordering::Release);
            self.shared.gate.resolve(());
        }
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }
}

#[async_trait]
impl<T: Send + 'static> PullObj for BridgeSource<T> {
    type Item = T;

    async fn next(&mut self) -> Result<Step<T>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        loop {
            if let Some(v) = self.shared.queue.lock().pop_front() {
                return Ok(Step::Next(v));
            }
            if self.shared.closed.load(Ordering::Acquire) {
                self.life.finish();
                return Ok(Step::Done(None));
            }
            self.shared.gate.wait().await;
        }
    }

    async fn finish(&mut self) -> Result<Step<T>> {
        if self.life.finish() {
            // Closing the drain side also stops the feed side.
            self.shared.closed.store(true, Ordering::Release);
            self.shared.queue.lock().clear();
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, _err: FlowError) -> Result<Step<T>> {
        if self.life.fault() {
            self.shared.closed.store(true, Ordering::Release);
            self.shared.queue.lock().clear();
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

/// A pull stage that also delivers each value to attached push sinks
/// before yielding it downstream.
///
/// Sinks are fed sequentially and awaited, so a slow sink throttles the
/// pull.
pub struct TapThrough<S: PullObj>
where
    S::Item: Clone,
{
    meta: ObjMeta,
    life: Lifecycle,
    upstream: S,
    sinks: Vec<BoxPush<S::Item>>,
}

impl<S: PullObj> TapThrough<S>
where
    S::Item: Clone,
{
    pub fn new(upstream: S, sinks: Vec<BoxPush<S::Item>>) -> Self {
        Self {
            meta: ObjMeta::new("tap_through", &[Capability::Pull, Capability::Bridge]),
            life: Lifecycle::default(),
            upstream,
            sinks,
        }
    }

    /// Attach one more push sink.
    pub fn attach(&mut self, sink: BoxPush<S::Item>) {
        self.sinks.push(sink);
    }
}

#[async_trait]
impl<S: PullObj> PullObj for TapThrough<S>
where
    S::Item: Clone,
{
    type Item = S::Item;

    async fn next(&mut self) -> Result<Step<S::Item>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        match self.upstream.next().await? {
            Step::Next(v) => {
                for sink in &self.sinks {
                    sink.push(v.clone()).await?;
                }
                Ok(Step::Next(v))
            }
            Step::Done(_) => Ok(Step::Done(None)),
        }
    }

    async fn finish(&mut self) -> Result<Step<S::Item>> {
        if self.life.finish() {
            self.upstream.finish().await?;
            for sink in &self.sinks {
                sink.finish().await?;
            }
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<S::Item>> {
        if self.life.fault() {
            for sink in &self.sinks {
                sink.fault(FlowError::message(err.to_string())).await?;
            }
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
    use crate::obj::PullExt;
    use crate::sink::SinkCollect;
    use crate::source::SourceBuffer;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bridge_drains_in_push_order() {
        let (sink, mut source) = push_pull_buffer();
        sink.push(1).await.unwrap();
        sink.push(2).await.unwrap();
        sink.push(3).await.unwrap();
        sink.finish().await.unwrap();
        assert_eq!(source.collect_values().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_bridge_done_requires_close_and_empty() {
        let (sink, mut source) = push_pull_buffer();
        sink.push(1).await.unwrap();
        sink.finish().await.unwrap();
        // Buffer still holds a value; done comes only after draining it.
        assert_eq!(source.next().await.unwrap(), Step::Next(1));
        assert_eq!(source.next().await.unwrap(), Step::Done(None));
    }

    #[tokio::test]
    async fn test_bridge_source_waits_for_producer() {
        let (sink, mut source) = push_pull_buffer();
        let consumer = tokio::spawn(async move {
            let v = source.next().await.unwrap();
            (v, source)
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        sink.push(99).await.unwrap();
        let (v, _source) = consumer.await.unwrap();
        assert_eq!(v, Step::Next(99));
    }

    #[tokio::test]
    async fn test_bridge_sink_rejects_after_source_finish() {
        let (sink, mut source) = push_pull_buffer::<i32>();
        source.finish().await.unwrap();
        assert_eq!(sink.push(1).await.unwrap(), Step::Done(None));
    }

    #[tokio::test]
    async fn test_tap_through_delivers_then_yields() {
        let audit = SinkCollect::new();
        let buf = audit.buffer();
        let mut stage = TapThrough::new(
            SourceBuffer::new(vec![1, 2, 3]),
            vec![Box::new(audit) as BoxPush<i32>],
        );
        assert_eq!(stage.collect_values().await.unwrap(), vec![1, 2, 3]);
        assert_eq!(buf.lock().clone(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_tap_through_finish_closes_sinks() {
        let audit = SinkCollect::new();
        let buf = audit.buffer();
        let mut stage = TapThrough::new(
            SourceBuffer::new(vec![1, 2, 3]),
            vec![Box::new(audit) as BoxPush<i32>],
        );
        stage.next().await.unwrap();
        stage.finish().await.unwrap();
        assert_eq!(stage.next().await.unwrap(), Step::Done(None));
        // The sink saw exactly the values pulled before the close.
        assert_eq!(buf.lock().clone(), vec![1]);
    }
}
