//! Time-aware pull links: deadline racing and eager prefetch.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{FlowError, Result};
use crate::obj::{Capability, Lifecycle, ObjMeta, PullObj, Step};

type PullDriver<S> = BoxFuture<'static, (S, Result<Step<<S as PullObj>::Item>>)>;

enum TimeoutState<S: PullObj + 'static> {
    /// Upstream is idle and owned directly.
    Idle(S),
    /// An upstream pull is in flight; the driver future owns the upstream
    /// and hands it back together with the result.
    Pending(PullDriver<S>),
}

/// Races each upstream pull against a deadline.
///
/// The in-flight upstream pull is never cancelled: on a timeout it keeps
/// running as an owned driver future, and whatever it eventually resolves
/// to is discarded before a fresh pull is issued. With `throw_on_timeout`
/// set the deadline surfaces as [`FlowError::Timeout`]; otherwise the stage
/// silently retries with a fresh deadline.
pub struct Timeout<S: PullObj + 'static> {
    meta: ObjMeta,
    life: Lifecycle,
    /// Per-pull deadline, hot-swappable between calls.
    pub deadline: Duration,
    /// Whether a deadline miss raises an error or silently retries.
    pub throw_on_timeout: bool,
    state: Option<TimeoutState<S>>,
    stale: bool,
}

impl<S: PullObj + 'static> Timeout<S> {
    pub fn new(upstream: S, deadline: Duration, throw_on_timeout: bool) -> Self {
        Self {
            meta: ObjMeta::new("timeout", &[Capability::Pull]),
            life: Lifecycle::default(),
            deadline,
            throw_on_timeout,
            state: Some(TimeoutState::Idle(upstream)),
            stale: false,
        }
    }

    fn drive(mut upstream: S) -> PullDriver<S> {
        Box::pin(async move {
            let step = upstream.next().await;
            (upstream, step)
        })
    }
}

#[async_trait]
impl<S: PullObj + 'static> PullObj for Timeout<S> {
    type Item = S::Item;

    async fn next(&mut self) -> Result<Step<S::Item>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        loop {
            let mut fut = match self.state.take() {
                Some(TimeoutState::Idle(up)) => Self::drive(up),
                Some(TimeoutState::Pending(fut)) => fut,
                None => {
                    return Err(FlowError::IllegalState(
                        "timeout stage lost its upstream".into(),
                    ))
                }
            };
            match tokio::time::timeout(self.deadline, &mut fut).await {
                Ok((up, step)) => {
                    self.state = Some(TimeoutState::Idle(up));
                    if self.stale {
                        // This result belongs to a pull that already timed
                        // out; drop it and issue a fresh pull.
                        self.stale = false;
                        continue;
                    }
                    return step;
                }
                Err(_) => {
                    self.state = Some(TimeoutState::Pending(fut));
                    self.stale = true;
                    if self.throw_on_timeout {
                        return Err(FlowError::Timeout(self.deadline));
                    }
                    // Retry mode: keep waiting with a fresh deadline; the
                    // late result will be discarded when it lands.
                }
            }
        }
    }

    async fn finish(&mut self) -> Result<Step<S::Item>> {
        if self.life.finish() {
            if let Some(TimeoutState::Idle(mut up)) = self.state.take() {
                up.finish().await?;
            }
            // A pending driver is torn down by dropping it.
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<S::Item>> {
        if self.life.fault() {
            if let Some(TimeoutState::Idle(mut up)) = self.state.take() {
                up.fault(err).await?;
            }
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

/// Keeps up to `depth` upstream pulls in flight ahead of demand.
///
/// The upstream moves into a feeder task that pulls eagerly into a bounded
/// channel; each downstream `next()` takes the oldest buffered result,
/// which frees a slot and lets the feeder issue one more pull. Completion
/// order is FIFO by construction.
pub struct Prefetch<T> {
    meta: ObjMeta,
    life: Lifecycle,
    rx: mpsc::Receiver<Result<Step<T>>>,
    feeder: JoinHandle<()>,
}

impl<T: Send + 'static> Prefetch<T> {
    pub fn new<S>(mut upstream: S, depth: usize) -> Self
    where
        S: PullObj<Item = T> + 'static,
    {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let feeder = tokio::spawn(async move {
            loop {
                tokio::select! {
                    // The consumer closed its end; wind the upstream down.
                    _ = tx.closed() => {
                        let _ = upstream.finish().await;
                        break;
                    }
                    step = upstream.next() => {
                        let done = matches!(&step, Ok(Step::Done(_)));
                        if tx.send(step).await.is_err() {
                            let _ = upstream.finish().await;
                            break;
                        }
                        if done {
                            break;
                        }
                    }
                }
            }
        });
        Self {
            meta: ObjMeta::new("prefetch", &[Capability::Pull]),
            life: Lifecycle::default(),
            rx,
            feeder,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> PullObj for Prefetch<T> {
    type Item = T;

    async fn next(&mut self) -> Result<Step<T>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        match self.rx.recv().await {
            Some(step) => step,
            None => Ok(Step::Done(None)),
        }
    }

    async fn finish(&mut self) -> Result<Step<T>> {
        if self.life.finish() {
            self.rx.close();
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, _err: FlowError) -> Result<Step<T>> {
        if self.life.fault() {
            self.rx.close();
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

impl<T> Drop for Prefetch<T> {
    fn drop(&mut self) {
        self.rx.close();
        self.feeder.abort();
    }
}
