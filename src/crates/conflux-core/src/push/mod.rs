//! Eager push stages and fan-out terminals.
//!
//! Push chains are wired backward: every stage is constructed already
//! holding its downstream sink(s), and `push(value)` resolves only after
//! every downstream stage has accepted the value. Stages take `&self` so a
//! chain handle can be shared by concurrent producers; ordering across
//! concurrent pushes is only guaranteed downstream of a
//! [`Serial`](crate::push::serial::Serial) gate.

pub mod lane;
pub mod recipe;
pub mod serial;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{FlowError, Result};
use crate::funcs::{AsyncFold, AsyncMap, AsyncPred};
use crate::obj::{BoxPush, Capability, ObjMeta, PushObj, SharedLife, Step};

/// Transforms each pushed value before delivering it downstream.
pub struct PushMap<T, U> {
    meta: ObjMeta,
    life: SharedLife,
    transform: Mutex<AsyncMap<T, U>>,
    down: BoxPush<U>,
}

impl<T: Send + 'static, U: Send + 'static> PushMap<T, U> {
    pub fn new(transform: AsyncMap<T, U>, down: BoxPush<U>) -> Self {
        Self {
            meta: ObjMeta::new("push_map", &[Capability::Push]),
            life: SharedLife::new(),
            transform: Mutex::new(transform),
            down,
        }
    }

    /// Swap the transform; effective on the very next push.
    pub fn set_transform(&self, transform: AsyncMap<T, U>) {
        *self.transform.lock() = transform;
    }
}

#[async_trait]
impl<T: Send + 'static, U: Send + 'static> PushObj for PushMap<T, U> {
    type Item = T;

    async fn push(&self, value: T) -> Result<Step<()>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        let fut = {
            let mut f = self.transform.lock();
            (*f)(value)
        };
        let out = fut.await?;
        self.down.push(out).await
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

/// Forwards only the pushed values matching a predicate.
pub struct PushFilter<T> {
    meta: ObjMeta,
    life: SharedLife,
    predicate: Mutex<AsyncPred<T>>,
    down: BoxPush<T>,
}

impl<T: Send + 'static> PushFilter<T> {
    pub fn new(predicate: AsyncPred<T>, down: BoxPush<T>) -> Self {
        Self {
            meta: ObjMeta::new("push_filter", &[Capability::Push]),
            life: SharedLife::new(),
            predicate: Mutex::new(predicate),
            down,
        }
    }

    /// Swap the predicate; effective on the very next push.
    pub fn set_predicate(&self, predicate: AsyncPred<T>) {
        *self.predicate.lock() = predicate;
    }
}

#[async_trait]
impl<T: Send + 'static> PushObj for PushFilter<T> {
    type Item = T;

    async fn push(&self, value: T) -> Result<Step<()>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        let keep = {
            let fut = {
                let mut p = self.predicate.lock();
                (*p)(&value)
            };
            fut.await?
        };
        if keep {
            self.down.push(value).await
        } else {
            Ok(Step::Next(()))
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

struct ReduceState<A, T> {
    acc: Option<A>,
    fold: AsyncFold<A, T>,
    lift: Option<Box<dyn FnMut(T) -> A + Send>>,
}

/// Delivers the running accumulator downstream after every pushed value.
///
/// Folds are serialized through an async mutex so concurrent producers
/// cannot interleave accumulator updates.
pub struct PushReduce<T, A> {
    meta: ObjMeta,
    life: SharedLife,
    state: tokio::sync::Mutex<ReduceState<A, T>>,
    down: BoxPush<A>,
}

impl<T: Send + 'static, A: Clone + Send + 'static> PushReduce<T, A> {
    pub fn new(seed: A, fold: AsyncFold<A, T>, down: BoxPush<A>) -> Self {
        Self {
            meta: ObjMeta::new("push_reduce", &[Capability::Push]),
            life: SharedLife::new(),
            state: tokio::sync::Mutex::new(ReduceState {
                acc: Some(seed),
                fold,
                lift: None,
            }),
            down,
        }
    }
}

impl<T: Clone + Send + 'static> PushReduce<T, T> {
    /// Seedless: the first pushed value becomes the accumulator.
    pub fn running(fold: AsyncFold<T, T>, down: BoxPush<T>) -> Self {
        Self {
            meta: ObjMeta::new("push_reduce", &[Capability::Push]),
            life: SharedLife::new(),
            state: tokio::sync::Mutex::new(ReduceState {
                acc: None,
                fold,
                lift: Some(Box::new(|v| v)),
            }),
            down,
        }
    }
}

#[async_trait]
impl<T: Send + 'static, A: Clone + Send + 'static> PushObj for PushReduce<T, A> {
    type Item = T;

    async fn push(&self, value: T) -> Result<Step<()>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        let next_acc = {
            let mut st = self.state.lock().await;
            let next = match st.acc.take() {
                Some(acc) => (st.fold)(acc, value).await?,
                None => match st.lift.as_mut() {
                    Some(lift) => lift(value),
                    None => {
                        return Err(FlowError::IllegalState(
                            "reduce has neither a seed nor a first-value lift".into(),
                        ))
                    }
                },
            };
            st.acc = Some(next.clone());
            next
        };
        self.down.push(next_acc).await
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

/// Groups pushed values into chunks of `size` before delivering them.
/// A trailing partial chunk is flushed downstream on `finish`.
pub struct PushWindow<T> {
    meta: ObjMeta,
    life: SharedLife,
    size: AtomicUsize,
    buf: Mutex<Vec<T>>,
    down: BoxPush<Vec<T>>,
}

impl<T: Send + 'static> PushWindow<T> {
    pub fn new(size: usize, down: BoxPush<Vec<T>>) -> Self {
        Self {
            meta: ObjMeta::new("push_window", &[Capability::Push]),
            life: SharedLife::new(),
            size: AtomicUsize::new(size.max(1)),
            buf: Mutex::new(Vec::new()),
            down,
        }
    }

    /// Retune the window size; effective on the very next push.
    pub fn set_size(&self, size: usize) {
        self.size.store(size.max(1), Ordering::Release);
    }
}

#[async_trait]
impl<T: Send + 'static> PushObj for PushWindow<T> {
    type Item = T;

    async fn push(&self, value: T) -> Result<Step<()>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        let chunk = {
            let mut buf = self.buf.lock();
            buf.push(value);
            if buf.len() >= self.size.load(Ordering::Acquire) {
                Some(std::mem::take(&mut *buf))
            } else {
                None
            }
        };
        match chunk {
            Some(chunk) => self.down.push(chunk).await,
            None => Ok(Step::Next(())),
        }
    }

    async fn finish(&self) -> Result<Step<()>> {
        if self.life.finish() {
            let rest = std::mem::take(&mut *self.buf.lock());
            if !rest.is_empty() {
                self.down.push(rest).await?;
            }
            self.down.finish().await?;
        }
        Ok(Step::Done(None))
    }

    async fn fault(&self, err: FlowError) -> Result<Step<()>> {
        if self.life.fault() {
            self.buf.lock().clear();
            self.down.fault(err).await?;
        }
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }
}

/// Buffers pushed values and flushes whenever the condition over the
/// current buffer holds. The remainder is flushed on `finish`.
pub struct PushBufferWhen<T> {
    meta: ObjMeta,
    life: SharedLife,
    condition: Mutex<Box<dyn FnMut(&[T]) -> bool + Send>>,
    buf: Mutex<Vec<T>>,
    down: BoxPush<Vec<T>>,
}

impl<T: Send + 'static> PushBufferWhen<T> {
    pub fn new(
        condition: impl FnMut(&[T]) -> bool + Send + 'static,
        down: BoxPush<Vec<T>>,
    ) -> Self {
        Self {
            meta: ObjMeta::new("push_buffer_when", &[Capability::Push]),
            life: SharedLife::new(),
            condition: Mutex::new(Box::new(condition)),
            buf: Mutex::new(Vec::new()),
            down,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> PushObj for PushBufferWhen<T> {
    type Item = T;

    async fn push(&self, value: T) -> Result<Step<()>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        let chunk = {
            let mut buf = self.buf.lock();
            buf.push(value);
            let mut cond = self.condition.lock();
            if (*cond)(&buf) {
                Some(std::mem::take(&mut *buf))
            } else {
                None
            }
        };
        match chunk {
            Some(chunk) => self.down.push(chunk).await,
            None => Ok(Step::Next(())),
        }
    }

    async fn finish(&self) -> Result<Step<()>> {
        if self.life.finish() {
            let rest = std::mem::take(&mut *self.buf.lock());
            if !rest.is_empty() {
                self.down.push(rest).await?;
            }
            self.down.finish().await?;
        }
        Ok(Step::Done(None))
    }

    async fn fault(&self, err: FlowError) -> Result<Step<()>> {
        if self.life.fault() {
            self.buf.lock().clear();
            self.down.fault(err).await?;
        }
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }
}

/// Expands each pushed batch and delivers its elements one by one.
pub struct PushFlatten<T, U> {
    meta: ObjMeta,
    life: SharedLife,
    down: BoxPush<U>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T, U> PushFlatten<T, U>
where
    T: IntoIterator<Item = U> + Send + 'static,
    U: Send + 'static,
{
    pub fn new(down: BoxPush<U>) -> Self {
        Self {
            meta: ObjMeta::new("push_flatten", &[Capability::Push]),
            life: SharedLife::new(),
            down,
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<T, U> PushObj for PushFlatten<T, U>
where
    T: IntoIterator<Item = U> + Send + 'static,
    T::IntoIter: Send,
    U: Send + 'static,
{
    type Item = T;

    async fn push(&self, value: T) -> Result<Step<()>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        for item in value {
            self.down.push(item).await?;
        }
        Ok(Step::Next(()))
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

/// When the callback of a [`PushCallback`] runs relative to delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackPhase {
    /// Before the value is handed downstream.
    Before,
    /// After every downstream stage accepted the value.
    After,
}

/// Invokes a callback around downstream delivery.
pub struct PushCallback<T: Clone> {
    meta: ObjMeta,
    life: SharedLife,
    phase: CallbackPhase,
    callback: Mutex<Box<dyn FnMut(&T) + Send>>,
    down: BoxPush<T>,
}

impl<T: Clone + Send + 'static> PushCallback<T> {
    pub fn new(
        phase: CallbackPhase,
        callback: impl FnMut(&T) + Send + 'static,
        down: BoxPush<T>,
    ) -> Self {
        Self {
            meta: ObjMeta::new("push_callback", &[Capability::Push]),
            life: SharedLife::new(),
            phase,
            callback: Mutex::new(Box::new(callback)),
            down,
        }
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> PushObj for PushCallback<T> {
    type Item = T;

    async fn push(&self, value: T) -> Result<Step<()>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        match self.phase {
            CallbackPhase::Before => {
                (*self.callback.lock())(&value);
                self.down.push(value).await
            }
            CallbackPhase::After => {
                let observed = value.clone();
                let step = self.down.push(value).await?;
                (*self.callback.lock())(&observed);
                Ok(step)
            }
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

/// Broadcast terminal: every branch receives every value, delivered
/// sequentially in branch order. All branches are attempted even when one
/// fails; the first error is surfaced after the loop.
pub struct Fork<T: Clone> {
    meta: ObjMeta,
    life: SharedLife,
    branches: Vec<BoxPush<T>>,
}

impl<T: Clone + Send + 'static> Fork<T> {
    pub fn new(branches: Vec<BoxPush<T>>) -> Self {
        Self {
            meta: ObjMeta::new("fork", &[Capability::Push, Capability::Sink]),
            life: SharedLife::new(),
            branches,
        }
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> PushObj for Fork<T> {
    type Item = T;

    async fn push(&self, value: T) -> Result<Step<()>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        let mut first_err = None;
        for branch in &self.branches {
            if let Err(e) = branch.push(value.clone()).await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(Step::Next(())),
        }
    }

    async fn finish(&self) -> Result<Step<()>> {
        if self.life.finish() {
            let mut first_err = None;
            for branch in &self.branches {
                if let Err(e) = branch.finish().await {
                    first_err.get_or_insert(e);
                }
            }
            if let Some(e) = first_err {
                return Err(e);
            }
        }
        Ok(Step::Done(None))
    }

    async fn fault(&self, err: FlowError) -> Result<Step<()>> {
        if self.life.fault() {
            for branch in &self.branches {
                branch.fault(FlowError::message(err.to_string())).await?;
            }
        }
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }
}

/// Selector-routed terminal: exactly one branch receives each value.
pub struct Distribute<T> {
    meta: ObjMeta,
    life: SharedLife,
    selector: Mutex<Box<dyn FnMut(&T) -> usize + Send>>,
    branches: Vec<BoxPush<T>>,
}

impl<T: Send + 'static> Distribute<T> {
    pub fn new(
        selector: impl FnMut(&T) -> usize + Send + 'static,
        branches: Vec<BoxPush<T>>,
    ) -> Self {
        Self {
            meta: ObjMeta::new("distribute", &[Capability::Push, Capability::Sink]),
            life: SharedLife::new(),
            selector: Mutex::new(Box::new(selector)),
            branches,
        }
    }

    /// Swap the selector; effective on the very next push.
    pub fn set_selector(&self, selector: impl FnMut(&T) -> usize + Send + 'static) {
        *self.selector.lock() = Box::new(selector);
    }
}

#[async_trait]
impl<T: Send + 'static> PushObj for Distribute<T> {
    type Item = T;

    async fn push(&self, value: T) -> Result<Step<()>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        let index = (*self.selector.lock())(&value);
        match self.branches.get(index) {
            Some(branch) => branch.push(value).await,
            None => Err(FlowError::BranchIndex {
                index,
                branches: self.branches.len(),
            }),
        }
    }

    async fn finish(&self) -> Result<Step<()>> {
        if self.life.finish() {
            for branch in &self.branches {
                branch.finish().await?;
            }
        }
        Ok(Step::Done(None))
    }

    async fn fault(&self, err: FlowError) -> Result<Step<()>> {
        if self.life.fault() {
            for branch in &self.branches {
                branch.fault(FlowError::message(err.to_string())).await?;
            }
        }
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }
}

/// Strict-rotation terminal: values go to branches 0, 1, …, k-1, 0, ….
/// The rotation counter assigns slots atomically, so concurrent producers
/// still get a strict assignment order.
pub struct RoundRobinTo<T> {
    meta: ObjMeta,
    life: SharedLife,
    cursor: AtomicUsize,
    branches: Vec<BoxPush<T>>,
}

impl<T: Send + 'static> RoundRobinTo<T> {
    pub fn new(branches: Vec<BoxPush<T>>) -> Self {
        Self {
            meta: ObjMeta::new("round_robin_to", &[Capability::Push, Capability::Sink]),
            life: SharedLife::new(),
            cursor: AtomicUsize::new(0),
            branches,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> PushObj for RoundRobinTo<T> {
    type Item = T;

    async fn push(&self, value: T) -> Result<Step<()>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        if self.branches.is_empty() {
            return Err(FlowError::IllegalState("round-robin over zero branches".into()));
        }
        self.life.activate();
        let index = self.cursor.fetch_add(1, Ordering::AcqRel) % self.branches.len();
        self.branches[index].push(value).await
    }

    async fn finish(&self) -> Result<Step<()>> {
        if self.life.finish() {
            for branch in &self.branches {
                branch.finish().await?;
            }
        }
        Ok(Step::Done(None))
    }

    async fn fault(&self, err: FlowError) -> Result<Step<()>> {
        if self.life.fault() {
            for branch in &self.branches {
                branch.fault(FlowError::message(err.to_string())).await?;
            }
        }
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }
}
