//! Terminal sinks: where pushed values are reified into observable state.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::{FlowError, Result};
use crate::obj::{Capability, ObjMeta, PushObj, SharedLife, Step};

/// Shared collection buffer handed out by [`SinkCollect`].
pub type SharedBuffer<T> = Arc<Mutex<Vec<T>>>;

/// A sink appending every accepted value to a shared array.
pub struct SinkCollect<T> {
    meta: ObjMeta,
    life: SharedLife,
    buf: SharedBuffer<T>,
}

impl<T: Send + 'static> SinkCollect<T> {
    pub fn new() -> Self {
        Self::with_buffer(Arc::new(Mutex::new(Vec::new())))
    }

    /// Collect into an existing shared buffer, so several sinks (or outside
    /// observers) can share one array.
    pub fn with_buffer(buf: SharedBuffer<T>) -> Self {
        Self {
            meta: ObjMeta::new("sink_collect", &[Capability::Sink, Capability::Push]),
            life: SharedLife::new(),
            buf,
        }
    }

    /// Handle to the shared buffer.
    pub fn buffer(&self) -> SharedBuffer<T> {
        self.buf.clone()
    }

    /// Copy of the collected values so far.
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.buf.lock().clone()
    }
}

impl<T: Send + 'static> Default for SinkCollect<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> PushObj for SinkCollect<T> {
    type Item = T;

    async fn push(&self, value: T) -> Result<Step<()>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        self.buf.lock().push(value);
        Ok(Step::Next(()))
    }

    async fn finish(&self) -> Result<Step<()>> {
        self.life.finish();
        Ok(Step::Done(None))
    }

    async fn fault(&self, _err: FlowError) -> Result<Step<()>> {
        self.life.fault();
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }
}

/// Callback invoked by [`SinkCallbacks`] for every accepted value.
pub type SinkCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A sink fanning every accepted value out to one or more callbacks.
pub struct SinkCallbacks<T> {
    meta: ObjMeta,
    life: SharedLife,
    callbacks: Vec<SinkCallback<T>>,
}

impl<T: Send + 'static> SinkCallbacks<T> {
    pub fn new(callbacks: Vec<SinkCallback<T>>) -> Self {
        Self {
            meta: ObjMeta::new("sink_callbacks", &[Capability::Sink, Capability::Push]),
            life: SharedLife::new(),
            callbacks,
        }
    }

    /// Convenience constructor for a single callback.
    pub fn single(cb: impl Fn(&T) + Send + Sync + 'static) -> Self {
        Self::new(vec![Arc::new(cb)])
    }
}

#[async_trait]
impl<T: Send + 'static> PushObj for SinkCallbacks<T> {
    type Item = T;

    async fn push(&self, value: T) -> Result<Step<()>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        for cb in &self.callbacks {
            cb(&value);
        }
        Ok(Step::Next(()))
    }

    async fn finish(&self) -> Result<Step<()>> {
        self.life.finish();
        Ok(Step::Done(None))
    }

    async fn fault(&self, _err: FlowError) -> Result<Step<()>> {
        self.life.fault();
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }
}
