//! Serialization gate for push chains.

use async_trait::async_trait;

use crate::error::{FlowError, Result};
use crate::obj::{BoxPush, Capability, ObjMeta, PushObj, SharedLife, Step};

/// Guarantees at most one value is in flight through everything downstream
/// of this stage.
///
/// Concurrent producers queue on the internal gate; each delivery holds the
/// gate across the whole downstream await. Every value is delivered: there
/// is no priming loss.
pub struct Serial<T> {
    meta: ObjMeta,
    life: SharedLife,
    gate: tokio::sync::Mutex<()>,
    down: BoxPush<T>,
}

impl<T: Send + 'static> Serial<T> {
    pub fn new(down: BoxPush<T>) -> Self {
        Self {
            meta: ObjMeta::new("serial", &[Capability::Push]),
            life: SharedLife::new(),
            gate: tokio::sync::Mutex::new(()),
            down,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> PushObj for Serial<T> {
    type Item = T;

    async fn push(&self, value: T) -> Result<Step<()>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        let _exclusive = self.gate.lock().await;
        self.down.push(value).await
    }

    async fn finish(&self) -> Result<Step<()>> {
        if self.life.finish() {
            // Wait out any in-flight delivery before closing downstream.
            let _exclusive = self.gate.lock().await;
            self.down.finish().await?;
        }
        Ok(Step::Done(None))
    }

    async fn fault(&self, err: FlowError) -> Result<Step<()>> {
        if self.life.fault() {
            let _exclusive = self.gate.lock().await;
            self.down.fault(err).await?;
        }
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }
}
