//! Request-response chains: the caller drives both input and output.
//!
//! Each `next(input)` runs the input through every stage left to right and
//! hands the final output back to the caller, one round trip per call.
//! Stages are either stateless processors or stateful processor factories;
//! a factory is invoked exactly once, on first use, and its closure carries
//! the state for the rest of the chain's life. Composition (`map`, `then`,
//! `tap`) consumes the chain by move and returns a new one.

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::{FlowError, Result};
use crate::obj::{Capability, Lifecycle, ObjMeta, Step};

/// A single request-response processor.
#[async_trait]
pub trait BidiStage<I: Send, O>: Send {
    async fn call(&mut self, input: I) -> Result<O>;
}

/// Boxed processor closure produced by a factory.
pub type Processor<I, O> = Box<dyn FnMut(I) -> BoxFuture<'static, Result<O>> + Send>;

struct FnStage<I, O> {
    f: Processor<I, O>,
}

#[async_trait]
impl<I: Send + 'static, O: Send + 'static> BidiStage<I, O> for FnStage<I, O> {
    async fn call(&mut self, input: I) -> Result<O> {
        (self.f)(input).await
    }
}

/// Stage built lazily from a factory on first use.
struct FactoryStage<I, O> {
    factory: Option<Box<dyn FnOnce() -> Processor<I, O> + Send>>,
    processor: Option<Processor<I, O>>,
}

#[async_trait]
impl<I: Send + 'static, O: Send + 'static> BidiStage<I, O> for FactoryStage<I, O> {
    async fn call(&mut self, input: I) -> Result<O> {
        if self.processor.is_none() {
            let factory = self.factory.take().ok_or_else(|| {
                FlowError::IllegalState("bidi factory consumed without a processor".into())
            })?;
            self.processor = Some(factory());
        }
        match self.processor.as_mut() {
            Some(p) => p(input).await,
            None => Err(FlowError::IllegalState(
                "bidi factory produced no processor".into(),
            )),
        }
    }
}

struct Composed<I, M, O> {
    first: Box<dyn BidiStage<I, M>>,
    second: Box<dyn BidiStage<M, O>>,
}

#[async_trait]
impl<I, M, O> BidiStage<I, O> for Composed<I, M, O>
where
    I: Send + 'static,
    M: Send + 'static,
    O: Send + 'static,
{
    async fn call(&mut self, input: I) -> Result<O> {
        let mid = self.first.call(input).await?;
        self.second.call(mid).await
    }
}

/// A request-response pipeline from `I` to `O`.
pub struct BidiChain<I, O> {
    meta: ObjMeta,
    life: Lifecycle,
    stage: Box<dyn BidiStage<I, O>>,
}

impl<I: Send + 'static> BidiChain<I, I> {
    /// The identity chain: `next(v)` answers `v`.
    pub fn identity() -> Self {
        Self::from_fn(|v| v)
    }
}

impl<I: Send + 'static, O: Send + 'static> BidiChain<I, O> {
    /// Chain from a stateless sync processor.
    pub fn from_fn(mut f: impl FnMut(I) -> O + Send + 'static) -> Self {
        Self::from_processor(Box::new(move |input| {
            let out = f(input);
            Box::pin(async move { Ok(out) })
        }))
    }

    /// Chain from a stateless async processor.
    pub fn from_processor(f: Processor<I, O>) -> Self {
        Self::from_stage(Box::new(FnStage { f }))
    }

    /// Chain from a stateful processor factory. The factory runs exactly
    /// once, on the first `next`.
    pub fn from_factory(factory: impl FnOnce() -> Processor<I, O> + Send + 'static) -> Self {
        Self::from_stage(Box::new(FactoryStage {
            factory: Some(Box::new(factory)),
            processor: None,
        }))
    }

    fn from_stage(stage: Box<dyn BidiStage<I, O>>) -> Self {
        Self {
            meta: ObjMeta::new("bidi_chain", &[Capability::Bidi]),
            life: Lifecycle::default(),
            stage,
        }
    }

    /// Append a sync transform to the response side.
    pub fn map<U: Send + 'static>(
        self,
        f: impl FnMut(O) -> U + Send + 'static,
    ) -> BidiChain<I, U> {
        self.then(BidiChain::from_fn(f))
    }

    /// Append another chain, feeding this chain's output into it.
    pub fn then<U: Send + 'static>(self, next: BidiChain<O, U>) -> BidiChain<I, U> {
        BidiChain {
            meta: ObjMeta::new("bidi_chain", &[Capability::Bidi]),
            life: Lifecycle::default(),
            stage: Box::new(Composed {
                first: self.stage,
                second: next.stage,
            }),
        }
    }

    /// Observe each response without changing it.
    pub fn tap(self, mut f: impl FnMut(&O) + Send + 'static) -> BidiChain<I, O> {
        self.map(move |v| {
            f(&v);
            v
        })
    }

    /// Run one request-response round trip.
    pub async fn next(&mut self, input: I) -> Result<Step<O>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        // A stage error propagates but leaves the chain open.
        let out = self.stage.call(input).await?;
        Ok(Step::Next(out))
    }

    /// Permanently close the chain. Idempotent.
    pub async fn finish(&mut self) -> Result<Step<O>> {
        self.life.finish();
        Ok(Step::Done(None))
    }

    /// Permanently close the chain with an error. Idempotent.
    pub async fn fault(&mut self, _err: FlowError) -> Result<Step<O>> {
        self.life.fault();
        Ok(Step::Done(None))
    }

    pub fn meta(&self) -> &ObjMeta {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut ObjMeta {
        &mut self.meta
    }
}
