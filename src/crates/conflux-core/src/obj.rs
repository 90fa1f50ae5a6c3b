//! The Obj protocol: the common contract every pipeline stage implements
//!
//! Every stage carries an [`ObjMeta`] identity (immutable key, mutable
//! human-readable name, capability set) and answers the three protocol
//! operations adapted from the async iterator contract: produce/accept
//! (`next`/`push`), `finish` (permanent graceful close) and `fault`
//! (permanent error close). The protocol splits into three object-safe
//! traits by data-flow direction:
//!
//! - [`PullObj`]: demand-driven stages pulled from downstream (`&mut self`,
//!   single consumer).
//! - [`PushObj`]: eager stages driven by upstream producers (`&self`,
//!   shareable, so concurrent producers can feed one chain).
//! - Bidirectional chains live in [`crate::bidi`] and expose `next(input)`.
//!
//! # Lifecycle
//!
//! `Created → Active → Returned | Thrown | Disposed`. Once a stage is
//! closed, every subsequent protocol call resolves to [`Step::Done`] with no
//! payload and no side effects. Stage-work errors (a user closure failing
//! inside `next`) propagate to the caller and do NOT close the stage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use uuid::Uuid;

use crate::error::{FlowError, Result};

/// Result envelope for one protocol operation.
///
/// `Done` carries the optional *return value* of the stage, which is
/// distinct from yielded values: a trailing partial window, for example, is
/// reported here and never yielded as a regular item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", content = "value", rename_all = "lowercase")]
pub enum Step<T> {
    /// A produced or accepted value.
    Next(T),
    /// The stage is exhausted or closed; the payload is its return value.
    Done(Option<T>),
}

impl<T> Step<T> {
    /// True for the `Done` variant.
    pub fn is_done(&self) -> bool {
        matches!(self, Step::Done(_))
    }

    /// Extract a yielded value, discarding any return value.
    pub fn into_value(self) -> Option<T> {
        match self {
            Step::Next(v) => Some(v),
            Step::Done(_) => None,
        }
    }

    /// Extract the return value of a finished stage, if any.
    pub fn into_return_value(self) -> Option<T> {
        match self {
            Step::Next(_) => None,
            Step::Done(v) => v,
        }
    }

    /// Map the payload of either variant.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Step<U> {
        match self {
            Step::Next(v) => Step::Next(f(v)),
            Step::Done(v) => Step::Done(v.map(f)),
        }
    }
}

/// Data-flow capabilities a stage may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Source,
    Sink,
    Pull,
    Push,
    Bidi,
    Bridge,
}

/// Identity shared by every stage: immutable key, mutable name, capabilities.
#[derive(Debug, Clone)]
pub struct ObjMeta {
    key: Uuid,
    /// Human-readable, freely mutable stage name.
    pub name: String,
    caps: Vec<Capability>,
}

impl ObjMeta {
    /// Create a fresh identity with a random key.
    pub fn new(name: impl Into<String>, caps: &[Capability]) -> Self {
        Self {
            key: Uuid::new_v4(),
            name: name.into(),
            caps: caps.to_vec(),
        }
    }

    /// The immutable identity key.
    pub fn key(&self) -> Uuid {
        self.key
    }

    /// Whether this stage advertises the given capability.
    pub fn has(&self, cap: Capability) -> bool {
        self.caps.contains(&cap)
    }

    /// All advertised capabilities.
    pub fn capabilities(&self) -> &[Capability] {
        &self.caps
    }
}

/// Lifecycle state for `&mut self` (pull-side) stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    #[default]
    Created,
    Active,
    Returned,
    Thrown,
    Disposed,
}

impl Lifecycle {
    /// Closed states accept no further work.
    pub fn is_closed(self) -> bool {
        matches!(self, Lifecycle::Returned | Lifecycle::Thrown | Lifecycle::Disposed)
    }

    /// Move `Created → Active` on first use.
    pub fn activate(&mut self) {
        if *self == Lifecycle::Created {
            *self = Lifecycle::Active;
        }
    }

    /// Transition to `Returned`. Returns false if already closed, so closers
    /// stay idempotent and propagate at most once.
    pub fn finish(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        *self = Lifecycle::Returned;
        true
    }

    /// Transition to `Thrown`. Returns false if already closed.
    pub fn fault(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        *self = Lifecycle::Thrown;
        true
    }

    /// Transition to `Disposed`, the teardown close used when a stage is
    /// dropped without a graceful `finish`. Returns false if already closed.
    pub fn dispose(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        *self = Lifecycle::Disposed;
        true
    }
}

const LIFE_CREATED: u8 = 0;
const LIFE_ACTIVE: u8 = 1;
const LIFE_RETURNED: u8 = 2;
const LIFE_THROWN: u8 = 3;
const LIFE_DISPOSED: u8 = 4;

/// Lifecycle state for `&self` (push-side) stages, shared across producers.
#[derive(Debug, Default)]
pub struct SharedLife(AtomicU8);

impl SharedLife {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire) >= LIFE_RETURNED
    }

    pub fn activate(&self) {
        let _ = self.0.compare_exchange(
            LIFE_CREATED,
            LIFE_ACTIVE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Close as returned; true only for the call that performed the close.
    pub fn finish(&self) -> bool {
        self.close_to(LIFE_RETURNED)
    }

    /// Close as thrown; true only for the call that performed the close.
    pub fn fault(&self) -> bool {
        self.close_to(LIFE_THROWN)
    }

    /// Close as disposed; true only for the call that performed the close.
    pub fn dispose(&self) -> bool {
        self.close_to(LIFE_DISPOSED)
    }

    fn close_to(&self, target: u8) -> bool {
        loop {
            let cur = self.0.load(Ordering::Acquire);
            if cur >= LIFE_RETURNED {
                return false;
            }
            if self
                .0
                .compare_exchange(cur, target, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }
}

/// A demand-driven stage: values are produced when the consumer asks.
#[async_trait]
pub trait PullObj: Send {
    type Item: Send + 'static;

    /// Pull the next value. Demand propagates strictly upstream.
    async fn next(&mut self) -> Result<Step<Self::Item>>;

    /// Permanently close the stage and every owned upstream. Idempotent.
    async fn finish(&mut self) -> Result<Step<Self::Item>>;

    /// Permanently close the stage with an error, propagating it to every
    /// owned upstream. Idempotent.
    async fn fault(&mut self, err: FlowError) -> Result<Step<Self::Item>>;

    fn meta(&self) -> &ObjMeta;

    fn meta_mut(&mut self) -> &mut ObjMeta;
}

/// Boxed pull stage, the unit of composition for combinators.
pub type BoxPull<T> = Box<dyn PullObj<Item = T>>;

#[async_trait]
impl<T: Send + 'static> PullObj for Box<dyn PullObj<Item = T>> {
    type Item = T;

    async fn next(&mut self) -> Result<Step<T>> {
        (**self).next().await
    }

    async fn finish(&mut self) -> Result<Step<T>> {
        (**self).finish().await
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<T>> {
        (**self).fault(err).await
    }

    fn meta(&self) -> &ObjMeta {
        (**self).meta()
    }

    fn meta_mut(&mut self) -> &mut ObjMeta {
        (**self).meta_mut()
    }
}

/// Drain helpers shared by every pull stage.
#[async_trait]
pub trait PullExt: PullObj {
    /// Collect every yielded value, discarding the stage's return value.
    async fn collect_values(&mut self) -> Result<Vec<Self::Item>> {
        let mut out = Vec::new();
        loop {
            match self.next().await? {
                Step::Next(v) => out.push(v),
                Step::Done(_) => return Ok(out),
            }
        }
    }

    /// Drain the stage, returning both yielded values and the return value.
    async fn drain(&mut self) -> Result<(Vec<Self::Item>, Option<Self::Item>)> {
        let mut out = Vec::new();
        loop {
            match self.next().await? {
                Step::Next(v) => out.push(v),
                Step::Done(ret) => return Ok((out, ret)),
            }
        }
    }
}

impl<P: PullObj> PullExt for P {}

/// An eager stage: the producer drives delivery, the chain is wired
/// backward so every stage already holds its downstream sink(s).
#[async_trait]
pub trait PushObj: Send + Sync {
    type Item: Send + 'static;

    /// Deliver one value. Resolves only after every downstream stage has
    /// accepted it.
    async fn push(&self, value: Self::Item) -> Result<Step<()>>;

    /// Permanently close the stage and every owned downstream. Idempotent.
    async fn finish(&self) -> Result<Step<()>>;

    /// Permanently close with an error, propagated downstream. Idempotent.
    async fn fault(&self, err: FlowError) -> Result<Step<()>>;

    fn meta(&self) -> &ObjMeta;
}

/// Boxed push stage.
pub type BoxPush<T> = Box<dyn PushObj<Item = T>>;

#[async_trait]
impl<T: Send + 'static> PushObj for Box<dyn PushObj<Item = T>> {
    type Item = T;

    async fn push(&self, value: T) -> Result<Step<()>> {
        (**self).push(value).await
    }

    async fn finish(&self) -> Result<Step<()>> {
        (**self).finish().await
    }

    async fn fault(&self, err: FlowError) -> Result<Step<()>> {
        (**self).fault(err).await
    }

    fn meta(&self) -> &ObjMeta {
        (**self).meta()
    }
}
