//! N-to-1 combinators: merge an ordered collection of sources under a
//! named strategy.
//!
//! Combinators are stages in their own right, not 1-to-1 links: each owns
//! its upstream collection plus strategy-specific state, and propagates
//! `finish`/`fault` to every held source. `Concat`, `Zip` and `RoundRobin`
//! are deterministic given deterministic sources; the race family in
//! [`race`](crate::combine::race) is explicitly not.

pub mod labeled;
pub mod race;

use async_trait::async_trait;

use crate::error::{FlowError, Result};
use crate::obj::{BoxPull, Capability, Lifecycle, ObjMeta, PullObj, Step};

/// Drains sources strictly one after another, in collection order.
pub struct Concat<T> {
    meta: ObjMeta,
    life: Lifecycle,
    sources: Vec<BoxPull<T>>,
    index: usize,
}

impl<T: Send + 'static> Concat<T> {
    pub fn new(sources: Vec<BoxPull<T>>) -> Self {
        Self {
            meta: ObjMeta::new("concat", &[Capability::Pull]),
            life: Lifecycle::default(),
            sources,
            index: 0,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> PullObj for Concat<T> {
    type Item = T;

    async fn next(&mut self) -> Result<Step<T>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        while self.index < self.sources.len() {
            match self.sources[self.index].next().await? {
                Step::Next(v) => return Ok(Step::Next(v)),
                Step::Done(_) => self.index += 1,
            }
        }
        Ok(Step::Done(None))
    }

    async fn finish(&mut self) -> Result<Step<T>> {
        if self.life.finish() {
            for src in &mut self.sources {
                src.finish().await?;
            }
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<T>> {
        if self.life.fault() {
            for src in &mut self.sources {
                src.fault(FlowError::message(err.to_string())).await?;
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

/// Pulls one value from every active source per round and yields them as a
/// positional tuple. Exhausted slots are omitted; the round shrinks but
/// continues while any source is active.
pub struct Zip<T> {
    meta: ObjMeta,
    life: Lifecycle,
    sources: Vec<BoxPull<T>>,
    exhausted: Vec<bool>,
}

impl<T: Send + 'static> Zip<T> {
    pub fn new(sources: Vec<BoxPull<T>>) -> Self {
        let exhausted = vec![false; sources.len()];
        Self {
            meta: ObjMeta::new("zip", &[Capability::Pull]),
            life: Lifecycle::default(),
            sources,
            exhausted,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> PullObj for Zip<T> {
    type Item = Vec<T>;

    async fn next(&mut self) -> Result<Step<Vec<T>>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        let mut round = Vec::new();
        for (i, src) in self.sources.iter_mut().enumerate() {
            if self.exhausted[i] {
                continue;
            }
            match src.next().await? {
                Step::Next(v) => round.push(v),
                Step::Done(_) => self.exhausted[i] = true,
            }
        }
        if round.is_empty() {
            Ok(Step::Done(None))
        } else {
            Ok(Step::Next(round))
        }
    }

    async fn finish(&mut self) -> Result<Step<Vec<T>>> {
        if self.life.finish() {
            for src in &mut self.sources {
                src.finish().await?;
            }
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<Vec<T>>> {
        if self.life.fault() {
            for src in &mut self.sources {
                src.fault(FlowError::message(err.to_string())).await?;
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

/// Strict rotation across sources, skipping exhausted slots; done once
/// every source is exhausted.
pub struct RoundRobin<T> {
    meta: ObjMeta,
    life: Lifecycle,
    sources: Vec<BoxPull<T>>,
    exhausted: Vec<bool>,
    cursor: usize,
}

impl<T: Send + 'static> RoundRobin<T> {
    pub fn new(sources: Vec<BoxPull<T>>) -> Self {
        let exhausted = vec![false; sources.len()];
        Self {
            meta: ObjMeta::new("round_robin", &[Capability::Pull]),
            life: Lifecycle::default(),
            sources,
            exhausted,
            cursor: 0,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> PullObj for RoundRobin<T> {
    type Item = T;

    async fn next(&mut self) -> Result<Step<T>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        let n = self.sources.len();
        // One probe per slot covers the whole rotation: a probed source
        // either yields or becomes exhausted.
        for _ in 0..n {
            let i = self.cursor;
            self.cursor = (self.cursor + 1) % n;
            if self.exhausted[i] {
                continue;
            }
            match self.sources[i].next().await? {
                Step::Next(v) => return Ok(Step::Next(v)),
                Step::Done(_) => self.exhausted[i] = true,
            }
        }
        Ok(Step::Done(None))
    }

    async fn finish(&mut self) -> Result<Step<T>> {
        if self.life.finish() {
            for src in &mut self.sources {
                src.finish().await?;
            }
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<T>> {
        if self.life.fault() {
            for src in &mut self.sources {
                src.fault(FlowError::message(err.to_string())).await?;
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
