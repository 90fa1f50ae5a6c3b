//! Racing combinators: yield whichever source resolves first.
//!
//! Each racing pull runs as a driver future that owns its source and hands
//! it back with the result, so in-flight pulls survive across `next()`
//! calls without blocking the winners. Output order is explicitly
//! non-deterministic.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{FlowError, Result};
use crate::obj::{BoxPull, Capability, Lifecycle, ObjMeta, PullObj, Step};

/// A raced value together with the index of the source that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributed<T> {
    /// Index of the producing source in construction order.
    pub source: usize,
    pub value: T,
}

type Driver<T> = BoxFuture<'static, (usize, BoxPull<T>, Result<Step<T>>)>;

fn drive<T: Send + 'static>(index: usize, mut src: BoxPull<T>) -> Driver<T> {
    Box::pin(async move {
        let step = src.next().await;
        (index, src, step)
    })
}

/// Yields values from whichever source resolves first; done when all
/// sources are exhausted. Per-source exhaustion is not surfaced as a
/// yielded result.
pub struct Race<T> {
    meta: ObjMeta,
    life: Lifecycle,
    idle: Vec<(usize, BoxPull<T>)>,
    pending: FuturesUnordered<Driver<T>>,
}

impl<T: Send + 'static> Race<T> {
    pub fn new(sources: Vec<BoxPull<T>>) -> Self {
        Self {
            meta: ObjMeta::new("race", &[Capability::Pull]),
            life: Lifecycle::default(),
            idle: sources.into_iter().enumerate().collect(),
            pending: FuturesUnordered::new(),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> PullObj for Race<T> {
    type Item = Attributed<T>;

    async fn next(&mut self) -> Result<Step<Attributed<T>>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        loop {
            for (i, src) in self.idle.drain(..) {
                self.pending.push(drive(i, src));
            }
            let Some((index, src, step)) = self.pending.next().await else {
                self.life.finish();
                return Ok(Step::Done(None));
            };
            match step {
                Ok(Step::Next(value)) => {
                    self.idle.push((index, src));
                    return Ok(Step::Next(Attributed { source: index, value }));
                }
                Ok(Step::Done(_)) => {
                    // Source exhausted; drop it from the rotation.
                }
                Err(e) => {
                    self.idle.push((index, src));
                    return Err(e);
                }
            }
        }
    }

    async fn finish(&mut self) -> Result<Step<Attributed<T>>> {
        if self.life.finish() {
            for (_, src) in &mut self.idle {
                src.finish().await?;
            }
            // In-flight drivers are torn down by dropping their futures.
            self.pending = FuturesUnordered::new();
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<Attributed<T>>> {
        if self.life.fault() {
            for (_, src) in &mut self.idle {
                src.fault(FlowError::message(err.to_string())).await?;
            }
            self.pending = FuturesUnordered::new();
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

/// Fair race: races within a round, but every active source must yield
/// exactly once before any source starts its next round.
pub struct RaceRobin<T> {
    meta: ObjMeta,
    life: Lifecycle,
    idle: Vec<(usize, BoxPull<T>)>,
    held: Vec<(usize, BoxPull<T>)>,
    pending: FuturesUnordered<Driver<T>>,
}

impl<T: Send + 'static> RaceRobin<T> {
    pub fn new(sources: Vec<BoxPull<T>>) -> Self {
        Self {
            meta: ObjMeta::new("race_robin", &[Capability::Pull]),
            life: Lifecycle::default(),
            idle: sources.into_iter().enumerate().collect(),
            held: Vec::new(),
            pending: FuturesUnordered::new(),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> PullObj for RaceRobin<T> {
    type Item = Attributed<T>;

    async fn next(&mut self) -> Result<Step<Attributed<T>>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        loop {
            // A round ends once every active source has yielded and moved
            // to `held`; the held set seeds the next round.
            if self.idle.is_empty() && self.pending.is_empty() {
                if self.held.is_empty() {
                    self.life.finish();
                    return Ok(Step::Done(None));
                }
                std::mem::swap(&mut self.idle, &mut self.held);
            }
            for (i, src) in self.idle.drain(..) {
                self.pending.push(drive(i, src));
            }
            let Some((index, src, step)) = self.pending.next().await else {
                continue;
            };
            match step {
                Ok(Step::Next(value)) => {
                    self.held.push((index, src));
                    return Ok(Step::Next(Attributed { source: index, value }));
                }
                Ok(Step::Done(_)) => {}
                Err(e) => {
                    self.idle.push((index, src));
                    return Err(e);
                }
            }
        }
    }

    async fn finish(&mut self) -> Result<Step<Attributed<T>>> {
        if self.life.finish() {
            for (_, src) in self.idle.iter_mut().chain(self.held.iter_mut()) {
                src.finish().await?;
            }
            self.pending = FuturesUnordered::new();
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<Attributed<T>>> {
        if self.life.fault() {
            for (_, src) in self.idle.iter_mut().chain(self.held.iter_mut()) {
                src.fault(FlowError::message(err.to_string())).await?;
            }
            self.pending = FuturesUnordered::new();
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

/// Race with a per-wait deadline: sources still pending when the deadline
/// fires are discarded from the rotation.
pub struct RaceCutoff<T> {
    meta: ObjMeta,
    life: Lifecycle,
    /// Deadline applied to every wait, hot-swappable between calls.
    pub deadline: Duration,
    idle: Vec<(usize, BoxPull<T>)>,
    pending: FuturesUnordered<Driver<T>>,
}

impl<T: Send + 'static> RaceCutoff<T> {
    pub fn new(sources: Vec<BoxPull<T>>, deadline: Duration) -> Self {
        Self {
            meta: ObjMeta::new("race_cutoff", &[Capability::Pull]),
            life: Lifecycle::default(),
            deadline,
            idle: sources.into_iter().enumerate().collect(),
            pending: FuturesUnordered::new(),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> PullObj for RaceCutoff<T> {
    type Item = Attributed<T>;

    async fn next(&mut self) -> Result<Step<Attributed<T>>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        loop {
            for (i, src) in self.idle.drain(..) {
                self.pending.push(drive(i, src));
            }
            if self.pending.is_empty() {
                self.life.finish();
                return Ok(Step::Done(None));
            }
            match tokio::time::timeout(self.deadline, self.pending.next()).await {
                Ok(Some((index, src, step))) => match step {
                    Ok(Step::Next(value)) => {
                        self.idle.push((index, src));
                        return Ok(Step::Next(Attributed { source: index, value }));
                    }
                    Ok(Step::Done(_)) => {}
                    Err(e) => {
                        self.idle.push((index, src));
                        return Err(e);
                    }
                },
                Ok(None) => {}
                Err(_) => {
                    // Every source still pending exceeded the deadline.
                    tracing::debug!(
                        discarded = self.pending.len(),
                        "race cutoff elapsed, discarding laggards"
                    );
                    self.pending = FuturesUnordered::new();
                }
            }
        }
    }

    async fn finish(&mut self) -> Result<Step<Attributed<T>>> {
        if self.life.finish() {
            for (_, src) in &mut self.idle {
                src.finish().await?;
            }
            self.pending = FuturesUnordered::new();
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<Attributed<T>>> {
        if self.life.fault() {
            for (_, src) in &mut self.idle {
                src.fault(FlowError::message(err.to_string())).await?;
            }
            self.pending = FuturesUnordered::new();
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
    use crate::source::{SourceBuffer, SourceStream};
    use std::collections::HashMap;

    fn boxed<T: Send + 'static>(items: Vec<T>) -> BoxPull<T> {
        Box::new(SourceBuffer::new(items))
    }

    fn delayed(values: Vec<i32>, delay: Duration) -> BoxPull<i32> {
        Box::new(SourceStream::new(futures::stream::iter(values).then(
            move |v| async move {
                tokio::time::sleep(delay).await;
                v
            },
        )))
    }

    #[tokio::test]
    async fn test_race_yields_every_value_exactly_once() {
        let mut race = Race::new(vec![boxed(vec![1, 2, 3]), boxed(vec![10, 20, 30])]);
        let results = race.collect_values().await.unwrap();
        assert_eq!(results.len(), 6);

        let mut counts: HashMap<i32, usize> = HashMap::new();
        for r in &results {
            *counts.entry(r.value).or_default() += 1;
        }
        for v in [1, 2, 3, 10, 20, 30] {
            assert_eq!(counts.get(&v), Some(&1), "value {v} lost or duplicated");
        }
    }

    #[tokio::test]
    async fn test_race_attribution_matches_source() {
        let mut race = Race::new(vec![boxed(vec![1, 2]), boxed(vec![100, 200])]);
        for r in race.collect_values().await.unwrap() {
            match r.source {
                0 => assert!(r.value < 100),
                1 => assert!(r.value >= 100),
                other => panic!("unknown source index {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_race_robin_is_fair_per_round() {
        let mut rr = RaceRobin::new(vec![
            delayed(vec![1, 2], Duration::from_millis(1)),
            delayed(vec![10, 20], Duration::from_millis(15)),
        ]);
        let results = rr.collect_values().await.unwrap();
        assert_eq!(results.len(), 4);
        // Both sources must appear in the first round even though source 0
        // is much faster.
        let first_round: Vec<usize> = results[..2].iter().map(|r| r.source).collect();
        assert!(first_round.contains(&0));
        assert!(first_round.contains(&1));
    }

    #[tokio::test]
    async fn test_race_cutoff_discards_laggards() {
        let mut rc = RaceCutoff::new(
            vec![
                delayed(vec![1, 2, 3], Duration::from_millis(1)),
                delayed(vec![100], Duration::from_millis(200)),
            ],
            Duration::from_millis(50),
        );
        let results = rc.collect_values().await.unwrap();
        let values: Vec<i32> = results.iter().map(|r| r.value).collect();
        // The fast source delivers everything; the slow one is discarded at
        // the first missed deadline and its value never appears.
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_race_finish_propagates_to_idle_sources() {
        let mut race = Race::new(vec![boxed(vec![1]), boxed(vec![2])]);
        race.finish().await.unwrap();
        assert_eq!(race.next().await.unwrap(), Step::Done(None));
    }
}
