//! In-order resequencing of out-of-order upstream values.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::{FlowError, Result};
use crate::obj::{Capability, Lifecycle, ObjMeta, PullObj, Step};

/// Reorders values carrying a monotonic key back into key order.
///
/// Values arriving ahead of the next expected key are buffered until the
/// gap fills. With `buffer_cap` set, exceeding the cap while blocked raises
/// [`FlowError::ReorderOverflow`]. After upstream exhaustion any remaining
/// buffered values are drained in ascending key order.
pub struct Reorder<S: PullObj> {
    meta: ObjMeta,
    life: Lifecycle,
    /// Optional bound on how many out-of-order values may be held.
    pub buffer_cap: Option<usize>,
    upstream: S,
    key: Box<dyn FnMut(&S::Item) -> u64 + Send>,
    next_key: u64,
    held: HashMap<u64, S::Item>,
    exhausted: bool,
}

impl<S: PullObj> Reorder<S> {
    /// `start_key` is the first key expected from upstream (usually 0).
    pub fn new(
        upstream: S,
        start_key: u64,
        key: impl FnMut(&S::Item) -> u64 + Send + 'static,
    ) -> Self {
        Self {
            meta: ObjMeta::new("reorder", &[Capability::Pull]),
            life: Lifecycle::default(),
            buffer_cap: None,
            upstream,
            key: Box::new(key),
            next_key: start_key,
            held: HashMap::new(),
            exhausted: false,
        }
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.buffer_cap = Some(cap);
        self
    }

    /// Number of values currently parked out of order.
    pub fn held_len(&self) -> usize {
        self.held.len()
    }
}

#[async_trait]
impl<S: PullObj> PullObj for Reorder<S> {
    type Item = S::Item;

    async fn next(&mut self) -> Result<Step<S::Item>> {
        if self.life.is_closed() {
            return Ok(Step::Done(None));
        }
        self.life.activate();
        loop {
            if let Some(v) = self.held.remove(&self.next_key) {
                self.next_key += 1;
                return Ok(Step::Next(v));
            }
            if self.exhausted {
                // Gaps can no longer fill; drain ascending.
                let Some(min) = self.held.keys().min().copied() else {
                    return Ok(Step::Done(None));
                };
                self.next_key = min;
                continue;
            }
            match self.upstream.next().await? {
                Step::Next(v) => {
                    let k = (self.key)(&v);
                    if k == self.next_key {
                        self.next_key += 1;
                        return Ok(Step::Next(v));
                    }
                    self.held.insert(k, v);
                    if let Some(cap) = self.buffer_cap {
                        if self.held.len() > cap {
                            return Err(FlowError::ReorderOverflow {
                                cap,
                                waiting_for: self.next_key,
                            });
                        }
                    }
                }
                Step::Done(_) => self.exhausted = true,
            }
        }
    }

    async fn finish(&mut self) -> Result<Step<S::Item>> {
        if self.life.finish() {
            self.held.clear();
            self.upstream.finish().await?;
        }
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<S::Item>> {
        if self.life.fault() {
            self.held.clear();
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
    use crate::source::SourceBuffer;

    #[tokio::test]
    async fn test_reorder_restores_key_order() {
        let src = SourceBuffer::new(vec![(2u64, "c"), (0, "a"), (1, "b"), (3, "d")]);
        let mut link = Reorder::new(src, 0, |(k, _)| *k);
        let out: Vec<_> = link
            .collect_values()
            .await
            .unwrap()
            .into_iter()
            .map(|(_, s)| s)
            .collect();
        assert_eq!(out, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_reorder_overflow_raises() {
        // Key 0 never arrives, so everything parks until the cap trips.
        let src = SourceBuffer::new(vec![(5u64, ()), (6, ()), (7, ())]);
        let mut link = Reorder::new(src, 0, |(k, _)| *k).with_cap(2);
        assert!(matches!(
            link.next().await,
            Err(FlowError::ReorderOverflow { cap: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_reorder_drains_gapped_tail_ascending() {
        let src = SourceBuffer::new(vec![(0u64, "a"), (4, "e"), (2, "c")]);
        let mut link = Reorder::new(src, 0, |(k, _)| *k);
        let out: Vec<_> = link
            .collect_values()
            .await
            .unwrap()
            .into_iter()
            .map(|(_, s)| s)
            .collect();
        assert_eq!(out, vec!["a", "c", "e"]);
    }
}
