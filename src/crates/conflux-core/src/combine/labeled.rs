//! Labeled combinator variants: sources are keyed by string and outputs
//! carry the key instead of a positional index.
//!
//! Each labeled variant tags its sources with their construction index,
//! runs the positional combinator over the tagged values, and maps indices
//! back to keys on the way out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use std::time::Duration;

use super::race::{Race, RaceCutoff, RaceRobin};
use super::{Concat, RoundRobin, Zip};
use crate::error::{FlowError, Result};
use crate::obj::{BoxPull, Capability, ObjMeta, PullObj, Step};

/// A value labeled with the key of the source that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledValue<T> {
    pub key: String,
    pub value: T,
}

/// Wraps a source so every value carries the source's position.
struct Tagged<T> {
    meta: ObjMeta,
    index: usize,
    inner: BoxPull<T>,
}

impl<T: Send + 'static> Tagged<T> {
    fn new(index: usize, inner: BoxPull<T>) -> BoxPull<(usize, T)> {
        Box::new(Self {
            meta: ObjMeta::new("tagged", &[Capability::Pull]),
            index,
            inner,
        })
    }
}

#[async_trait]
impl<T: Send + 'static> PullObj for Tagged<T> {
    type Item = (usize, T);

    async fn next(&mut self) -> Result<Step<(usize, T)>> {
        let index = self.index;
        Ok(self.inner.next().await?.map(|v| (index, v)))
    }

    async fn finish(&mut self) -> Result<Step<(usize, T)>> {
        let index = self.index;
        Ok(self.inner.finish().await?.map(|v| (index, v)))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<(usize, T)>> {
        let index = self.index;
        Ok(self.inner.fault(err).await?.map(|v| (index, v)))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjMeta {
        &mut self.meta
    }
}

fn split<T: Send + 'static>(
    sources: Vec<(String, BoxPull<T>)>,
) -> (Vec<String>, Vec<BoxPull<(usize, T)>>) {
    let mut keys = Vec::with_capacity(sources.len());
    let mut tagged = Vec::with_capacity(sources.len());
    for (i, (key, src)) in sources.into_iter().enumerate() {
        keys.push(key);
        tagged.push(Tagged::new(i, src));
    }
    (keys, tagged)
}

macro_rules! labeled_scalar_combinator {
    ($(#[$doc:meta])* $name:ident, $inner:ident, $obj_name:literal) => {
        $(#[$doc])*
        pub struct $name<T> {
            meta: ObjMeta,
            keys: Vec<String>,
            inner: $inner<(usize, T)>,
        }

        impl<T: Send + 'static> $name<T> {
            pub fn new(sources: Vec<(String, BoxPull<T>)>) -> Self {
                let (keys, tagged) = split(sources);
                Self {
                    meta: ObjMeta::new($obj_name, &[Capability::Pull]),
                    keys,
                    inner: $inner::new(tagged),
                }
            }
        }

        #[async_trait]
        impl<T: Send + 'static> PullObj for $name<T> {
            type Item = LabeledValue<T>;

            async fn next(&mut self) -> Result<Step<LabeledValue<T>>> {
                match self.inner.next().await? {
                    Step::Next((i, value)) => Ok(Step::Next(LabeledValue {
                        key: self.keys[i].clone(),
                        value,
                    })),
                    Step::Done(_) => Ok(Step::Done(None)),
                }
            }

            async fn finish(&mut self) -> Result<Step<LabeledValue<T>>> {
                self.inner.finish().await?;
                Ok(Step::Done(None))
            }

            async fn fault(&mut self, err: FlowError) -> Result<Step<LabeledValue<T>>> {
                self.inner.fault(err).await?;
                Ok(Step::Done(None))
            }

            fn meta(&self) -> &ObjMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut ObjMeta {
                &mut self.meta
            }
        }
    };
}

labeled_scalar_combinator!(
    /// Labeled [`Concat`]: drains keyed sources one after another.
    LabeledConcat,
    Concat,
    "labeled_concat"
);

labeled_scalar_combinator!(
    /// Labeled [`RoundRobin`]: strict rotation over keyed sources.
    LabeledRoundRobin,
    RoundRobin,
    "labeled_round_robin"
);

/// Labeled [`Zip`]: one labeled value per active source per round.
pub struct LabeledZip<T> {
    meta: ObjMeta,
    keys: Vec<String>,
    inner: Zip<(usize, T)>,
}

impl<T: Send + 'static> LabeledZip<T> {
    pub fn new(sources: Vec<(String, BoxPull<T>)>) -> Self {
        let (keys, tagged) = split(sources);
        Self {
            meta: ObjMeta::new("labeled_zip", &[Capability::Pull]),
            keys,
            inner: Zip::new(tagged),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> PullObj for LabeledZip<T> {
    type Item = Vec<LabeledValue<T>>;

    async fn next(&mut self) -> Result<Step<Vec<LabeledValue<T>>>> {
        match self.inner.next().await? {
            Step::Next(round) => Ok(Step::Next(
                round
                    .into_iter()
                    .map(|(i, value)| LabeledValue {
                        key: self.keys[i].clone(),
                        value,
                    })
                    .collect(),
            )),
            Step::Done(_) => Ok(Step::Done(None)),
        }
    }

    async fn finish(&mut self) -> Result<Step<Vec<LabeledValue<T>>>> {
        self.inner.finish().await?;
        Ok(Step::Done(None))
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<Vec<LabeledValue<T>>>> {
        self.inner.fault(err).await?;
        Ok(Step::Done(None))
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjMeta {
        &mut self.meta
    }
}

macro_rules! labeled_race_combinator {
    ($(#[$doc:meta])* $name:ident, $inner:ident) => {
        $(#[$doc])*
        pub struct $name<T> {
            meta: ObjMeta,
            keys: Vec<String>,
            inner: $inner<(usize, T)>,
        }

        #[async_trait]
        impl<T: Send + 'static> PullObj for $name<T> {
            type Item = LabeledValue<T>;

            async fn next(&mut self) -> Result<Step<LabeledValue<T>>> {
                match self.inner.next().await? {
                    Step::Next(attributed) => {
                        let (i, value) = attributed.value;
                        Ok(Step::Next(LabeledValue {
                            key: self.keys[i].clone(),
                            value,
                        }))
                    }
                    Step::Done(_) => Ok(Step::Done(None)),
                }
            }

            async fn finish(&mut self) -> Result<Step<LabeledValue<T>>> {
                self.inner.finish().await?;
                Ok(Step::Done(None))
            }

            async fn fault(&mut self, err: FlowError) -> Result<Step<LabeledValue<T>>> {
                self.inner.fault(err).await?;
                Ok(Step::Done(None))
            }

            fn meta(&self) -> &ObjMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut ObjMeta {
                &mut self.meta
            }
        }
    };
}

labeled_race_combinator!(
    /// Labeled [`Race`]: first-resolved wins, output carries the source key.
    LabeledRace,
    Race
);

labeled_race_combinator!(
    /// Labeled [`RaceRobin`]: fair race with key-labeled output.
    LabeledRaceRobin,
    RaceRobin
);

labeled_race_combinator!(
    /// Labeled [`RaceCutoff`]: deadline race with key-labeled output.
    LabeledRaceCutoff,
    RaceCutoff
);

impl<T: Send + 'static> LabeledRace<T> {
    pub fn new(sources: Vec<(String, BoxPull<T>)>) -> Self {
        let (keys, tagged) = split(sources);
        Self {
            meta: ObjMeta::new("labeled_race", &[Capability::Pull]),
            keys,
            inner: Race::new(tagged),
        }
    }
}

impl<T: Send + 'static> LabeledRaceRobin<T> {
    pub fn new(sources: Vec<(String, BoxPull<T>)>) -> Self {
        let (keys, tagged) = split(sources);
        Self {
            meta: ObjMeta::new("labeled_race_robin", &[Capability::Pull]),
            keys,
            inner: RaceRobin::new(tagged),
        }
    }
}

impl<T: Send + 'static> LabeledRaceCutoff<T> {
    pub fn new(sources: Vec<(String, BoxPull<T>)>, deadline: Duration) -> Self {
        let (keys, tagged) = split(sources);
        Self {
            meta: ObjMeta::new("labeled_race_cutoff", &[Capability::Pull]),
            keys,
            inner: RaceCutoff::new(tagged, deadline),
        }
    }

    /// Retune the per-wait deadline; effective on the very next call.
    pub fn set_deadline(&mut self, deadline: Duration) {
        self.inner.deadline = deadline;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obj::PullExt;
    use crate::source::SourceBuffer;

    fn keyed<T: Send + 'static>(key: &str, items: Vec<T>) -> (String, BoxPull<T>) {
        (key.to_string(), Box::new(SourceBuffer::new(items)))
    }

    #[tokio::test]
    async fn test_labeled_concat_carries_keys() {
        let mut c = LabeledConcat::new(vec![keyed("left", vec![1, 2]), keyed("right", vec![3])]);
        let out = c.collect_values().await.unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].key, "left");
        assert_eq!(out[2].key, "right");
        assert_eq!(out[2].value, 3);
    }

    #[tokio::test]
    async fn test_labeled_round_robin_alternates_keys() {
        let mut rr =
            LabeledRoundRobin::new(vec![keyed("a", vec![1, 3]), keyed("b", vec![2, 4])]);
        let keys: Vec<String> = rr
            .collect_values()
            .await
            .unwrap()
            .into_iter()
            .map(|lv| lv.key)
            .collect();
        assert_eq!(keys, vec!["a", "b", "a", "b"]);
    }

    #[tokio::test]
    async fn test_labeled_zip_rounds() {
        let mut z = LabeledZip::new(vec![keyed("x", vec![1, 2]), keyed("y", vec![10])]);
        let round = z.next().await.unwrap().into_value().unwrap();
        assert_eq!(round.len(), 2);
        assert_eq!(round[0].key, "x");
        assert_eq!(round[1].key, "y");

        let round = z.next().await.unwrap().into_value().unwrap();
        assert_eq!(round.len(), 1);
        assert_eq!(round[0].key, "x");
        assert_eq!(round[0].value, 2);
    }

    #[tokio::test]
    async fn test_labeled_race_covers_all_values() {
        let mut race = LabeledRace::new(vec![keyed("fast", vec![1, 2]), keyed("slow", vec![9])]);
        let mut out = race.collect_values().await.unwrap();
        assert_eq!(out.len(), 3);
        out.sort_by_key(|lv| lv.value);
        assert_eq!(out[0].key, "fast");
        assert_eq!(out[2].key, "slow");
    }
}
