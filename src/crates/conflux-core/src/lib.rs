//! # conflux-core: composable async pipeline runtime
//!
//! A pipeline runtime unifying three data-flow models on one object
//! protocol:
//!
//! - **Pull**: lazy, demand-driven, many-to-one. A consumer calls `next()`
//!   at the downstream end and demand propagates strictly upstream.
//! - **Push**: eager, producer-driven, one-to-many. Chains are wired
//!   backward from the sink and `push(value)` resolves only after every
//!   downstream stage accepted.
//! - **Bidirectional**: request-response, 1:1. Each `next(input)` runs one
//!   pass through the chain and returns the output to the caller.
//!
//! Every stage is an *Obj*: it carries an identity ([`ObjMeta`]), answers
//! the protocol operations (`next`/`push`, `finish`, `fault`) and honors
//! the shared lifecycle: closers are permanent and idempotent, stage-work
//! errors propagate without closing the stage.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use conflux_core::Flow;
//!
//! # async fn example() -> conflux_core::Result<()> {
//! let batches = Flow::from_iter(1..=10)
//!     .filter(|v| v % 2 == 0)
//!     .map(|v| v * 3)
//!     .window(2)
//!     .collect()
//!     .await?;
//! assert_eq!(batches, vec![vec![6, 12], vec![18, 24]]);
//! # Ok(())
//! # }
//! ```
//!
//! Push chains are described by an immutable [`PushRecipe`] and built
//! backward by a terminal:
//!
//! ```rust,ignore
//! use conflux_core::PushRecipe;
//!
//! # async fn example() -> conflux_core::Result<()> {
//! let (chain, audit) = PushRecipe::<String, String>::new()
//!     .filter(|line| !line.is_empty())
//!     .to_vec();
//! chain.push("hello".to_string()).await?;
//! chain.finish().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module organization
//!
//! - [`obj`]: the Obj protocol: [`Step`], [`ObjMeta`], lifecycle, the
//!   [`PullObj`]/[`PushObj`] traits
//! - [`source`] / [`sink`]: terminal producers and consumers
//! - [`pull`]: 1-to-1 links (map, filter, flat-map, reduce, dedupe, tap,
//!   window, buffer, timeout, prefetch, reorder)
//! - [`combine`]: N-to-1 combinators (concat, zip, round-robin, the race
//!   family, labeled variants)
//! - [`push`]: eager stages, the recipe builder, fan-out terminals, the
//!   serial gate, the mutable lane
//! - [`bidi`]: request-response chains
//! - [`bridge`]: push↔pull bridges
//! - [`wait`]: the last-wins [`WaitObject`] signal
//! - [`flow`]: the fluent pull facade
//!
//! ## Backpressure
//!
//! Pull pipelines have natural backpressure: no demand, no work. Push
//! pipelines deliberately do not: bound them by inserting a `serial`
//! stage, a window/buffer, or a push-to-pull bridge whose drain side
//! imposes the rate.

pub mod bidi;
pub mod bridge;
pub mod combine;
pub mod error;
pub mod flow;
pub mod funcs;
pub mod obj;
pub mod pull;
pub mod push;
pub mod sink;
pub mod source;
pub mod wait;

pub use bidi::BidiChain;
pub use bridge::{push_pull_buffer, BridgeSink, BridgeSource, TapThrough};
pub use combine::labeled::{
    LabeledConcat, LabeledRace, LabeledRaceCutoff, LabeledRaceRobin, LabeledRoundRobin,
    LabeledValue, LabeledZip,
};
pub use combine::race::{Attributed, Race, RaceCutoff, RaceRobin};
pub use combine::{Concat, RoundRobin, Zip};
pub use error::{FlowError, Result};
pub use flow::Flow;
pub use funcs::{fold_fn, map_fn, pred_fn, try_map_fn, AsyncFold, AsyncMap, AsyncPred};
pub use obj::{
    BoxPull, BoxPush, Capability, Lifecycle, ObjMeta, PullExt, PullObj, PushObj, SharedLife, Step,
};
pub use pull::reorder::Reorder;
pub use pull::timing::{Prefetch, Timeout};
pub use pull::{BufferWhen, Dedupe, Filter, FlatMap, Map, Reduce, Tap, Window};
pub use push::lane::{lane_filter, lane_map, LaneStage, PushLane};
pub use push::recipe::{PushChain, PushRecipe};
pub use push::serial::Serial;
pub use push::{
    CallbackPhase, Distribute, Fork, PushBufferWhen, PushCallback, PushFilter, PushFlatten,
    PushMap, PushReduce, PushWindow, RoundRobinTo,
};
pub use sink::{SharedBuffer, SinkCallback, SinkCallbacks, SinkCollect};
pub use source::{SourceBuffer, SourceStream, SourceTimer};
pub use wait::WaitObject;
