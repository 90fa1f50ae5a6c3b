//! End-to-end pipeline scenarios across the three data-flow engines.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use conflux_core::{
    push_pull_buffer, BidiChain, BoxPull, BoxPush, Capability, Flow, FlowError, ObjMeta, PullObj,
    PushRecipe, Result, SourceBuffer, Step, TapThrough,
};
use futures::future::BoxFuture;

/// Pull stage that counts how often it is pulled.
struct CountingSource<T> {
    meta: ObjMeta,
    inner: SourceBuffer<T>,
    pulls: Arc<AtomicUsize>,
}

impl<T: Send + 'static> CountingSource<T> {
    fn new(items: Vec<T>) -> (Self, Arc<AtomicUsize>) {
        let pulls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                meta: ObjMeta::new("counting_source", &[Capability::Source]),
                inner: SourceBuffer::new(items),
                pulls: pulls.clone(),
            },
            pulls,
        )
    }
}

#[async_trait]
impl<T: Send + 'static> PullObj for CountingSource<T> {
    type Item = T;

    async fn next(&mut self) -> Result<Step<T>> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        self.inner.next().await
    }

    async fn finish(&mut self) -> Result<Step<T>> {
        self.inner.finish().await
    }

    async fn fault(&mut self, err: FlowError) -> Result<Step<T>> {
        self.inner.fault(err).await
    }

    fn meta(&self) -> &ObjMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, PartialEq)]
struct LogEvent {
    level: &'static str,
    msg: &'static str,
}

#[tokio::test]
async fn test_pull_etl_with_trailing_partial_window() {
    // filter evens, triple them, window by 2: [6,12] [18,24] + partial [30].
    let collected = Flow::from_iter(1..=10)
        .filter(|v| v % 2 == 0)
        .map(|v| v * 3)
        .window(2)
        .collect()
        .await
        .unwrap();
    assert_eq!(collected, vec![vec![6, 12], vec![18, 24]]);

    // Direct inspection: the partial group is the return value.
    let mut pipeline = Flow::from_iter(1..=10)
        .filter(|v| v % 2 == 0)
        .map(|v| v * 3)
        .window(2);
    assert_eq!(pipeline.next().await.unwrap(), Step::Next(vec![6, 12]));
    assert_eq!(pipeline.next().await.unwrap(), Step::Next(vec![18, 24]));
    assert_eq!(pipeline.next().await.unwrap(), Step::Done(Some(vec![30])));
}

#[tokio::test]
async fn test_push_fork_audit_pipeline() {
    let audit = conflux_core::SinkCollect::new();
    let audit_buf = audit.buffer();

    let (error_branch, error_buf) = PushRecipe::<LogEvent, LogEvent>::new()
        .filter(|e| e.level == "error")
        .to_vec();

    let chain = PushRecipe::<LogEvent, LogEvent>::new()
        .filter(|e| !e.msg.is_empty())
        .fork(vec![
            Box::new(audit) as BoxPush<LogEvent>,
            error_branch.into_branch(),
        ]);

    let events = [
        LogEvent { level: "info", msg: "a" },
        LogEvent { level: "error", msg: "b" },
        LogEvent { level: "info", msg: "c" },
    ];
    for e in events {
        chain.push(e).await.unwrap();
    }
    chain.finish().await.unwrap();

    assert_eq!(audit_buf.lock().len(), 3);
    let errors = error_buf.lock().clone();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].msg, "b");
}

#[tokio::test]
async fn test_bidi_accumulator_round_trips() {
    let mut chain = BidiChain::from_factory(|| {
        let mut sum = 0i32;
        Box::new(move |n: i32| {
            sum += n;
            let out = sum;
            Box::pin(async move { Ok(out) }) as BoxFuture<'static, Result<i32>>
        })
    });
    assert_eq!(chain.next(10).await.unwrap(), Step::Next(10));
    assert_eq!(chain.next(20).await.unwrap(), Step::Next(30));
    assert_eq!(chain.next(5).await.unwrap(), Step::Next(35));
}

#[tokio::test]
async fn test_race_yields_full_multiset_with_attribution() {
    let results = Flow::race(vec![
        Flow::from_iter(vec![1, 2, 3]),
        Flow::from_iter(vec![10, 20, 30]),
    ])
    .collect()
    .await
    .unwrap();

    assert_eq!(results.len(), 6);
    let mut values: Vec<i32> = results.iter().map(|a| a.value).collect();
    values.sort_unstable();
    assert_eq!(values, vec![1, 2, 3, 10, 20, 30]);
    for a in &results {
        assert!(a.source < 2);
    }
}

#[tokio::test]
async fn test_demand_discipline_map_tap_one_to_one() {
    let (source, pulls) = CountingSource::new((1..=5).collect());
    let mut pipeline = Flow::source(source).map(|v| v + 1).tap(|_| {});

    for _ in 0..3 {
        pipeline.next().await.unwrap();
    }
    // Three downstream pulls, exactly three upstream pulls.
    assert_eq!(pulls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_return_propagation_through_composite() {
    // A tap-through owns its upstream and its side-effect sinks; finishing
    // the composite must reach both exactly once.
    let audit = conflux_core::SinkCollect::new();
    let audit_buf = audit.buffer();
    let (source, pulls) = CountingSource::new(vec![1, 2, 3]);
    let mut composite = TapThrough::new(source, vec![Box::new(audit) as BoxPush<i32>]);

    composite.next().await.unwrap();
    composite.finish().await.unwrap();
    let settled = pulls.load(Ordering::SeqCst);

    // Closed composite stays closed, children untouched by repeat closes.
    composite.finish().await.unwrap();
    assert_eq!(composite.next().await.unwrap(), Step::Done(None));
    assert_eq!(pulls.load(Ordering::SeqCst), settled);
    assert_eq!(audit_buf.lock().clone(), vec![1]);
}

#[tokio::test]
async fn test_push_to_pull_bridge_end_to_end() {
    let (bridge_sink, bridge_source) = push_pull_buffer::<i32>();

    // Producer side: an eager chain feeding the bridge.
    let chain = PushRecipe::<i32, i32>::new()
        .map(|v| v * 2)
        .into_sink(Box::new(bridge_sink) as BoxPush<i32>);

    // Consumer side: a lazy flow draining the bridge.
    let consumer = tokio::spawn(async move {
        Flow::source(bridge_source)
            .window(2)
            .collect()
            .await
            .unwrap()
    });

    for v in 1..=4 {
        chain.push(v).await.unwrap();
    }
    chain.finish().await.unwrap();

    assert_eq!(consumer.await.unwrap(), vec![vec![2, 4], vec![6, 8]]);
}

#[tokio::test]
async fn test_labeled_race_keys_cover_sources() {
    let results = Flow::race_labeled(vec![
        ("alpha".to_string(), Flow::from_iter(vec![1, 2])),
        ("beta".to_string(), Flow::from_iter(vec![3])),
    ])
    .collect()
    .await
    .unwrap();

    assert_eq!(results.len(), 3);
    let mut keys: Vec<&str> = results.iter().map(|lv| lv.key.as_str()).collect();
    keys.sort_unstable();
    keys.dedup();
    assert_eq!(keys, vec!["alpha", "beta"]);
}

#[tokio::test]
async fn test_lifecycle_idempotence_across_engines() {
    // Pull side.
    let mut flow = Flow::from_iter(vec![1, 2, 3]).map(|v| v);
    flow.next().await.unwrap();
    let mut inner: BoxPull<i32> = flow.into_inner();
    inner.finish().await.unwrap();
    inner.fault(FlowError::message("late")).await.unwrap();
    assert_eq!(inner.next().await.unwrap(), Step::Done(None));

    // Push side.
    let (chain, buf) = PushRecipe::<i32, i32>::new().to_vec();
    chain.push(1).await.unwrap();
    chain.fault(FlowError::message("stop")).await.unwrap();
    chain.finish().await.unwrap();
    assert_eq!(chain.push(2).await.unwrap(), Step::Done(None));
    assert_eq!(buf.lock().clone(), vec![1]);
}
