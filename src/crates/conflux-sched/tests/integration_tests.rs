//! End-to-end scheduler scenarios: dependency order, resource bounds,
//! hierarchy, priorities, retries and cancellation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::{pin_mut, StreamExt};
use parking_lot::Mutex;

use conflux_sched::{
    AgingPolicy, DependencyGraph, PriorityDependencySource, ResourceCapacitySource, ResourceCost,
    Result, ScheduledTask, SchedError, TaskPool, TaskProgress, TaskRunner,
};

type Key = &'static str;
type Source = Arc<PriorityDependencySource<Key, i32>>;

fn source_with_priorities(priorities: &'static [(Key, f64)], aging: AgingPolicy) -> Source {
    PriorityDependencySource::new(
        DependencyGraph::new(),
        Arc::new(move |k: &Key| {
            priorities
                .iter()
                .find(|(key, _)| key == k)
                .map(|(_, p)| *p)
                .unwrap_or(1.0)
        }),
        aging,
    )
}

/// Tracks which tasks are running and asserts a per-resource bound.
#[derive(Default)]
struct ResourceGauge {
    running: Mutex<HashMap<Key, ResourceCost>>,
    violated: AtomicBool,
    peak: AtomicI64,
}

impl ResourceGauge {
    fn enter(&self, key: Key, cost: ResourceCost, resource: &str, bound: u64) {
        let mut running = self.running.lock();
        running.insert(key, cost);
        let total: u64 = running.values().map(|c| c.get(resource)).sum();
        self.peak.fetch_max(total as i64, Ordering::SeqCst);
        if total > bound {
            self.violated.store(true, Ordering::SeqCst);
        }
    }

    fn exit(&self, key: Key) {
        self.running.lock().remove(&key);
    }
}

fn gauged_task(
    key: Key,
    cost: ResourceCost,
    gauge: Arc<ResourceGauge>,
    resource: &'static str,
    bound: u64,
    work: Duration,
) -> ScheduledTask<Key, i32> {
    let enter_cost = cost.clone();
    let runner = TaskRunner::one_shot(move || {
        let gauge = gauge.clone();
        let cost = enter_cost.clone();
        async move {
            gauge.enter(key, cost, resource, bound);
            tokio::time::sleep(work).await;
            gauge.exit(key);
            Ok(1)
        }
    });
    ScheduledTask::new(key, runner).with_cost(cost)
}

async fn collect_ok(pool: &TaskPool<Key, i32>) -> Vec<TaskProgress<Key, i32>> {
    let stream = pool.run_tasks(false);
    pin_mut!(stream);
    let mut out = Vec::new();
    while let Some(item) = stream.next().await {
        out.push(item.unwrap());
    }
    out
}

fn final_position(envelopes: &[TaskProgress<Key, i32>], key: Key) -> usize {
    envelopes
        .iter()
        .position(|e| e.is_final() && *e.task_id() == key)
        .unwrap_or_else(|| panic!("no FINAL envelope for {key}"))
}

#[tokio::test]
async fn test_diamond_respects_dependencies_and_memory_bound() {
    // A → {B, C} → D. Memory 8 forbids B (4) and C (6) from overlapping.
    let source = source_with_priorities(&[("d", 10.0)], AgingPolicy::none());
    let gauge = Arc::new(ResourceGauge::default());
    let work = Duration::from_millis(20);

    let capacity =
        ResourceCapacitySource::new("root", ResourceCost::slots(2).with("memory_gb", 8));

    source
        .add_task(
            gauged_task("a", ResourceCost::slots(1), gauge.clone(), "memory_gb", 8, work),
            &[],
        )
        .unwrap();
    source
        .add_task(
            gauged_task(
                "b",
                ResourceCost::slots(1).with("memory_gb", 4),
                gauge.clone(),
                "memory_gb",
                8,
                work,
            ),
            &["a"],
        )
        .unwrap();
    source
        .add_task(
            gauged_task(
                "c",
                ResourceCost::slots(1).with("memory_gb", 6),
                gauge.clone(),
                "memory_gb",
                8,
                work,
            ),
            &["a"],
        )
        .unwrap();
    source
        .add_task(
            gauged_task("d", ResourceCost::slots(1), gauge.clone(), "memory_gb", 8, work),
            &["b", "c"],
        )
        .unwrap();

    let pool = TaskPool::new(source, capacity.clone());
    let envelopes = collect_ok(&pool).await;

    assert_eq!(envelopes.len(), 4);
    let (a, b, c, d) = (
        final_position(&envelopes, "a"),
        final_position(&envelopes, "b"),
        final_position(&envelopes, "c"),
        final_position(&envelopes, "d"),
    );
    assert!(a < b && a < c, "a must finish before b and c");
    assert!(d > b && d > c, "d must finish last");

    assert!(
        !gauge.violated.load(Ordering::SeqCst),
        "memory bound was exceeded"
    );
    // B (4) and C (6) can never overlap under a bound of 8.
    assert!(gauge.peak.load(Ordering::SeqCst) <= 6);

    assert_eq!(capacity.remaining("capacity"), Some(2));
    assert_eq!(capacity.remaining("memory_gb"), Some(8));
}

#[tokio::test]
async fn test_retry_envelope_sequence_and_single_costing() {
    let source = source_with_priorities(&[], AgingPolicy::none());
    let attempts = Arc::new(AtomicUsize::new(0));
    let concurrent = Arc::new(AtomicUsize::new(0));
    let over_booked = Arc::new(AtomicBool::new(false));

    let runner = {
        let attempts = attempts.clone();
        let concurrent = concurrent.clone();
        let over_booked = over_booked.clone();
        TaskRunner::one_shot(move || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            let concurrent = concurrent.clone();
            let over_booked = over_booked.clone();
            async move {
                if concurrent.fetch_add(1, Ordering::SeqCst) > 0 {
                    over_booked.store(true, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(SchedError::task(format!("attempt {attempt} failed")))
                } else {
                    Ok(7)
                }
            }
        })
    };

    // The retry hook refers back to the source through a weak handle, as
    // completion hooks are wired after the source exists.
    let weak: Weak<PriorityDependencySource<Key, i32>> = Arc::downgrade(&source);
    let task = ScheduledTask::new("x", runner)
        .with_cost(ResourceCost::slots(1))
        .on_error(move |key, _err| {
            if let Some(src) = weak.upgrade() {
                let _ = src.fail(key);
            }
        });
    source.add_task(task, &[]).unwrap();

    let capacity = ResourceCapacitySource::new("root", ResourceCost::slots(1));
    let pool = TaskPool::new(source, capacity.clone());
    let envelopes = collect_ok(&pool).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3, "exactly three runs");
    assert!(!over_booked.load(Ordering::SeqCst), "cost was double-counted");
    assert_eq!(envelopes.len(), 3);
    assert!(envelopes[0].is_error());
    assert!(envelopes[1].is_error());
    assert_eq!(
        envelopes[2],
        TaskProgress::Final { task_id: "x", value: 7 }
    );
    assert_eq!(capacity.remaining("capacity"), Some(1));
}

#[tokio::test]
async fn test_priority_obedience_when_both_affordable() {
    let source = source_with_priorities(&[("hi", 10.0), ("lo", 1.0)], AgingPolicy::none());
    let gauge = Arc::new(ResourceGauge::default());
    let work = Duration::from_millis(10);

    // Added lo first: priority, not insertion order, must decide.
    source
        .add_task(
            gauged_task("lo", ResourceCost::slots(1), gauge.clone(), "capacity", 1, work),
            &[],
        )
        .unwrap();
    source
        .add_task(
            gauged_task("hi", ResourceCost::slots(1), gauge.clone(), "capacity", 1, work),
            &[],
        )
        .unwrap();

    let capacity = ResourceCapacitySource::new("root", ResourceCost::slots(1));
    let pool = TaskPool::new(source, capacity);
    let envelopes = collect_ok(&pool).await;

    assert!(final_position(&envelopes, "hi") < final_position(&envelopes, "lo"));
}

#[tokio::test]
async fn test_aging_prevents_starvation() {
    // "old" has the lower base priority but has been ready much longer;
    // with aging enabled it must start first.
    let source = source_with_priorities(
        &[("old", 1.0), ("new", 10.0)],
        AgingPolicy::new(1.0, 1000.0),
    );
    let gauge = Arc::new(ResourceGauge::default());
    let work = Duration::from_millis(5);

    source
        .add_task(
            gauged_task("old", ResourceCost::slots(1), gauge.clone(), "capacity", 1, work),
            &[],
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    source
        .add_task(
            gauged_task("new", ResourceCost::slots(1), gauge.clone(), "capacity", 1, work),
            &[],
        )
        .unwrap();

    let capacity = ResourceCapacitySource::new("root", ResourceCost::slots(1));
    let pool = TaskPool::new(source, capacity);
    let envelopes = collect_ok(&pool).await;

    assert!(final_position(&envelopes, "old") < final_position(&envelopes, "new"));
}

#[tokio::test]
async fn test_hierarchy_child_and_parent_bounds_hold() {
    // Parent allows 2 slots; each child allows 2 of its own. Two pools,
    // one per child, with two tasks each: global concurrency must respect
    // the parent even though each child alone would allow more.
    let parent = ResourceCapacitySource::new("parent", ResourceCost::slots(2));
    let left = ResourceCapacitySource::child_of(&parent, "left", ResourceCost::slots(2));
    let right = ResourceCapacitySource::child_of(&parent, "right", ResourceCost::slots(2));

    let gauge = Arc::new(ResourceGauge::default());
    let work = Duration::from_millis(30);

    let left_source = source_with_priorities(&[], AgingPolicy::none());
    for key in ["l1", "l2"] {
        left_source
            .add_task(
                gauged_task(key, ResourceCost::slots(1), gauge.clone(), "capacity", 2, work),
                &[],
            )
            .unwrap();
    }
    let right_source = source_with_priorities(&[], AgingPolicy::none());
    for key in ["r1", "r2"] {
        right_source
            .add_task(
                gauged_task(key, ResourceCost::slots(1), gauge.clone(), "capacity", 2, work),
                &[],
            )
            .unwrap();
    }

    let left_pool = TaskPool::new(left_source, left);
    let right_pool = TaskPool::new(right_source, right);
    let (left_envelopes, right_envelopes) =
        tokio::join!(collect_ok(&left_pool), collect_ok(&right_pool));

    assert_eq!(left_envelopes.len(), 2);
    assert_eq!(right_envelopes.len(), 2);
    assert!(
        !gauge.violated.load(Ordering::SeqCst),
        "parent capacity exceeded"
    );
    assert_eq!(parent.remaining("capacity"), Some(2));
}

#[tokio::test]
async fn test_dropping_stream_cancels_and_releases() {
    let source = source_with_priorities(&[], AgingPolicy::none());
    let finished = Arc::new(AtomicBool::new(false));
    let runner = {
        let finished = finished.clone();
        TaskRunner::one_shot(move || {
            let finished = finished.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                finished.store(true, Ordering::SeqCst);
                Ok(0)
            }
        })
    };
    source
        .add_task(
            ScheduledTask::new("slow", runner).with_cost(ResourceCost::slots(1)),
            &[],
        )
        .unwrap();

    let capacity = ResourceCapacitySource::new("root", ResourceCost::slots(1));
    let pool = TaskPool::new(source, capacity.clone());

    {
        let stream = pool.run_tasks(false);
        pin_mut!(stream);
        // Let the loop start the task; no envelope arrives while it sleeps.
        let poll = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(poll.is_err(), "nothing should complete yet");
        assert_eq!(capacity.remaining("capacity"), Some(0));
        // Dropping the stream here must abort the runner and release.
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(capacity.remaining("capacity"), Some(1));
    assert!(!finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_streaming_and_one_shot_mix() {
    let source = source_with_priorities(&[], AgingPolicy::none());
    source
        .add_task(
            ScheduledTask::new(
                "stream",
                TaskRunner::streaming(|| {
                    futures::stream::iter(vec![Ok(1), Ok(2), Ok(3)]).boxed()
                }),
            )
            .with_cost(ResourceCost::slots(1)),
            &[],
        )
        .unwrap();
    source
        .add_task(
            ScheduledTask::new("shot", TaskRunner::one_shot(|| async { Ok(9) }))
                .with_cost(ResourceCost::slots(1)),
            &["stream"],
        )
        .unwrap();

    let capacity = ResourceCapacitySource::new("root", ResourceCost::slots(1));
    let pool = TaskPool::new(source, capacity);
    let envelopes = collect_ok(&pool).await;

    let kinds: Vec<(bool, Key)> = envelopes
        .iter()
        .map(|e| (e.is_final(), *e.task_id()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (false, "stream"),
            (false, "stream"),
            (true, "stream"),
            (true, "shot"),
        ]
    );
}

#[tokio::test]
async fn test_stop_on_error_with_dependents_pending() {
    let source = source_with_priorities(&[], AgingPolicy::none());
    source
        .add_task(
            ScheduledTask::new(
                "bad",
                TaskRunner::one_shot(|| async { Err(SchedError::task("fatal")) }),
            )
            .with_cost(ResourceCost::slots(1)),
            &[],
        )
        .unwrap();
    source
        .add_task(
            ScheduledTask::new("never", TaskRunner::one_shot(|| async { Ok(0) })),
            &["bad"],
        )
        .unwrap();

    let capacity = ResourceCapacitySource::new("root", ResourceCost::slots(1));
    let pool = TaskPool::new(source, capacity.clone());

    let stream = pool.run_tasks(true);
    pin_mut!(stream);
    let first: Result<TaskProgress<Key, i32>> = stream.next().await.unwrap();
    assert!(first.is_err());
    assert!(stream.next().await.is_none());
    assert_eq!(capacity.remaining("capacity"), Some(1));
}
