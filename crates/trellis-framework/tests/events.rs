use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;
use trellis_core::{BoxError, Hook, SubscribeOptions};
use trellis_framework::{EventBus, EventBusError};
use trellis_transport::{MemoryFabric, MemoryTransport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EntityChanged {
    entity: String,
    revision: u32,
}

const ENTITY_CHANGED: Hook<EntityChanged> = Hook::new("catalog.entity.changed");
const REINDEX: Hook<EntityChanged> = Hook::new("search.index.rebuild");

fn change(revision: u32) -> EntityChanged {
    EntityChanged {
        entity: "component:checkout".into(),
        revision,
    }
}

async fn instance(fabric: &Arc<MemoryFabric>, name: &str) -> EventBus {
    EventBus::connect(Arc::new(fabric.connection(name)))
        .await
        .unwrap()
}

fn counting(
    counter: &Arc<AtomicUsize>,
) -> impl Fn(EntityChanged) -> futures::future::Ready<Result<(), BoxError>> + Send + Sync + 'static
{
    let counter = Arc::clone(counter);
    move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(Ok(()))
    }
}

/// Waits until `counter` reaches `expected`, then gives stragglers a moment.
async fn settle(counter: &AtomicUsize, expected: usize) -> usize {
    let _ = timeout(Duration::from_secs(2), async {
        while counter.load(Ordering::SeqCst) < expected {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    sleep(Duration::from_millis(50)).await;
    counter.load(Ordering::SeqCst)
}

// ─── Distributed delivery ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_work_queue_delivers_each_payload_once_across_instances() {
    const M: usize = 20;
    let fabric = MemoryFabric::new();
    let a = instance(&fabric, "a").await;
    let b = instance(&fabric, "b").await;

    let on_a = Arc::new(AtomicUsize::new(0));
    let on_b = Arc::new(AtomicUsize::new(0));
    a.subscribe("search", REINDEX, counting(&on_a), SubscribeOptions::work_queue())
        .await
        .unwrap();
    b.subscribe("search", REINDEX, counting(&on_b), SubscribeOptions::work_queue())
        .await
        .unwrap();

    for revision in 0..M as u32 {
        a.emit(REINDEX, &change(revision)).await.unwrap();
    }

    let combined = || on_a.load(Ordering::SeqCst) + on_b.load(Ordering::SeqCst);
    let _ = timeout(Duration::from_secs(2), async {
        while combined() < M {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(combined(), M);
    assert_eq!(fabric.retained(REINDEX.id()), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_broadcast_reaches_every_instance() {
    const M: usize = 10;
    let fabric = MemoryFabric::new();
    let a = instance(&fabric, "a").await;
    let b = instance(&fabric, "b").await;

    let deliveries = Arc::new(AtomicUsize::new(0));
    a.subscribe("incident", ENTITY_CHANGED, counting(&deliveries), SubscribeOptions::broadcast())
        .await
        .unwrap();
    b.subscribe("incident", ENTITY_CHANGED, counting(&deliveries), SubscribeOptions::default())
        .await
        .unwrap();

    for revision in 0..M as u32 {
        b.emit(ENTITY_CHANGED, &change(revision)).await.unwrap();
    }

    assert_eq!(settle(&deliveries, 2 * M).await, 2 * M);
}

#[tokio::test]
async fn test_broadcast_only_hook_retains_nothing() {
    let fabric = MemoryFabric::with_retention_limit(4);
    let bus = instance(&fabric, "a").await;
    let broadcast = Arc::new(AtomicUsize::new(0));
    bus.subscribe("incident", REINDEX, counting(&broadcast), SubscribeOptions::broadcast())
        .await
        .unwrap();

    for revision in 0..10 {
        bus.emit(REINDEX, &change(revision)).await.unwrap();
    }
    assert_eq!(settle(&broadcast, 10).await, 10);
    assert_eq!(fabric.retained(REINDEX.id()), 0);

    let late = Arc::new(AtomicUsize::new(0));
    bus.subscribe("search", REINDEX, counting(&late), SubscribeOptions::work_queue())
        .await
        .unwrap();
    bus.emit(REINDEX, &change(10)).await.unwrap();

    assert_eq!(settle(&late, 1).await, 1);
    assert_eq!(broadcast.load(Ordering::SeqCst), 11);
}

#[tokio::test]
async fn test_work_queue_payload_waits_for_first_consumer() {
    let fabric = MemoryFabric::new();
    let producer = instance(&fabric, "producer").await;
    producer.emit(REINDEX, &change(1)).await.unwrap();

    let consumer = instance(&fabric, "consumer").await;
    let received = Arc::new(AtomicUsize::new(0));
    consumer
        .subscribe("search", REINDEX, counting(&received), SubscribeOptions::work_queue())
        .await
        .unwrap();

    assert_eq!(settle(&received, 1).await, 1);
}

#[tokio::test]
async fn test_listener_receives_decoded_payload() {
    let bus = EventBus::connect(Arc::new(MemoryTransport::standalone()))
        .await
        .unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    bus.subscribe(
        "incident",
        ENTITY_CHANGED,
        move |payload| {
            let tx = tx.clone();
            async move {
                tx.send(payload)?;
                Ok(())
            }
        },
        SubscribeOptions::default(),
    )
    .await
    .unwrap();

    bus.emit(ENTITY_CHANGED, &change(9)).await.unwrap();
    let received = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    assert_eq!(received, Some(change(9)));
}

// ─── Local delivery ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_emit_local_settles_all_listeners() {
    const N: usize = 4;
    const FAILING: usize = 2;
    let bus = EventBus::connect(Arc::new(MemoryTransport::standalone()))
        .await
        .unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    let mut failing_id = None;
    for k in 0..N {
        let ran = Arc::clone(&ran);
        let handle = bus
            .subscribe(
                &format!("plugin-{k}"),
                ENTITY_CHANGED,
                move |_| {
                    let ran = Arc::clone(&ran);
                    async move {
                        sleep(Duration::from_millis(5)).await;
                        ran.fetch_add(1, Ordering::SeqCst);
                        if k == FAILING {
                            return Err::<(), BoxError>("listener rejected".into());
                        }
                        Ok(())
                    }
                },
                SubscribeOptions::default(),
            )
            .await
            .unwrap();
        if k == FAILING {
            failing_id = Some(handle.id());
        }
    }

    let report = bus.emit_local(ENTITY_CHANGED, change(1)).await;

    assert_eq!(report.invoked, N);
    assert_eq!(ran.load(Ordering::SeqCst), N);
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(Some(failure.subscription), failing_id);
    assert_eq!(failure.plugin_id, "plugin-2");
    assert_eq!(failure.hook_id, "catalog.entity.changed");
    assert_eq!(failure.cause, "listener rejected");
}

#[tokio::test]
async fn test_emit_local_ignores_delivery_mode_and_transport() {
    let fabric = MemoryFabric::new();
    let a = instance(&fabric, "a").await;
    let b = instance(&fabric, "b").await;

    let on_a = Arc::new(AtomicUsize::new(0));
    let on_b = Arc::new(AtomicUsize::new(0));
    a.subscribe("search", REINDEX, counting(&on_a), SubscribeOptions::work_queue())
        .await
        .unwrap();
    a.subscribe("search", REINDEX, counting(&on_a), SubscribeOptions::broadcast())
        .await
        .unwrap();
    b.subscribe("search", REINDEX, counting(&on_b), SubscribeOptions::broadcast())
        .await
        .unwrap();

    let report = a.emit_local(REINDEX, change(1)).await;
    assert_eq!(report.invoked, 2);
    assert_eq!(settle(&on_a, 2).await, 2);
    assert_eq!(on_b.load(Ordering::SeqCst), 0);
    assert_eq!(fabric.retained(REINDEX.id()), 0);
}

// ─── Subscription lifecycle ───────────────────────────────────────────────────

#[tokio::test]
async fn test_unsubscribe_stops_only_that_listener() {
    let bus = EventBus::connect(Arc::new(MemoryTransport::standalone()))
        .await
        .unwrap();
    let kept = Arc::new(AtomicUsize::new(0));
    let removed = Arc::new(AtomicUsize::new(0));

    bus.subscribe("incident", ENTITY_CHANGED, counting(&kept), SubscribeOptions::default())
        .await
        .unwrap();
    let handle = bus
        .subscribe("search", ENTITY_CHANGED, counting(&removed), SubscribeOptions::default())
        .await
        .unwrap();

    bus.emit(ENTITY_CHANGED, &change(1)).await.unwrap();
    assert_eq!(settle(&removed, 1).await, 1);

    assert_ok!(handle.unsubscribe().await);
    assert_eq!(bus.subscription_count(), 1);

    bus.emit(ENTITY_CHANGED, &change(2)).await.unwrap();
    assert_eq!(bus.emit_local(ENTITY_CHANGED, change(3)).await.invoked, 1);

    assert_eq!(settle(&kept, 3).await, 3);
    assert_eq!(removed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_in_flight_delivery_completes_after_unsubscribe() {
    let bus = EventBus::connect(Arc::new(MemoryTransport::standalone()))
        .await
        .unwrap();
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));

    let handle = {
        let started = Arc::clone(&started);
        let finished = Arc::clone(&finished);
        bus.subscribe(
            "slow",
            ENTITY_CHANGED,
            move |_| {
                let started = Arc::clone(&started);
                let finished = Arc::clone(&finished);
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_millis(100)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            SubscribeOptions::default(),
        )
        .await
        .unwrap()
    };

    bus.emit(ENTITY_CHANGED, &change(1)).await.unwrap();
    settle(&started, 1).await;
    assert_ok!(handle.unsubscribe().await);

    assert_eq!(settle(&finished, 1).await, 1);
}

#[tokio::test]
async fn test_shutdown_twice_leaves_no_listeners() {
    let fabric = MemoryFabric::new();
    let bus = instance(&fabric, "a").await;
    let counter = Arc::new(AtomicUsize::new(0));
    bus.subscribe("incident", ENTITY_CHANGED, counting(&counter), SubscribeOptions::default())
        .await
        .unwrap();
    bus.subscribe("search", REINDEX, counting(&counter), SubscribeOptions::work_queue())
        .await
        .unwrap();
    assert_eq!(bus.subscription_count(), 2);

    assert_ok!(bus.shutdown().await);
    assert_ok!(bus.shutdown().await);

    assert!(bus.is_shut_down());
    assert_eq!(bus.subscription_count(), 0);
    assert_eq!(fabric.subscriber_count(ENTITY_CHANGED.id()), 0);
    assert_eq!(fabric.subscriber_count(REINDEX.id()), 0);
    assert!(matches!(
        bus.emit(ENTITY_CHANGED, &change(1)).await,
        Err(EventBusError::Closed)
    ));
}

#[tokio::test]
async fn test_shutdown_of_one_instance_keeps_the_other() {
    let fabric = MemoryFabric::new();
    let a = instance(&fabric, "a").await;
    let b = instance(&fabric, "b").await;
    let on_b = Arc::new(AtomicUsize::new(0));
    a.subscribe("search", REINDEX, counting(&Arc::default()), SubscribeOptions::work_queue())
        .await
        .unwrap();
    b.subscribe("search", REINDEX, counting(&on_b), SubscribeOptions::work_queue())
        .await
        .unwrap();

    assert_ok!(a.shutdown().await);
    b.emit(REINDEX, &change(1)).await.unwrap();
    b.emit(REINDEX, &change(2)).await.unwrap();

    assert_eq!(settle(&on_b, 2).await, 2);
}
