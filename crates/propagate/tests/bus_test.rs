//! Reload fan-out over real ZeroMQ sockets.
//!
//! One node binds the PUB side; every node subscribes to it. A mutation on
//! the binding node must reload the schedulers of all nodes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};

use dynlog_core::{BaseConfig, Trigger};
use dynlog_propagate::{BusConfig, BusEndpoint, BusPropagator, Propagator};
use dynlog_scheduler::{MemoryStore, RecordingApplier, Scheduler};

struct Node {
    store: Arc<MemoryStore>,
    scheduler: Arc<Scheduler>,
    propagator: BusPropagator,
}

fn node(publish: BusEndpoint, subscribe: BusEndpoint, bind_publisher: bool) -> Node {
    let store = Arc::new(MemoryStore::new());
    let applier = Arc::new(RecordingApplier::new());
    let scheduler = Scheduler::new(store.clone(), applier, BaseConfig::default());
    let propagator = BusPropagator::new(
        BusConfig {
            publish,
            subscribe,
            bind_publisher,
        },
        store.clone(),
        scheduler.clone(),
        None,
    );
    Node {
        store,
        scheduler,
        propagator,
    }
}

async fn await_applied(node: &Node) {
    let mut applied = node.scheduler.applied();
    tokio::time::timeout(Duration::from_secs(3), applied.changed())
        .await
        .expect("no reload observed")
        .unwrap();
}

#[tokio::test]
async fn store_mutation_reloads_every_node() {
    let hub = BusEndpoint::tcp("127.0.0.1", 15840);
    // The second node binds its own publisher that nobody subscribes to;
    // it only listens in this scenario.
    let idle = BusEndpoint::tcp("127.0.0.1", 15841);

    let a = node(hub.clone(), hub.clone(), true);
    let b = node(idle, hub, true);

    a.propagator.setup().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    b.propagator.setup().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let cfg = a.store.put_config_json("quiet", "{}").unwrap();
    let t = a.store.put_trigger(Trigger::new(
        "t",
        Some(Utc::now() - ChronoDuration::hours(1)),
        Some(Utc::now() + ChronoDuration::hours(1)),
        cfg.id,
    ));

    // Node B has nothing in its store, but it must still have reloaded.
    await_applied(&b).await;

    // Node A receives its own signal back through the hub and activates
    // the new window.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if a.scheduler.current_trigger().await.id == t.id {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "node A never activated the new window"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    a.propagator.teardown().await;
    b.propagator.teardown().await;
}

#[tokio::test]
async fn explicit_propagate_reaches_subscribers() {
    let hub = BusEndpoint::tcp("127.0.0.1", 15860);
    let idle = BusEndpoint::tcp("127.0.0.1", 15861);

    let a = node(hub.clone(), hub.clone(), true);
    let b = node(idle, hub, true);

    a.propagator.setup().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    b.propagator.setup().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    a.propagator.propagate().await.unwrap();
    await_applied(&b).await;

    a.propagator.teardown().await;
    b.propagator.teardown().await;
}

#[tokio::test]
async fn propagate_before_setup_is_an_error() {
    let hub = BusEndpoint::tcp("127.0.0.1", 15870);
    let a = node(hub.clone(), hub, true);
    assert!(a.propagator.propagate().await.is_err());
}
