//! End-to-end broker binding tests against an in-process websocket server.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Notify;

use waggle_bus::{callback, reporting, BindingKind, Bus};

use support::{broker_behavior, next_frame_of, spawn_server, test_config};

async fn start_bus(name: &str, port: u16) -> Bus {
    let config = test_config(name, BindingKind::Broker, port);
    let (reporter, feed) = reporting::channel(name);
    Bus::start(config, reporter, feed).await.unwrap()
}

#[tokio::test]
async fn wildcard_subscription_receives_matching_events() {
    let mut server = spawn_server(broker_behavior()).await;
    let bus = start_bus("tester", server.port).await;
    let mut monitor = bus.monitor();
    monitor.wait_connected().await;

    let seen = Arc::new(Notify::new());
    let notify = seen.clone();
    bus.subscribe(
        "sensors/+/temp",
        callback(move |topic, body| {
            let notify = notify.clone();
            async move {
                assert_eq!(topic, "sensors/kitchen/temp");
                assert_eq!(body["celsius"], 21);
                notify.notify_one();
            }
        }),
    )
    .await
    .unwrap();
    next_frame_of(&mut server.received, "subscribe").await;

    bus.publish("sensors/kitchen/temp", json!({"celsius": 21})).await;

    tokio::time::timeout(Duration::from_secs(5), seen.notified())
        .await
        .expect("callback should have run");
    bus.stop().await;
}

#[tokio::test]
async fn own_publications_are_never_dispatched_locally() {
    let mut server = spawn_server(broker_behavior()).await;
    let bus = start_bus("tester", server.port).await;
    let mut monitor = bus.monitor();
    monitor.wait_connected().await;

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    bus.subscribe(
        "tester/publications",
        callback(move |_topic, _body| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }),
    )
    .await
    .unwrap();
    next_frame_of(&mut server.received, "subscribe").await;

    bus.publish("tester/publications", json!({"n": 1})).await;

    // The server routed the frame back; the binding must drop it.
    next_frame_of(&mut server.received, "publish").await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    bus.stop().await;
}

#[tokio::test]
async fn events_published_while_disconnected_are_replayed() {
    let mut server = spawn_server(broker_behavior()).await;
    let bus = start_bus("tester", server.port).await;
    let mut monitor = bus.monitor();
    monitor.wait_connected().await;

    // Cut the connection and publish into the void.
    server.kick.send(()).ok();
    while monitor.is_connected() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bus.publish("orders/17", json!({"total": 99})).await;

    // The supervisor reconnects on its own and replay resends the event.
    let frame = next_frame_of(&mut server.received, "publish").await;
    assert_eq!(frame["topic"], "orders/17");
    let body: serde_json::Value = serde_json::from_str(frame["body"].as_str().unwrap()).unwrap();
    assert_eq!(body["total"], 99);
    bus.stop().await;
}

#[tokio::test]
async fn subscriptions_survive_a_reconnect() {
    let mut server = spawn_server(broker_behavior()).await;
    let bus = start_bus("tester", server.port).await;
    let mut monitor = bus.monitor();
    monitor.wait_connected().await;

    bus.subscribe("alerts/#", callback(|_, _| async {})).await.unwrap();
    let first = next_frame_of(&mut server.received, "subscribe").await;
    assert_eq!(first["pattern"], "alerts/#");

    server.kick.send(()).ok();
    let again = next_frame_of(&mut server.received, "subscribe").await;
    assert_eq!(again["pattern"], "alerts/#");
    bus.stop().await;
}
