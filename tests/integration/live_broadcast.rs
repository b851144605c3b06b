//! Live snapshot fan-out

use std::time::Duration;

use netwatch::{
    ProbeKind,
    actors::broadcaster::BroadcasterHandle,
    metrics::Snapshot,
    storage::{Sample, SampleStore},
    util::now_ms,
};

use crate::helpers::{RecordingStore, snapshot_builder};

async fn next_frame(subscription: &mut netwatch::actors::messages::Subscription) -> Snapshot {
    let frame = tokio::time::timeout(Duration::from_secs(2), subscription.frames.recv())
        .await
        .expect("no frame within 2s")
        .expect("subscription closed");
    serde_json::from_str(&frame).unwrap()
}

#[tokio::test]
async fn test_no_store_reads_without_subscribers() {
    let store = RecordingStore::new();
    let broadcaster =
        BroadcasterHandle::spawn(snapshot_builder(store.clone(), &["1.1.1.1"]), Duration::from_millis(20));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(store.reads(), 0);

    let subscription = broadcaster.subscribe().await.unwrap();
    assert!(store.reads() > 0);

    broadcaster.unsubscribe(subscription.id).await.unwrap();
    assert_eq!(broadcaster.subscriber_count().await.unwrap(), 0);

    store.reset_reads();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(store.reads(), 0);

    broadcaster.close().await.unwrap();
}

#[tokio::test]
async fn test_no_store_reads_after_receiver_dropped() {
    let store = RecordingStore::new();
    let broadcaster =
        BroadcasterHandle::spawn(snapshot_builder(store.clone(), &["1.1.1.1"]), Duration::from_millis(100));

    let subscription = broadcaster.subscribe().await.unwrap();
    // the consumer vanishes without unsubscribing
    drop(subscription);

    store.reset_reads();
    tokio::time::sleep(Duration::from_millis(350)).await;

    assert_eq!(store.reads(), 0);
    assert_eq!(broadcaster.subscriber_count().await.unwrap(), 0);

    broadcaster.close().await.unwrap();
}

#[tokio::test]
async fn test_first_frame_arrives_before_first_interval() {
    let store = RecordingStore::new();
    store
        .append_samples(vec![Sample::success(ProbeKind::Ping, "1.1.1.1", now_ms() - 500, 14.0)])
        .await
        .unwrap();

    let broadcaster =
        BroadcasterHandle::spawn(snapshot_builder(store.clone(), &["1.1.1.1"]), Duration::from_secs(3600));
    let mut subscription = broadcaster.subscribe().await.unwrap();

    let frame = tokio::time::timeout(Duration::from_millis(100), subscription.frames.recv())
        .await
        .expect("first frame should not wait for the interval")
        .unwrap();
    let snapshot: Snapshot = serde_json::from_str(&frame).unwrap();

    assert_eq!(snapshot.v, 1);
    let target = &snapshot.ping["1.1.1.1"];
    assert_eq!(target.last_sample.rtt_ms, Some(14.0));
    assert_eq!(target.last_sample.up, 1);
    assert_eq!(target.win1m.samples, 1);

    broadcaster.close().await.unwrap();
}

#[tokio::test]
async fn test_dropped_subscriber_does_not_affect_others() {
    let store = RecordingStore::new();
    let broadcaster =
        BroadcasterHandle::spawn(snapshot_builder(store.clone(), &["1.1.1.1"]), Duration::from_millis(50));

    let mut a = broadcaster.subscribe().await.unwrap();
    let mut b = broadcaster.subscribe().await.unwrap();
    let c = broadcaster.subscribe().await.unwrap();
    assert_eq!(broadcaster.subscriber_count().await.unwrap(), 3);

    next_frame(&mut a).await;
    next_frame(&mut b).await;

    // abrupt disconnect: the receiving half goes away without unsubscribing
    drop(c);
    let dropped_at = now_ms();

    // frames queued before the drop do not count, only a tick rendered after it
    let mut from_a = next_frame(&mut a).await;
    while from_a.ts <= dropped_at {
        from_a = next_frame(&mut a).await;
    }
    let mut from_b = next_frame(&mut b).await;
    while from_b.ts <= dropped_at {
        from_b = next_frame(&mut b).await;
    }
    assert_eq!(from_a.v, 1);
    assert_eq!(from_b.v, 1);

    assert_eq!(broadcaster.subscriber_count().await.unwrap(), 2);

    broadcaster.close().await.unwrap();
}

#[tokio::test]
async fn test_closed_store_still_yields_frames() {
    let store = RecordingStore::new();
    store.close().await.unwrap();

    let broadcaster =
        BroadcasterHandle::spawn(snapshot_builder(store.clone(), &["1.1.1.1", "8.8.8.8"]), Duration::from_millis(20));
    let mut subscription = broadcaster.subscribe().await.unwrap();

    let snapshot = next_frame(&mut subscription).await;
    assert_eq!(snapshot.ping.len(), 2);
    assert!(snapshot.ping.values().all(|t| t.win1m.samples == 0 && !t.fresh));

    // the stream keeps going
    next_frame(&mut subscription).await;

    broadcaster.close().await.unwrap();
}

#[tokio::test]
async fn test_close_ends_every_subscription() {
    let store = RecordingStore::new();
    let broadcaster = BroadcasterHandle::spawn(snapshot_builder(store, &[]), Duration::from_millis(20));

    let mut a = broadcaster.subscribe().await.unwrap();
    let mut b = broadcaster.subscribe().await.unwrap();

    broadcaster.close().await.unwrap();

    // drain whatever was queued, then the channel must report closed
    while a.frames.recv().await.is_some() {}
    while b.frames.recv().await.is_some() {}

    assert!(broadcaster.subscriber_count().await.is_err());
    // closing twice is fine
    broadcaster.close().await.unwrap();
}
