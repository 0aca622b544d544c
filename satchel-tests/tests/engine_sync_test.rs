//! End-to-end engine tests over a shared in-memory store.

use std::sync::Arc;

use satchel_core::{Clock, CollectionKind, Record, Session};
use satchel_sync::{SyncDirection, SyncEvent};
use satchel_test_utils::{
    past_cold_window, past_heartbeat, past_hot_window, settle, TestDevice,
};

#[tokio::test(start_paused = true)]
async fn test_debounced_upload_round_trip() {
    let store = Arc::new(satchel_sync::MemoryStore::new());
    let device = TestDevice::new(store.clone());
    device.start().await;

    let id = device.put_session("algebra notes");
    settle().await;

    // Still inside the debounce window: nothing uploaded yet.
    assert!(store.record_ids(CollectionKind::Sessions).is_empty());

    past_hot_window().await;
    assert!(store.record(CollectionKind::Sessions, &id).is_some());
    assert!(store
        .manifest(CollectionKind::Sessions)
        .expect("manifest written")
        .contains(&id));
    assert_eq!(store.scalar("last-modified"), Some(device.clock.now_ms()));

    device.engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_mutation_burst_collapses_into_one_cycle() {
    let store = Arc::new(satchel_sync::MemoryStore::new());
    let device = TestDevice::new(store.clone());
    device.start().await;

    for i in 0..10 {
        device.put_session(&format!("note {i}"));
    }
    past_hot_window().await;

    let stats = device.engine.stats();
    assert_eq!(stats.upload_cycles, 1);
    assert_eq!(stats.records_uploaded, 10);
    assert_eq!(store.record_ids(CollectionKind::Sessions).len(), 10);

    device.engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_local_deletion_bypasses_debounce() {
    let store = Arc::new(satchel_sync::MemoryStore::new());
    let device = TestDevice::new(store.clone());
    device.start().await;

    let id = device.put_session("temporary");
    past_hot_window().await;
    assert!(store.record(CollectionKind::Sessions, &id).is_some());

    device.engine.hub().remove(CollectionKind::Sessions, &id);
    settle().await;

    // No debounce window elapsed, yet the delete already landed and the
    // manifest no longer names the record.
    assert!(store.record(CollectionKind::Sessions, &id).is_none());
    assert!(!store
        .manifest(CollectionKind::Sessions)
        .expect("manifest rewritten")
        .contains(&id));

    device.engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_propagates_between_devices() {
    let store = Arc::new(satchel_sync::MemoryStore::new());
    let alpha = TestDevice::with_start_time(store.clone(), 1_000);
    let beta = TestDevice::with_start_time(store.clone(), 1_000);
    alpha.start().await;
    beta.start().await;

    let id = alpha.put_session("shared");
    past_hot_window().await;

    // Beta's next heartbeat tick sees alpha's bump and downloads.
    past_heartbeat().await;
    assert!(beta.engine.hub().get(CollectionKind::Sessions, &id).is_some());

    // Alpha observed its own write, so its poller stayed quiet.
    assert_eq!(alpha.engine.stats().records_merged, 0);

    alpha.engine.stop().await;
    beta.engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_newer_remote_edit_wins_on_clean_local_copy() {
    let store = Arc::new(satchel_sync::MemoryStore::new());
    let alpha = TestDevice::with_start_time(store.clone(), 1_000);
    let beta = TestDevice::with_start_time(store.clone(), 1_000);
    alpha.start().await;
    beta.start().await;

    let id = alpha.put_session("draft");
    past_hot_window().await;
    past_heartbeat().await;

    // Beta edits the session later in wall-clock time.
    beta.clock.set(9_000);
    let doc = beta
        .engine
        .hub()
        .get(CollectionKind::Sessions, &id)
        .expect("beta downloaded the session");
    let mut session: Session = doc.decode().expect("decode session");
    session.title = "final".to_string();
    session.updated_at = beta.clock.now_ms();
    beta.engine
        .hub()
        .put_record(CollectionKind::Sessions, &session)
        .unwrap();
    past_hot_window().await;

    // Alpha's heartbeat picks the edit up; its clean copy loses.
    past_heartbeat().await;
    let doc = alpha
        .engine
        .hub()
        .get(CollectionKind::Sessions, &id)
        .expect("session survives the merge");
    let merged: Session = doc.decode().unwrap();
    assert_eq!(merged.title, "final");
    assert_eq!(merged.updated_at, 9_000);

    alpha.engine.stop().await;
    beta.engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_initial_gate_blocks_uploads_until_first_download() {
    let store = Arc::new(satchel_sync::MemoryStore::new());
    store.set_offline(true);

    let device = TestDevice::new(store.clone());
    device.start().await;
    assert!(!device.engine.status().initial_sync_complete);

    let id = device.put_session("held back");
    past_hot_window().await;

    store.set_offline(false);
    assert!(store.record_ids(CollectionKind::Sessions).is_empty());

    // Connectivity is back: force a full pass. The download opens the
    // gate and the queued local edit flushes.
    device.engine.force_sync().await.unwrap();
    settle().await;
    assert!(device.engine.status().initial_sync_complete);
    assert!(store.record(CollectionKind::Sessions, &id).is_some());

    device.engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_collection_skips_manifest_and_retries() {
    let store = Arc::new(satchel_sync::MemoryStore::new());
    let device = TestDevice::new(store.clone());
    device.start().await;

    let session_id = device.put_session("fails first");
    let card = satchel_core::Card::new("q", "a", device.clock.now_ms());
    device
        .engine
        .hub()
        .put_record(CollectionKind::Cards, &card)
        .unwrap();

    store.fail_saves(CollectionKind::Sessions, 1);
    past_hot_window().await;

    // Cards landed with their manifest; sessions failed as a unit, so no
    // manifest was written for them.
    assert!(store
        .manifest(CollectionKind::Cards)
        .expect("cards manifest")
        .contains(card.id()));
    assert!(store.manifest(CollectionKind::Sessions).is_none());
    assert_eq!(device.engine.dirty_stats().total_dirty, 1);

    // The failure armed a cold-cadence retry.
    past_cold_window().await;
    assert!(store
        .manifest(CollectionKind::Sessions)
        .expect("sessions manifest after retry")
        .contains(&session_id));
    assert_eq!(device.engine.dirty_stats().total_dirty, 0);

    device.engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_events_report_cycles_and_status() {
    let store = Arc::new(satchel_sync::MemoryStore::new());
    let device = TestDevice::new(store.clone());
    let mut events = device.engine.subscribe().expect("first subscriber");
    device.start().await;

    device.put_session("observable");
    past_hot_window().await;
    device.engine.stop().await;

    let mut saw_download = false;
    let mut saw_upload = false;
    let mut saw_uploading_status = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SyncEvent::DownloadCompleted { .. } => saw_download = true,
            SyncEvent::UploadCompleted { uploaded, .. } => {
                saw_upload = true;
                assert_eq!(uploaded, 1);
            }
            SyncEvent::StatusChanged(status) => {
                if status.direction == SyncDirection::Uploading {
                    saw_uploading_status = true;
                }
            }
            SyncEvent::RemoteChangeDetected | SyncEvent::Failed { .. } => {}
        }
    }
    assert!(saw_download);
    assert!(saw_upload);
    assert!(saw_uploading_status);

    // Second subscriber attempt gets nothing.
    assert!(device.engine.subscribe().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_dirty_local_record_survives_remote_absence() {
    let store = Arc::new(satchel_sync::MemoryStore::new());
    let device = TestDevice::new(store.clone());
    device.start().await;

    // Created locally, never uploaded (debounce still pending), and a
    // download cycle runs in between: the record must not be dropped.
    let id = device.put_session("unsynced draft");
    settle().await;
    device.engine.run_download_cycle().await;

    assert!(device.engine.hub().get(CollectionKind::Sessions, &id).is_some());

    past_hot_window().await;
    assert!(store.record(CollectionKind::Sessions, &id).is_some());

    device.engine.stop().await;
}
