//! Event store integration tests.

use chrono::{DateTime, Duration, Utc};
use sami_core::{
    callback_fn, Alert, CallbackError, DetectionEvent, EventHistory, EventRouter, EventType, PipelineEvent,
    Severity,
};
use sami_storage::{EventQuery, EventStore, StoreCallback};
use std::sync::Arc;

fn base() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T08:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn location(device: &str, minutes: i64, lat: f64) -> PipelineEvent {
    DetectionEvent::new(device, EventType::LocationUpdate, 1.0)
        .occurred_at(base() + Duration::minutes(minutes))
        .with_data("lat", lat)
        .with_data("lng", -58.3816)
        .into()
}

#[test]
fn test_device_history_in_range() {
    let dir = tempfile::tempdir().unwrap();
    let store = EventStore::open(dir.path()).unwrap();

    for minute in 0..10 {
        store.insert(&location("gps_1", minute, -34.0 - minute as f64)).unwrap();
        store.insert(&location("gps_2", minute, 10.0)).unwrap();
    }

    let history = store
        .device_events("gps_1", base() + Duration::minutes(2), base() + Duration::minutes(5))
        .unwrap();
    let lats: Vec<f64> = history
        .iter()
        .filter_map(|e| e.detection().get_f64("lat"))
        .collect();
    assert_eq!(lats, vec![-36.0, -37.0, -38.0, -39.0]);
    assert!(history.iter().all(|e| e.device_id() == "gps_1"));

    let all_in_range = store
        .query_range(base(), base() + Duration::minutes(1))
        .unwrap();
    assert_eq!(all_in_range.len(), 4);
}

#[test]
fn test_limit_keeps_newest() {
    let dir = tempfile::tempdir().unwrap();
    let store = EventStore::open(dir.path()).unwrap();
    for minute in 0..5 {
        store.insert(&location("gps_1", minute, minute as f64)).unwrap();
    }

    let latest = store.list_by_device("gps_1", 2).unwrap();
    let lats: Vec<f64> = latest.iter().filter_map(|e| e.detection().get_f64("lat")).collect();
    assert_eq!(lats, vec![3.0, 4.0]);
}

#[test]
fn test_reopen_keeps_events() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = EventStore::open(dir.path()).unwrap();
        store.insert(&location("gps_1", 0, 1.0)).unwrap();
    }
    let store = EventStore::open(dir.path()).unwrap();
    assert_eq!(store.count().unwrap(), 1);
    let restored = store.list_by_device("gps_1", 10).unwrap();
    assert_eq!(restored[0].event_type(), &EventType::LocationUpdate);
}

#[test]
fn test_prune_removes_old_events_and_index() {
    let dir = tempfile::tempdir().unwrap();
    let store = EventStore::open(dir.path()).unwrap();
    for minute in 0..6 {
        store.insert(&location("gps_1", minute, 0.0)).unwrap();
    }

    let removed = store.prune_before(base() + Duration::minutes(3)).unwrap();
    assert_eq!(removed, 3);
    assert_eq!(store.count().unwrap(), 3);
    assert_eq!(store.list_by_device("gps_1", 100).unwrap().len(), 3);
}

#[tokio::test]
async fn test_store_callback_persists_detections_and_alerts() {
    let dir = tempfile::tempdir().unwrap();
    let store = EventStore::open(dir.path()).unwrap();

    let router = EventRouter::new();
    router.register(callback_fn("alerting", |_| Ok(())));
    router.register(Arc::new(StoreCallback::new(store.clone())));

    let unknown = Arc::new(
        DetectionEvent::new("reader_1", EventType::Unknown, 1.0).with_data("tag_id", "TAG999"),
    );
    router.dispatch(PipelineEvent::Detection(unknown.clone())).await;
    router
        .dispatch(Alert::new(unknown, EventType::UnauthorizedAccess, Severity::High, "Unknown tag").into())
        .await;

    let stored = store.query(&EventQuery::device("reader_1")).unwrap();
    assert_eq!(stored.len(), 2);
    let alert = stored.iter().find_map(|e| e.as_alert()).unwrap();
    assert_eq!(alert.severity, Severity::High);
    assert_eq!(alert.source_event.get("tag_id").and_then(|v| v.as_str()), Some("TAG999"));
}

#[tokio::test]
async fn test_failing_store_does_not_stop_later_callbacks() {
    let router = EventRouter::new();
    router.register(callback_fn("store", |_| {
        Err(CallbackError::Delivery("disk full".to_string()))
    }));
    let dir = tempfile::tempdir().unwrap();
    let store = EventStore::open(dir.path()).unwrap();
    router.register(Arc::new(StoreCallback::new(store.clone())));

    let report = router.dispatch(location("gps_1", 0, 1.0)).await;
    assert_eq!(report.failed, vec!["store".to_string()]);
    assert_eq!(store.count().unwrap(), 1);
}
