use std::sync::Arc;
use std::time::Duration;

use massing_tool::persistence::{
    FileStorage, KeyValueStorage, LocalPersistence, LocalPersistenceConfig, MemoryStorage,
    StorageError, WriteOutcome,
};
use serde_json::json;
use tempfile::tempdir;

fn local(storage: &Arc<MemoryStorage>) -> LocalPersistence {
    LocalPersistence::new(storage.clone(), LocalPersistenceConfig::default())
}

#[tokio::test(start_paused = true)]
async fn writes_inside_debounce_window_coalesce() {
    let storage = Arc::new(MemoryStorage::new());
    let local = local(&storage);

    assert_eq!(local.debounced_write("draft", &json!({"v": 1})), WriteOutcome::Scheduled);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(local.debounced_write("draft", &json!({"v": 2})), WriteOutcome::Scheduled);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(local.debounced_write("draft", &json!({"v": 3})), WriteOutcome::Scheduled);
    assert_eq!(storage.write_count(), 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(storage.write_count(), 1);
    assert_eq!(storage.get("draft").unwrap().as_deref(), Some(r#"{"v":3}"#));
    assert!(!local.has_pending("draft"));
}

#[tokio::test(start_paused = true)]
async fn identical_value_is_not_rewritten() {
    let storage = Arc::new(MemoryStorage::new());
    let local = local(&storage);

    local.debounced_write("k", &vec![1, 2, 3]);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(storage.write_count(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(local.debounced_write("k", &vec![1, 2, 3]), WriteOutcome::Unchanged);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(storage.write_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reverting_to_last_written_value_cancels_pending_write() {
    let storage = Arc::new(MemoryStorage::new());
    let local = local(&storage);

    local.debounced_write("k", "a");
    local.flush("k");
    assert_eq!(storage.write_count(), 1);

    assert_eq!(local.debounced_write("k", "b"), WriteOutcome::Scheduled);
    assert_eq!(local.debounced_write("k", "a"), WriteOutcome::Unchanged);
    assert!(!local.has_pending("k"));

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(storage.write_count(), 1);
    assert_eq!(local.safe_read("k", String::new()), "a");
}

#[tokio::test(start_paused = true)]
async fn write_after_clear_waits_for_its_own_window() {
    let storage = Arc::new(MemoryStorage::new());
    let local = local(&storage);

    local.debounced_write("draft", "first");
    tokio::time::sleep(Duration::from_millis(100)).await;
    local.clear("draft");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(local.debounced_write("draft", "second"), WriteOutcome::Scheduled);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(storage.write_count(), 0);
    assert!(local.has_pending("draft"));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(storage.write_count(), 1);
    assert_eq!(storage.get("draft").unwrap().as_deref(), Some(r#""second""#));
}

#[tokio::test(start_paused = true)]
async fn circuit_breaker_drops_writes_over_the_limit() {
    let storage = Arc::new(MemoryStorage::new());
    let local = local(&storage);

    for i in 0..5 {
        assert_eq!(local.debounced_write("busy", &i), WriteOutcome::Scheduled);
    }
    assert_eq!(local.debounced_write("busy", &99), WriteOutcome::Throttled);

    // Other keys have their own budget.
    assert_eq!(local.debounced_write("quiet", &1), WriteOutcome::Scheduled);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(local.safe_read("busy", -1), 4);
    assert_eq!(local.debounced_write("busy", &100), WriteOutcome::Scheduled);
}

#[tokio::test]
async fn safe_read_sees_pending_value() {
    let storage = Arc::new(MemoryStorage::new());
    let local = local(&storage);

    local.debounced_write("draft", &json!({"label": "L3"}));
    assert!(local.has_pending("draft"));
    let value: serde_json::Value = local.safe_read("draft", json!(null));
    assert_eq!(value["label"], "L3");
    assert_eq!(storage.write_count(), 0);
}

#[test]
fn safe_read_falls_back_on_missing_or_malformed_values() {
    let storage = Arc::new(MemoryStorage::new());
    let local = local(&storage);

    assert_eq!(local.safe_read("absent", vec![7]), vec![7]);

    storage.set("garbage", "{not json").unwrap();
    assert_eq!(local.safe_read("garbage", vec![7]), vec![7]);

    storage.set("wrong_shape", r#"{"a":1}"#).unwrap();
    assert_eq!(local.safe_read::<Vec<i32>>("wrong_shape", Vec::new()), Vec::<i32>::new());
}

#[test]
fn without_runtime_writes_land_immediately() {
    let storage = Arc::new(MemoryStorage::new());
    let local = local(&storage);

    assert_eq!(local.debounced_write("k", &42), WriteOutcome::Scheduled);
    assert_eq!(storage.get("k").unwrap().as_deref(), Some("42"));
    assert_eq!(local.safe_read("k", 0), 42);
}

#[test]
fn clear_resets_tracking() {
    let storage = Arc::new(MemoryStorage::new());
    let local = local(&storage);

    local.debounced_write("k", "same");
    assert_eq!(local.debounced_write("k", "same"), WriteOutcome::Unchanged);

    local.clear("k");
    assert_eq!(storage.get("k").unwrap(), None);
    assert_eq!(local.debounced_write("k", "same"), WriteOutcome::Scheduled);
    assert_eq!(storage.write_count(), 2);
}

#[tokio::test]
async fn quota_errors_are_swallowed() {
    let storage = Arc::new(MemoryStorage::with_capacity(16));
    let local = local(&storage);

    local.debounced_write("big", &"x".repeat(64));
    local.flush("big");

    assert!(storage.is_empty());
    assert!(!local.has_pending("big"));
    assert_eq!(local.safe_read("big", String::from("fallback")), "fallback");
}

#[tokio::test]
async fn flush_all_writes_every_pending_key() {
    let storage = Arc::new(MemoryStorage::new());
    let local = local(&storage);

    local.debounced_write("a", &1);
    local.debounced_write("b", &2);
    local.flush_all();

    assert_eq!(storage.len(), 2);
    assert_eq!(storage.get("b").unwrap().as_deref(), Some("2"));
    assert!(!local.has_pending("a"));
}

#[test]
fn memory_storage_enforces_capacity() {
    let storage = MemoryStorage::with_capacity(10);
    storage.set("k", "12345").unwrap();
    // Replacing a key only counts the new value.
    storage.set("k", "123456789").unwrap();

    let err = storage.set("other", "1234").unwrap_err();
    assert!(matches!(err, StorageError::QuotaExceeded { ref key, .. } if key == "other"));
    assert_eq!(storage.len(), 1);
}

#[test]
fn file_storage_round_trips_through_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("local.json");

    let storage = FileStorage::new(&path);
    assert_eq!(storage.get("missing").unwrap(), None);

    storage.set("project:1:snapshot", r#"{"floors":[]}"#).unwrap();
    storage.set("project:1:draft:floor", "\"L2\"").unwrap();
    storage.remove("project:1:draft:floor").unwrap();

    let reopened = FileStorage::new(&path);
    assert_eq!(
        reopened.get("project:1:snapshot").unwrap().as_deref(),
        Some(r#"{"floors":[]}"#)
    );
    assert_eq!(reopened.get("project:1:draft:floor").unwrap(), None);
}

#[test]
fn corrupt_file_surfaces_as_error_but_safe_read_recovers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("local.json");
    std::fs::write(&path, "this is not json").unwrap();

    let storage = Arc::new(FileStorage::new(&path));
    assert!(matches!(storage.get("k"), Err(StorageError::Serialization(_))));

    let local = LocalPersistence::new(storage, LocalPersistenceConfig::default());
    assert_eq!(local.safe_read("k", 5u8), 5);
}
