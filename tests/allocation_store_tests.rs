use std::sync::Arc;
use std::time::Duration;

use massing_tool::allocation::{AllocationKey, AllocationTable, UnitAllocation};
use massing_tool::remote::{MemoryRemoteStore, RemoteOp, Table};
use massing_tool::store::{AllocationChange, AllocationError, AllocationStore, Liveness};

fn new_store(remote: &Arc<MemoryRemoteStore>) -> AllocationStore {
    AllocationStore::new(1, remote.clone(), AllocationTable::new(), Liveness::new())
}

fn quantity_of(remote: &MemoryRemoteStore, floor_id: i64, unit_type_id: i64) -> Option<u64> {
    remote
        .records(Table::UnitAllocations)
        .into_iter()
        .find(|r| r["floor_id"] == floor_id && r["unit_type_id"] == unit_type_id)
        .and_then(|r| r["quantity"].as_u64())
}

#[tokio::test]
async fn setting_quantity_then_zero_keeps_table_sparse() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let store = new_store(&remote);

    let change = store.update_unit_allocation(10, 20, 4).await.unwrap();
    assert!(matches!(change, AllocationChange::Inserted(ref a) if a.quantity == 4));
    assert_eq!(store.get_unit_allocation(10, 20), 4);
    assert_eq!(quantity_of(&remote, 10, 20), Some(4));

    let change = store.update_unit_allocation(10, 20, 0).await.unwrap();
    assert!(matches!(change, AllocationChange::Deleted { .. }));
    assert_eq!(store.get_unit_allocation(10, 20), 0);
    assert!(remote.records(Table::UnitAllocations).is_empty());
    assert!(store.snapshot().is_empty());
}

#[tokio::test]
async fn zero_for_missing_pair_makes_no_remote_call() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let store = new_store(&remote);

    let change = store.update_unit_allocation(10, 20, 0).await.unwrap();
    assert_eq!(
        change,
        AllocationChange::Unchanged {
            key: AllocationKey::new(10, 20)
        }
    );
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn each_update_issues_exactly_one_remote_call() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let store = new_store(&remote);

    store.update_unit_allocation(1, 2, 3).await.unwrap();
    store.update_unit_allocation(1, 2, 6).await.unwrap();
    store.update_unit_allocation(1, 2, 0).await.unwrap();

    let ops: Vec<RemoteOp> = remote.calls().iter().map(|c| c.op).collect();
    assert_eq!(ops, vec![RemoteOp::Insert, RemoteOp::Update, RemoteOp::Delete]);
}

#[tokio::test]
async fn repeated_identical_update_is_idempotent() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let store = new_store(&remote);

    store.update_unit_allocation(5, 7, 5).await.unwrap();
    let once = (store.snapshot(), remote.records(Table::UnitAllocations).len());
    store.update_unit_allocation(5, 7, 5).await.unwrap();
    let twice = (store.snapshot(), remote.records(Table::UnitAllocations).len());

    assert_eq!(once, twice);
    assert_eq!(store.get_unit_allocation(5, 7), 5);
    assert_eq!(quantity_of(&remote, 5, 7), Some(5));
}

#[tokio::test]
async fn remote_failure_leaves_cache_untouched() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let store = new_store(&remote);
    store.update_unit_allocation(1, 1, 2).await.unwrap();

    remote.fail_next(Some(Table::UnitAllocations), Some(RemoteOp::Update));
    let err = store.update_unit_allocation(1, 1, 9).await.unwrap_err();
    assert!(matches!(err, AllocationError::Remote(_)));
    assert_eq!(store.get_unit_allocation(1, 1), 2);
    assert_eq!(quantity_of(&remote, 1, 1), Some(2));

    remote.fail_next(Some(Table::UnitAllocations), Some(RemoteOp::Insert));
    assert!(store.update_unit_allocation(1, 2, 4).await.is_err());
    assert_eq!(store.get_unit_allocation(1, 2), 0);

    // Retrying after a failure converges on the requested state.
    store.update_unit_allocation(1, 1, 9).await.unwrap();
    assert_eq!(store.get_unit_allocation(1, 1), 9);
}

#[tokio::test(start_paused = true)]
async fn concurrent_writes_to_same_key_apply_in_call_order() {
    let remote = Arc::new(MemoryRemoteStore::with_latency(Duration::from_millis(25)));
    let store = new_store(&remote);

    let (first, second) = tokio::join!(
        store.update_unit_allocation(3, 4, 3),
        store.update_unit_allocation(3, 4, 7),
    );
    assert!(matches!(first.unwrap(), AllocationChange::Inserted(_)));
    assert!(matches!(second.unwrap(), AllocationChange::Updated(_)));

    assert_eq!(store.get_unit_allocation(3, 4), 7);
    assert_eq!(quantity_of(&remote, 3, 4), Some(7));
    assert_eq!(remote.records(Table::UnitAllocations).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn results_resolving_after_close_are_discarded() {
    let remote = Arc::new(MemoryRemoteStore::with_latency(Duration::from_millis(20)));
    let liveness = Liveness::new();
    let store = AllocationStore::new(1, remote.clone(), AllocationTable::new(), liveness.clone());

    let (result, _) = tokio::join!(store.update_unit_allocation(1, 1, 5), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        liveness.shut_down();
    });

    assert!(result.is_ok());
    assert_eq!(store.get_unit_allocation(1, 1), 0);
    assert_eq!(remote.records(Table::UnitAllocations).len(), 1);

    let err = store.update_unit_allocation(1, 1, 6).await.unwrap_err();
    assert!(matches!(err, AllocationError::Closed));
}

#[tokio::test]
async fn save_all_keeps_successes_and_reports_failures() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let store = new_store(&remote);

    remote.fail_next(Some(Table::UnitAllocations), Some(RemoteOp::Insert));
    let report = store
        .save_all(vec![
            (AllocationKey::new(1, 100), 2),
            (AllocationKey::new(1, 101), 3),
            (AllocationKey::new(2, 100), 4),
        ])
        .await;

    assert!(!report.is_complete());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, AllocationKey::new(1, 100));
    assert_eq!(report.applied.len(), 2);

    assert_eq!(store.get_unit_allocation(1, 100), 0);
    assert_eq!(store.get_unit_allocation(1, 101), 3);
    assert_eq!(store.get_unit_allocation(2, 100), 4);
}

#[tokio::test]
async fn save_all_skips_unchanged_and_takes_last_duplicate() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let store = AllocationStore::new(
        1,
        remote.clone(),
        AllocationTable::from_allocations(vec![UnitAllocation {
            id: 900,
            floor_id: 1,
            unit_type_id: 1,
            quantity: 2,
        }]),
        Liveness::new(),
    );

    let key = AllocationKey::new(1, 2);
    let report = store
        .save_all(vec![(AllocationKey::new(1, 1), 2), (key, 3), (key, 8)])
        .await;

    assert!(report.is_complete());
    assert_eq!(report.applied.len(), 1);
    assert_eq!(remote.write_count(Table::UnitAllocations), 1);
    assert_eq!(store.get_unit_allocation(1, 2), 8);
}

#[tokio::test]
async fn removing_a_floor_deletes_only_its_allocations() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let store = new_store(&remote);
    store.update_unit_allocation(10, 1, 1).await.unwrap();
    store.update_unit_allocation(10, 2, 2).await.unwrap();
    store.update_unit_allocation(11, 1, 3).await.unwrap();

    assert_eq!(store.remove_floor(10).await.unwrap(), 2);
    assert_eq!(store.allocations().len(), 1);
    assert_eq!(store.get_unit_allocation(11, 1), 3);

    assert_eq!(store.remove_unit_type(1).await.unwrap(), 1);
    assert!(remote.records(Table::UnitAllocations).is_empty());
}

#[tokio::test]
async fn load_reads_existing_allocations_for_project() {
    let remote = Arc::new(MemoryRemoteStore::new());
    {
        let store = new_store(&remote);
        store.update_unit_allocation(1, 2, 6).await.unwrap();
    }
    let other = AllocationStore::new(2, remote.clone(), AllocationTable::new(), Liveness::new());
    other.update_unit_allocation(1, 2, 9).await.unwrap();

    let reloaded = AllocationStore::load(1, remote.clone(), Liveness::new())
        .await
        .unwrap();
    assert_eq!(reloaded.get_unit_allocation(1, 2), 6);
    assert_eq!(reloaded.allocations().len(), 1);
}
