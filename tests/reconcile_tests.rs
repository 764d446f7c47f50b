use std::sync::Arc;
use std::time::Duration;

use massing_tool::catalog::{AllocationMethod, NonRentableAllocation, NonRentableType};
use massing_tool::floor::{Floor, FloorPlateTemplate, FloorType};
use massing_tool::notify::{NotificationLevel, NotificationLog};
use massing_tool::reconcile::{
    AllocationPatch, NonRentableReconciler, ReconcileInputs, ReconcileReport, plan,
};
use massing_tool::remote::{MemoryRemoteStore, RemoteOp, Table};
use massing_tool::store::{Liveness, NonRentableStore};

fn floor(id: i64, template_id: Option<i64>) -> Floor {
    Floor {
        id,
        label: format!("F{id}"),
        position: id as i32,
        template_id,
        floor_type: FloorType::Aboveground,
    }
}

fn template(id: i64, gross_area: f64) -> FloorPlateTemplate {
    FloorPlateTemplate {
        id,
        name: format!("T{id}"),
        gross_area,
        width: None,
        length: None,
    }
}

fn percentage_type(id: i64, percentage: f64) -> NonRentableType {
    NonRentableType {
        id,
        name: "Core".into(),
        allocation_method: AllocationMethod::Uniform,
        is_percentage_based: true,
        percentage: Some(percentage),
        square_footage: 0.0,
    }
}

fn uniform_type(id: i64, square_footage: f64) -> NonRentableType {
    NonRentableType {
        id,
        name: "Lobby".into(),
        allocation_method: AllocationMethod::Uniform,
        is_percentage_based: false,
        percentage: None,
        square_footage,
    }
}

fn specific_type(id: i64) -> NonRentableType {
    NonRentableType {
        id,
        name: "Storage".into(),
        allocation_method: AllocationMethod::Specific,
        is_percentage_based: false,
        percentage: None,
        square_footage: 500.0,
    }
}

fn existing(id: i64, floor_id: i64, type_id: i64, square_footage: f64) -> NonRentableAllocation {
    NonRentableAllocation {
        id,
        floor_id,
        non_rentable_type_id: type_id,
        square_footage,
    }
}

#[test]
fn percentage_policy_targets_share_of_gross_area() {
    let floors = [floor(1, Some(10))];
    let templates = [template(10, 2000.0)];
    let types = [percentage_type(5, 10.0)];
    let inputs = ReconcileInputs {
        floors: &floors,
        templates: &templates,
        types: &types,
        allocations: &[],
    };

    let patches = plan(&inputs, 0.01);
    assert_eq!(
        patches,
        vec![AllocationPatch::Insert {
            floor_id: 1,
            non_rentable_type_id: 5,
            square_footage: 200.0,
        }]
    );
}

#[test]
fn values_within_tolerance_are_left_alone() {
    let floors = [floor(1, Some(10))];
    let templates = [template(10, 2000.0)];
    let types = [percentage_type(5, 10.0)];

    let close = [existing(70, 1, 5, 200.005)];
    let inputs = ReconcileInputs {
        floors: &floors,
        templates: &templates,
        types: &types,
        allocations: &close,
    };
    assert!(plan(&inputs, 0.01).is_empty());

    let drifted = [existing(70, 1, 5, 200.02)];
    let inputs = ReconcileInputs {
        allocations: &drifted,
        ..inputs
    };
    assert_eq!(
        plan(&inputs, 0.01),
        vec![AllocationPatch::Update {
            allocation_id: 70,
            floor_id: 1,
            non_rentable_type_id: 5,
            square_footage: 200.0,
        }]
    );
}

#[test]
fn uniform_policy_splits_total_over_all_floors() {
    let floors = [floor(1, Some(10)), floor(2, None), floor(3, Some(99)), floor(4, Some(10))];
    let templates = [template(10, 1000.0)];
    let types = [uniform_type(6, 1000.0)];
    let inputs = ReconcileInputs {
        floors: &floors,
        templates: &templates,
        types: &types,
        allocations: &[],
    };

    let patches = plan(&inputs, 0.01);
    assert_eq!(patches.len(), 4);
    assert!(patches.iter().all(|p| p.square_footage() == 250.0));
}

#[test]
fn uniform_policy_with_no_floors_plans_nothing() {
    let types = [uniform_type(6, 1000.0)];
    let inputs = ReconcileInputs {
        floors: &[],
        templates: &[],
        types: &types,
        allocations: &[],
    };
    assert!(plan(&inputs, 0.01).is_empty());
}

#[test]
fn floors_with_unresolved_template_are_skipped_for_percentage_types() {
    let floors = [floor(1, Some(10)), floor(2, Some(404)), floor(3, None)];
    let templates = [template(10, 1000.0)];
    let types = [percentage_type(5, 5.0)];
    let inputs = ReconcileInputs {
        floors: &floors,
        templates: &templates,
        types: &types,
        allocations: &[],
    };

    let patches = plan(&inputs, 0.01);
    let floor_ids: Vec<i64> = patches.iter().map(AllocationPatch::floor_id).collect();
    assert_eq!(floor_ids, vec![1]);
    assert_eq!(patches[0].square_footage(), 50.0);
}

#[test]
fn specific_types_are_never_touched() {
    let floors = [floor(1, Some(10))];
    let templates = [template(10, 1000.0)];
    let types = [specific_type(8)];
    let allocations = [existing(80, 1, 8, 12.0)];
    let inputs = ReconcileInputs {
        floors: &floors,
        templates: &templates,
        types: &types,
        allocations: &allocations,
    };
    assert!(plan(&inputs, 0.01).is_empty());
}

#[test]
fn percentage_type_without_percentage_is_manual() {
    let floors = [floor(1, Some(10))];
    let templates = [template(10, 1000.0)];
    let mut kind = percentage_type(5, 0.0);
    kind.percentage = None;
    let types = [kind];
    let inputs = ReconcileInputs {
        floors: &floors,
        templates: &templates,
        types: &types,
        allocations: &[],
    };
    assert!(plan(&inputs, 0.01).is_empty());
}

fn store(remote: &Arc<MemoryRemoteStore>, allocations: Vec<NonRentableAllocation>) -> NonRentableStore {
    NonRentableStore::new(1, remote.clone(), allocations, Liveness::new())
}

#[tokio::test]
async fn second_pass_after_convergence_writes_nothing() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let store = store(&remote, Vec::new());
    let log = NotificationLog::new();
    let reconciler = NonRentableReconciler::default();

    let floors = [floor(1, Some(10))];
    let templates = [template(10, 2000.0)];
    let types = [percentage_type(5, 10.0)];

    let first = {
        let allocations = store.allocations();
        let inputs = ReconcileInputs {
            floors: &floors,
            templates: &templates,
            types: &types,
            allocations: &allocations,
        };
        reconciler.run(&inputs, &store, &log).await.unwrap()
    };
    assert_eq!(first.planned, 1);
    assert_eq!(first.touched.len(), 1);
    assert_eq!(store.find(1, 5).unwrap().square_footage, 200.0);
    assert_eq!(log.count(NotificationLevel::Success), 1);

    remote.clear_calls();
    let allocations = store.allocations();
    let inputs = ReconcileInputs {
        floors: &floors,
        templates: &templates,
        types: &types,
        allocations: &allocations,
    };
    let second = reconciler.run(&inputs, &store, &log).await.unwrap();
    assert_eq!(second.planned, 0);
    assert_eq!(remote.write_count(Table::NonRentableAllocations), 0);
    assert_eq!(log.count(NotificationLevel::Success), 1);
}

#[tokio::test]
async fn partial_failures_still_report_one_success() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let store = store(&remote, Vec::new());
    let log = NotificationLog::new();
    let reconciler = NonRentableReconciler::default();

    let floors = [floor(1, Some(10)), floor(2, Some(10)), floor(3, Some(10))];
    let templates = [template(10, 1000.0)];
    let types = [percentage_type(5, 10.0)];
    let inputs = ReconcileInputs {
        floors: &floors,
        templates: &templates,
        types: &types,
        allocations: &[],
    };

    remote.fail_next(Some(Table::NonRentableAllocations), Some(RemoteOp::Insert));
    let report = reconciler.run(&inputs, &store, &log).await.unwrap();

    assert_eq!(report.planned, 3);
    assert_eq!(report.touched.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].patch.floor_id(), 1);
    assert_eq!(log.count(NotificationLevel::Success), 1);
    assert_eq!(log.count(NotificationLevel::Error), 0);
    assert!(log.snapshot()[0].message.contains('2'));
}

#[tokio::test]
async fn total_failure_reports_one_aggregate_error() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let store = store(&remote, Vec::new());
    let log = NotificationLog::new();
    let reconciler = NonRentableReconciler::default();

    let floors = [floor(1, Some(10)), floor(2, Some(10))];
    let templates = [template(10, 1000.0)];
    let types = [uniform_type(6, 300.0)];
    let inputs = ReconcileInputs {
        floors: &floors,
        templates: &templates,
        types: &types,
        allocations: &[],
    };

    remote.fail_next(Some(Table::NonRentableAllocations), None);
    remote.fail_next(Some(Table::NonRentableAllocations), None);
    let report = reconciler.run(&inputs, &store, &log).await.unwrap();

    assert!(report.touched.is_empty());
    assert_eq!(report.failures.len(), 2);
    assert_eq!(log.count(NotificationLevel::Error), 1);
    assert_eq!(log.count(NotificationLevel::Success), 0);
    assert!(store.allocations().is_empty());
}

#[tokio::test]
async fn nothing_to_do_emits_no_notification() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let store = store(&remote, Vec::new());
    let log = NotificationLog::new();
    let inputs = ReconcileInputs {
        floors: &[],
        templates: &[],
        types: &[],
        allocations: &[],
    };

    let report = NonRentableReconciler::default()
        .run(&inputs, &store, &log)
        .await
        .unwrap();
    assert_eq!(report, ReconcileReport::default());
    assert!(log.snapshot().is_empty());
    assert!(remote.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn overlapping_pass_is_skipped() {
    let remote = Arc::new(MemoryRemoteStore::with_latency(Duration::from_millis(30)));
    let store = store(&remote, Vec::new());
    let log = NotificationLog::new();
    let reconciler = NonRentableReconciler::default();

    let floors = [floor(1, Some(10))];
    let templates = [template(10, 1000.0)];
    let types = [percentage_type(5, 10.0)];
    let inputs = ReconcileInputs {
        floors: &floors,
        templates: &templates,
        types: &types,
        allocations: &[],
    };

    let (first, second) = tokio::join!(reconciler.run(&inputs, &store, &log), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(reconciler.is_running());
        reconciler.run(&inputs, &store, &log).await
    });

    assert!(first.is_some());
    assert!(second.is_none());
    assert!(!reconciler.is_running());
    assert_eq!(store.allocations().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_write_racing_a_pass_keeps_one_record_per_pair() {
    let remote = Arc::new(MemoryRemoteStore::with_latency(Duration::from_millis(30)));
    let store = store(&remote, Vec::new());
    let log = NotificationLog::new();
    let reconciler = NonRentableReconciler::default();

    let floors = [floor(1, Some(10))];
    let templates = [template(10, 1000.0)];
    let types = [percentage_type(5, 10.0)];
    let inputs = ReconcileInputs {
        floors: &floors,
        templates: &templates,
        types: &types,
        allocations: &[],
    };

    let (manual, report) = tokio::join!(
        store.upsert(1, 5, 150.0),
        reconciler.run(&inputs, &store, &log)
    );
    let manual = manual.unwrap();
    let report = report.unwrap();

    assert_eq!(report.touched, vec![manual.id]);
    assert_eq!(store.allocations().len(), 1);
    assert_eq!(store.find(1, 5).unwrap().square_footage, 100.0);
    assert_eq!(remote.records(Table::NonRentableAllocations).len(), 1);
}
