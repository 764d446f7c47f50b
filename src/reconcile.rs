//! Keeps policy-driven non-rentable allocations in line with their type.
//!
//! [`plan`] is pure: it compares the stored allocations against the targets implied
//! by every non-specific [`NonRentableType`] and returns the writes needed.
//! [`NonRentableReconciler`] applies such a plan against a [`NonRentableStore`],
//! guarding against overlapping passes.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use crate::catalog::{NonRentableAllocation, NonRentablePolicy, NonRentableType, NonRentableTypeId};
use crate::floor::{Floor, FloorId, FloorPlateTemplate, resolve_template};
use crate::notify::NotificationSink;
use crate::remote::RecordId;
use crate::store::NonRentableStore;

pub const DEFAULT_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AllocationPatch {
    Insert {
        floor_id: FloorId,
        non_rentable_type_id: NonRentableTypeId,
        square_footage: f64,
    },
    Update {
        allocation_id: RecordId,
        floor_id: FloorId,
        non_rentable_type_id: NonRentableTypeId,
        square_footage: f64,
    },
}

impl AllocationPatch {
    pub fn floor_id(&self) -> FloorId {
        match self {
            AllocationPatch::Insert { floor_id, .. } | AllocationPatch::Update { floor_id, .. } => {
                *floor_id
            }
        }
    }

    pub fn square_footage(&self) -> f64 {
        match self {
            AllocationPatch::Insert { square_footage, .. }
            | AllocationPatch::Update { square_footage, .. } => *square_footage,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcileInputs<'a> {
    pub floors: &'a [Floor],
    pub templates: &'a [FloorPlateTemplate],
    pub types: &'a [NonRentableType],
    pub allocations: &'a [NonRentableAllocation],
}

/// Target square footage of `kind` on each floor. Floors without a target are omitted.
fn targets(kind: &NonRentableType, inputs: &ReconcileInputs<'_>) -> Vec<(FloorId, f64)> {
    match kind.policy() {
        NonRentablePolicy::Manual => Vec::new(),
        NonRentablePolicy::Percentage(percentage) => inputs
            .floors
            .iter()
            .filter_map(|floor| {
                resolve_template(floor, inputs.templates)
                    .map(|template| (floor.id, template.gross_area * percentage / 100.0))
            })
            .collect(),
        NonRentablePolicy::Uniform(total) => {
            if inputs.floors.is_empty() {
                return Vec::new();
            }
            let share = total / inputs.floors.len() as f64;
            inputs.floors.iter().map(|floor| (floor.id, share)).collect()
        }
    }
}

/// Writes needed to bring stored allocations within `tolerance` of their targets.
///
/// Allocations already within tolerance produce no patch.
pub fn plan(inputs: &ReconcileInputs<'_>, tolerance: f64) -> Vec<AllocationPatch> {
    let mut patches = Vec::new();
    for kind in inputs.types {
        for (floor_id, target) in targets(kind, inputs) {
            let existing = inputs
                .allocations
                .iter()
                .find(|a| a.floor_id == floor_id && a.non_rentable_type_id == kind.id);
            match existing {
                Some(existing) if (existing.square_footage - target).abs() > tolerance => {
                    patches.push(AllocationPatch::Update {
                        allocation_id: existing.id,
                        floor_id,
                        non_rentable_type_id: kind.id,
                        square_footage: target,
                    });
                }
                Some(_) => {}
                None => patches.push(AllocationPatch::Insert {
                    floor_id,
                    non_rentable_type_id: kind.id,
                    square_footage: target,
                }),
            }
        }
    }
    patches
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchFailure {
    pub patch: AllocationPatch,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub planned: usize,
    /// Allocation ids written in this pass, for "recently updated" highlighting.
    pub touched: Vec<RecordId>,
    pub failures: Vec<PatchFailure>,
}

/// Applies reconciliation plans; at most one pass runs at a time.
pub struct NonRentableReconciler {
    in_progress: AtomicBool,
    tolerance: f64,
}

struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl NonRentableReconciler {
    pub fn new(tolerance: f64) -> Self {
        Self {
            in_progress: AtomicBool::new(false),
            tolerance,
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    fn begin(&self) -> Option<PassGuard<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassGuard(&self.in_progress))
    }

    /// Runs one pass. Returns `None` without doing anything if a pass is already running.
    ///
    /// Individual write failures are logged and skipped. One success notification is
    /// emitted when anything was written; one error notification when every write failed.
    pub async fn run(
        &self,
        inputs: &ReconcileInputs<'_>,
        store: &NonRentableStore,
        notifications: &dyn NotificationSink,
    ) -> Option<ReconcileReport> {
        let _guard = self.begin()?;
        let patches = plan(inputs, self.tolerance);
        let mut report = ReconcileReport {
            planned: patches.len(),
            ..Default::default()
        };

        for patch in patches {
            let result = match &patch {
                AllocationPatch::Insert {
                    floor_id,
                    non_rentable_type_id,
                    square_footage,
                } => {
                    store
                        .upsert(*floor_id, *non_rentable_type_id, *square_footage)
                        .await
                }
                AllocationPatch::Update {
                    allocation_id,
                    square_footage,
                    ..
                } => store.update(*allocation_id, *square_footage).await,
            };
            match result {
                Ok(allocation) => report.touched.push(allocation.id),
                Err(err) => {
                    warn!(
                        floor_id = patch.floor_id(),
                        ?patch,
                        "non-rentable reconciliation write failed: {err}"
                    );
                    report.failures.push(PatchFailure {
                        patch,
                        error: err.to_string(),
                    });
                }
            }
        }

        if !report.touched.is_empty() {
            notifications.success(format!(
                "Updated {} non-rentable allocation(s)",
                report.touched.len()
            ));
        } else if !report.failures.is_empty() {
            notifications.error(format!(
                "Failed to update non-rentable allocations ({} error(s))",
                report.failures.len()
            ));
        }
        if report.planned > 0 {
            info!(
                planned = report.planned,
                touched = report.touched.len(),
                failed = report.failures.len(),
                "non-rentable reconciliation pass finished"
            );
        }
        Some(report)
    }
}

impl Default for NonRentableReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}
