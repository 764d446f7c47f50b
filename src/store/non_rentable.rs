use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use super::{AllocationError, AllocationResult, KeyedLocks, Liveness};
use crate::catalog::{NonRentableAllocation, NonRentableTypeId};
use crate::floor::FloorId;
use crate::remote::{ProjectId, RecordId, RemoteStore, Table, record_id};
use crate::transform::{self, TransformError};

/// Per-floor non-rentable square footage, mirrored to the remote store.
///
/// Same discipline as the unit allocation store: the cache follows remote success.
pub struct NonRentableStore {
    project_id: ProjectId,
    remote: Arc<dyn RemoteStore>,
    allocations: RwLock<Vec<NonRentableAllocation>>,
    locks: KeyedLocks<(FloorId, NonRentableTypeId)>,
    liveness: Liveness,
}

impl NonRentableStore {
    pub fn new(
        project_id: ProjectId,
        remote: Arc<dyn RemoteStore>,
        allocations: Vec<NonRentableAllocation>,
        liveness: Liveness,
    ) -> Self {
        Self {
            project_id,
            remote,
            allocations: RwLock::new(allocations),
            locks: KeyedLocks::new(),
            liveness,
        }
    }

    pub fn allocations(&self) -> Vec<NonRentableAllocation> {
        self.allocations.read().clone()
    }

    pub fn find(
        &self,
        floor_id: FloorId,
        non_rentable_type_id: NonRentableTypeId,
    ) -> Option<NonRentableAllocation> {
        self.allocations
            .read()
            .iter()
            .find(|a| a.floor_id == floor_id && a.non_rentable_type_id == non_rentable_type_id)
            .cloned()
    }

    async fn insert_locked(
        &self,
        floor_id: FloorId,
        non_rentable_type_id: NonRentableTypeId,
        square_footage: f64,
    ) -> AllocationResult<NonRentableAllocation> {
        self.ensure_alive()?;
        let record = transform::non_rentable_allocation_record(
            self.project_id,
            floor_id,
            non_rentable_type_id,
            square_footage,
        );
        let stored = self
            .remote
            .insert(Table::NonRentableAllocations, record)
            .await?;
        let id = record_id(&stored).ok_or(TransformError::MissingColumn {
            table: Table::NonRentableAllocations,
            column: "id",
        })?;
        let allocation = NonRentableAllocation {
            id,
            floor_id,
            non_rentable_type_id,
            square_footage,
        };
        if self.liveness.is_alive() {
            self.allocations.write().push(allocation.clone());
        }
        debug!(floor_id, non_rentable_type_id, id, "non-rentable allocation inserted");
        Ok(allocation)
    }

    pub async fn update(
        &self,
        id: RecordId,
        square_footage: f64,
    ) -> AllocationResult<NonRentableAllocation> {
        let existing = self
            .allocations
            .read()
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or(AllocationError::UnknownAllocation(id))?;
        let _guard = self
            .locks
            .lock((existing.floor_id, existing.non_rentable_type_id))
            .await;
        self.update_locked(id, square_footage).await
    }

    async fn update_locked(
        &self,
        id: RecordId,
        square_footage: f64,
    ) -> AllocationResult<NonRentableAllocation> {
        self.ensure_alive()?;
        self.remote
            .update(
                Table::NonRentableAllocations,
                id,
                transform::square_footage_patch(square_footage),
            )
            .await?;
        let mut allocations = self.allocations.write();
        let allocation = allocations
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(AllocationError::UnknownAllocation(id))?;
        if self.liveness.is_alive() {
            allocation.square_footage = square_footage;
        }
        Ok(allocation.clone())
    }

    /// Creates or updates the record for the pair.
    ///
    /// The lookup happens under the pair's lock, so a record written by an earlier
    /// caller is updated rather than duplicated.
    pub async fn upsert(
        &self,
        floor_id: FloorId,
        non_rentable_type_id: NonRentableTypeId,
        square_footage: f64,
    ) -> AllocationResult<NonRentableAllocation> {
        let _guard = self.locks.lock((floor_id, non_rentable_type_id)).await;
        match self.find(floor_id, non_rentable_type_id) {
            Some(existing) => self.update_locked(existing.id, square_footage).await,
            None => {
                self.insert_locked(floor_id, non_rentable_type_id, square_footage)
                    .await
            }
        }
    }

    pub async fn remove_floor(&self, floor_id: FloorId) -> AllocationResult<usize> {
        self.remove_where(|a| a.floor_id == floor_id).await
    }

    pub async fn remove_type(&self, non_rentable_type_id: NonRentableTypeId) -> AllocationResult<usize> {
        self.remove_where(|a| a.non_rentable_type_id == non_rentable_type_id)
            .await
    }

    async fn remove_where<F>(&self, predicate: F) -> AllocationResult<usize>
    where
        F: Fn(&NonRentableAllocation) -> bool,
    {
        let doomed: Vec<NonRentableAllocation> = self
            .allocations
            .read()
            .iter()
            .filter(|a| predicate(a))
            .cloned()
            .collect();
        for allocation in &doomed {
            let _guard = self
                .locks
                .lock((allocation.floor_id, allocation.non_rentable_type_id))
                .await;
            self.ensure_alive()?;
            self.remote
                .delete(Table::NonRentableAllocations, allocation.id)
                .await?;
            if self.liveness.is_alive() {
                self.allocations.write().retain(|a| a.id != allocation.id);
            }
        }
        Ok(doomed.len())
    }

    fn ensure_alive(&self) -> AllocationResult<()> {
        if self.liveness.is_alive() {
            Ok(())
        } else {
            Err(AllocationError::Closed)
        }
    }
}
