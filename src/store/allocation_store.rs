use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{AllocationError, AllocationResult, KeyedLocks, Liveness};
use crate::allocation::{AllocationKey, AllocationTable, UnitAllocation};
use crate::catalog::UnitTypeId;
use crate::floor::FloorId;
use crate::remote::{Filter, ProjectId, RecordId, RemoteStore, Table, record_id};
use crate::transform::{self, TransformError};

/// Terminal effect of one [`AllocationStore::update_unit_allocation`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum AllocationChange {
    Inserted(UnitAllocation),
    Updated(UnitAllocation),
    Deleted { key: AllocationKey, id: RecordId },
    /// Zero requested for a pair with no record; nothing was sent.
    Unchanged { key: AllocationKey },
}

#[derive(Debug, Default)]
pub struct SaveAllReport {
    pub applied: Vec<AllocationChange>,
    pub failures: Vec<(AllocationKey, AllocationError)>,
}

impl SaveAllReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Authoritative in-memory (floor, unit type) -> quantity table mirrored to the remote store.
///
/// Local state changes only after the matching remote call succeeds. Writes to the
/// same key are serialized, so the last call wins.
pub struct AllocationStore {
    project_id: ProjectId,
    remote: Arc<dyn RemoteStore>,
    table: RwLock<AllocationTable>,
    locks: KeyedLocks<AllocationKey>,
    liveness: Liveness,
}

impl AllocationStore {
    pub fn new(
        project_id: ProjectId,
        remote: Arc<dyn RemoteStore>,
        table: AllocationTable,
        liveness: Liveness,
    ) -> Self {
        Self {
            project_id,
            remote,
            table: RwLock::new(table),
            locks: KeyedLocks::new(),
            liveness,
        }
    }

    pub async fn load(
        project_id: ProjectId,
        remote: Arc<dyn RemoteStore>,
        liveness: Liveness,
    ) -> AllocationResult<Self> {
        let records = remote
            .select(Table::UnitAllocations, &Filter::eq("project_id", project_id))
            .await?;
        let allocations = transform::collect(&records, transform::unit_allocation_from_record)?;
        debug!(project_id, count = allocations.len(), "loaded unit allocations");
        Ok(Self::new(
            project_id,
            remote,
            AllocationTable::from_allocations(allocations),
            liveness,
        ))
    }

    /// Cached quantity for the pair; zero when absent. Never touches the network.
    pub fn get_unit_allocation(&self, floor_id: FloorId, unit_type_id: UnitTypeId) -> u32 {
        self.table.read().quantity(floor_id, unit_type_id)
    }

    pub fn snapshot(&self) -> AllocationTable {
        self.table.read().clone()
    }

    pub fn allocations(&self) -> Vec<UnitAllocation> {
        self.table.read().allocations()
    }

    /// Brings the pair to `quantity` with exactly one remote call (none when
    /// zero is requested for an absent pair). Zero deletes the record.
    pub async fn update_unit_allocation(
        &self,
        floor_id: FloorId,
        unit_type_id: UnitTypeId,
        quantity: u32,
    ) -> AllocationResult<AllocationChange> {
        let key = AllocationKey::new(floor_id, unit_type_id);
        let _guard = self.locks.lock(key).await;
        if !self.liveness.is_alive() {
            return Err(AllocationError::Closed);
        }

        let existing = self.table.read().get(&key).cloned();
        let result = match (existing, quantity) {
            (None, 0) => Ok(AllocationChange::Unchanged { key }),
            (Some(existing), 0) => self.delete_remote(key, existing.id).await,
            (None, quantity) => self.insert_remote(key, quantity).await,
            (Some(existing), quantity) => self.update_remote(existing, quantity).await,
        };

        match &result {
            Ok(change) => debug!(floor_id, unit_type_id, quantity, ?change, "unit allocation saved"),
            Err(err) => warn!(floor_id, unit_type_id, quantity, "unit allocation save failed: {err}"),
        }
        result
    }

    async fn delete_remote(
        &self,
        key: AllocationKey,
        id: RecordId,
    ) -> AllocationResult<AllocationChange> {
        self.remote.delete(Table::UnitAllocations, id).await?;
        self.apply(|table| {
            table.remove(&key);
        });
        Ok(AllocationChange::Deleted { key, id })
    }

    async fn insert_remote(
        &self,
        key: AllocationKey,
        quantity: u32,
    ) -> AllocationResult<AllocationChange> {
        let record = transform::unit_allocation_record(
            self.project_id,
            key.floor_id,
            key.unit_type_id,
            quantity,
        );
        let stored = self.remote.insert(Table::UnitAllocations, record).await?;
        let id = record_id(&stored).ok_or(TransformError::MissingColumn {
            table: Table::UnitAllocations,
            column: "id",
        })?;
        let allocation = UnitAllocation {
            id,
            floor_id: key.floor_id,
            unit_type_id: key.unit_type_id,
            quantity,
        };
        self.apply(|table| table.insert(allocation.clone()));
        Ok(AllocationChange::Inserted(allocation))
    }

    async fn update_remote(
        &self,
        existing: UnitAllocation,
        quantity: u32,
    ) -> AllocationResult<AllocationChange> {
        let patch = transform::unit_allocation_quantity_patch(quantity);
        self.remote
            .update(Table::UnitAllocations, existing.id, patch)
            .await?;
        let key = existing.key();
        self.apply(|table| {
            table.set_quantity(&key, quantity);
        });
        Ok(AllocationChange::Updated(UnitAllocation {
            quantity,
            ..existing
        }))
    }

    fn apply<F>(&self, mutate: F)
    where
        F: FnOnce(&mut AllocationTable),
    {
        if self.liveness.is_alive() {
            mutate(&mut *self.table.write());
        } else {
            debug!(project_id = self.project_id, "store closed; dropping resolved allocation write");
        }
    }

    /// Entries whose desired quantity differs from the cache, in first-seen order.
    /// A key listed more than once takes its last quantity.
    pub fn changed<I>(&self, desired: I) -> Vec<(AllocationKey, u32)>
    where
        I: IntoIterator<Item = (AllocationKey, u32)>,
    {
        let mut latest: Vec<(AllocationKey, u32)> = Vec::new();
        for (key, quantity) in desired {
            match latest.iter_mut().find(|(seen, _)| *seen == key) {
                Some(entry) => entry.1 = quantity,
                None => latest.push((key, quantity)),
            }
        }
        let table = self.table.read();
        latest
            .into_iter()
            .filter(|(key, quantity)| table.quantity(key.floor_id, key.unit_type_id) != *quantity)
            .collect()
    }

    /// Writes every changed entry concurrently. Failures are collected, successes kept.
    pub async fn save_all<I>(&self, desired: I) -> SaveAllReport
    where
        I: IntoIterator<Item = (AllocationKey, u32)>,
    {
        let changes = self.changed(desired);
        let writes = changes.iter().map(|(key, quantity)| async move {
            let result = self
                .update_unit_allocation(key.floor_id, key.unit_type_id, *quantity)
                .await;
            (*key, result)
        });

        let mut report = SaveAllReport::default();
        for (key, result) in join_all(writes).await {
            match result {
                Ok(change) => report.applied.push(change),
                Err(err) => report.failures.push((key, err)),
            }
        }
        if !report.is_complete() {
            warn!(
                project_id = self.project_id,
                failed = report.failures.len(),
                applied = report.applied.len(),
                "bulk allocation save partially failed"
            );
        }
        report
    }

    /// Deletes every allocation on the floor, stopping at the first failure.
    pub async fn remove_floor(&self, floor_id: FloorId) -> AllocationResult<usize> {
        let keys: Vec<AllocationKey> = self
            .table
            .read()
            .for_floor(floor_id)
            .iter()
            .map(UnitAllocation::key)
            .collect();
        self.remove_keys(keys).await
    }

    pub async fn remove_unit_type(&self, unit_type_id: UnitTypeId) -> AllocationResult<usize> {
        let keys: Vec<AllocationKey> = self
            .table
            .read()
            .for_unit_type(unit_type_id)
            .iter()
            .map(UnitAllocation::key)
            .collect();
        self.remove_keys(keys).await
    }

    async fn remove_keys(&self, keys: Vec<AllocationKey>) -> AllocationResult<usize> {
        let mut removed = 0;
        for key in keys {
            if let AllocationChange::Deleted { .. } = self
                .update_unit_allocation(key.floor_id, key.unit_type_id, 0)
                .await?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
