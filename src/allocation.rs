use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::catalog::UnitTypeId;
use crate::floor::FloorId;
use crate::remote::RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllocationKey {
    pub floor_id: FloorId,
    pub unit_type_id: UnitTypeId,
}

impl AllocationKey {
    pub fn new(floor_id: FloorId, unit_type_id: UnitTypeId) -> Self {
        Self {
            floor_id,
            unit_type_id,
        }
    }
}

/// A stored (floor, unit type) quantity. Quantities are always positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitAllocation {
    pub id: RecordId,
    pub floor_id: FloorId,
    pub unit_type_id: UnitTypeId,
    pub quantity: u32,
}

impl UnitAllocation {
    pub fn key(&self) -> AllocationKey {
        AllocationKey::new(self.floor_id, self.unit_type_id)
    }
}

/// Sparse (floor, unit type) -> quantity matrix. A missing entry means zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationTable {
    entries: HashMap<AllocationKey, UnitAllocation>,
}

impl AllocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_allocations<I>(allocations: I) -> Self
    where
        I: IntoIterator<Item = UnitAllocation>,
    {
        let mut table = Self::new();
        for allocation in allocations {
            table.insert(allocation);
        }
        table
    }

    pub fn quantity(&self, floor_id: FloorId, unit_type_id: UnitTypeId) -> u32 {
        self.entries
            .get(&AllocationKey::new(floor_id, unit_type_id))
            .map(|allocation| allocation.quantity)
            .unwrap_or(0)
    }

    pub fn get(&self, key: &AllocationKey) -> Option<&UnitAllocation> {
        self.entries.get(key)
    }

    /// Zero-quantity records are dropped so the matrix stays sparse.
    pub fn insert(&mut self, allocation: UnitAllocation) {
        if allocation.quantity == 0 {
            self.entries.remove(&allocation.key());
        } else {
            self.entries.insert(allocation.key(), allocation);
        }
    }

    pub fn set_quantity(&mut self, key: &AllocationKey, quantity: u32) -> bool {
        if quantity == 0 {
            return self.entries.remove(key).is_some();
        }
        match self.entries.get_mut(key) {
            Some(allocation) => {
                allocation.quantity = quantity;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: &AllocationKey) -> Option<UnitAllocation> {
        self.entries.remove(key)
    }

    /// Unit type -> quantity for one floor, ordered by unit type id.
    pub fn row(&self, floor_id: FloorId) -> BTreeMap<UnitTypeId, u32> {
        self.entries
            .values()
            .filter(|allocation| allocation.floor_id == floor_id)
            .map(|allocation| (allocation.unit_type_id, allocation.quantity))
            .collect()
    }

    pub fn for_floor(&self, floor_id: FloorId) -> Vec<UnitAllocation> {
        self.filtered(|allocation| allocation.floor_id == floor_id)
    }

    pub fn for_unit_type(&self, unit_type_id: UnitTypeId) -> Vec<UnitAllocation> {
        self.filtered(|allocation| allocation.unit_type_id == unit_type_id)
    }

    pub fn total_units(&self) -> u64 {
        self.entries
            .values()
            .map(|allocation| u64::from(allocation.quantity))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All records, ordered by (floor, unit type).
    pub fn allocations(&self) -> Vec<UnitAllocation> {
        self.filtered(|_| true)
    }

    fn filtered<F>(&self, predicate: F) -> Vec<UnitAllocation>
    where
        F: Fn(&UnitAllocation) -> bool,
    {
        let mut allocations: Vec<UnitAllocation> = self
            .entries
            .values()
            .filter(|allocation| predicate(allocation))
            .cloned()
            .collect();
        allocations.sort_by_key(UnitAllocation::key);
        allocations
    }
}
