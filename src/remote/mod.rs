use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

pub type RecordId = i64;
pub type ProjectId = RecordId;

/// A row as the record store sees it: a JSON object with an `id` column.
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Projects,
    Floors,
    FloorPlateTemplates,
    Products,
    UnitTypes,
    UnitAllocations,
    NonRentableTypes,
    NonRentableAllocations,
}

impl Table {
    pub const ALL: [Table; 8] = [
        Table::Projects,
        Table::Floors,
        Table::FloorPlateTemplates,
        Table::Products,
        Table::UnitTypes,
        Table::UnitAllocations,
        Table::NonRentableTypes,
        Table::NonRentableAllocations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Projects => "projects",
            Table::Floors => "floors",
            Table::FloorPlateTemplates => "floor_plate_templates",
            Table::Products => "products",
            Table::UnitTypes => "unit_types",
            Table::UnitAllocations => "unit_allocations",
            Table::NonRentableTypes => "non_rentable_types",
            Table::NonRentableAllocations => "non_rentable_allocations",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteOp {
    Select,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteOp::Select => "select",
            RemoteOp::Insert => "insert",
            RemoteOp::Update => "update",
            RemoteOp::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Conjunction of `column = value` conditions. An empty filter matches every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(column, value)
    }

    pub fn and_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.conditions
            .iter()
            .all(|(column, expected)| record.get(column).is_some_and(|v| values_equal(v, expected)))
    }
}

// Numbers compare by value so that `1` and `1.0` match.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{op} on {table} failed: {message}")]
    Transport {
        table: Table,
        op: RemoteOp,
        message: String,
    },
    #[error("{table} record {id} not found")]
    NotFound { table: Table, id: RecordId },
    #[error("constraint violation on {table}: {message}")]
    Constraint { table: Table, message: String },
    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Record-oriented access to the authoritative project store.
///
/// Writes are durable once a call returns `Ok`. Implementations do not retry.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(&self, table: Table, filter: &Filter) -> RemoteResult<Vec<Record>>;

    /// Stores a new record and returns it with its assigned `id`.
    async fn insert(&self, table: Table, record: Record) -> RemoteResult<Record>;

    /// Merges `patch` into the record with the given id.
    async fn update(&self, table: Table, id: RecordId, patch: Record) -> RemoteResult<()>;

    async fn delete(&self, table: Table, id: RecordId) -> RemoteResult<()>;
}

pub fn record_id(record: &Record) -> Option<RecordId> {
    record.get("id").and_then(Value::as_i64)
}

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{MemoryRemoteStore, RemoteCall};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRemoteStore;
