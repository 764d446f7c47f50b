use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use super::{Filter, Record, RecordId, RemoteError, RemoteOp, RemoteResult, RemoteStore, Table};

/// One call observed by [`MemoryRemoteStore`], in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub table: Table,
    pub op: RemoteOp,
    pub id: Option<RecordId>,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    table: Option<Table>,
    op: Option<RemoteOp>,
    message: String,
}

impl InjectedFailure {
    fn applies_to(&self, table: Table, op: RemoteOp) -> bool {
        self.table.is_none_or(|t| t == table) && self.op.is_none_or(|o| o == op)
    }
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<Table, BTreeMap<RecordId, Record>>,
    next_id: RecordId,
    calls: Vec<RemoteCall>,
    failures: VecDeque<InjectedFailure>,
}

/// In-process record store used by the binaries' default mode and by tests.
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: Mutex<MemoryState>,
    latency: Option<Duration>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `latency` before touching the data.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            latency: Some(latency),
        }
    }

    /// Makes the next matching call fail with a transport error. `None` matches anything.
    pub fn fail_next(&self, table: Option<Table>, op: Option<RemoteOp>) {
        self.state.lock().failures.push_back(InjectedFailure {
            table,
            op,
            message: "injected failure".to_string(),
        });
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of recorded writes (insert, update, delete) against `table`.
    pub fn write_count(&self, table: Table) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.table == table && call.op != RemoteOp::Select)
            .count()
    }

    /// Snapshot of a table, ordered by id.
    pub fn records(&self, table: Table) -> Vec<Record> {
        self.state
            .lock()
            .tables
            .get(&table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    async fn begin(&self, table: Table, op: RemoteOp, id: Option<RecordId>) -> RemoteResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        state.calls.push(RemoteCall { table, op, id });
        let position = state
            .failures
            .iter()
            .position(|failure| failure.applies_to(table, op));
        if let Some(failure) = position.and_then(|idx| state.failures.remove(idx)) {
            return Err(RemoteError::Transport {
                table,
                op,
                message: failure.message,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn select(&self, table: Table, filter: &Filter) -> RemoteResult<Vec<Record>> {
        self.begin(table, RemoteOp::Select, None).await?;
        let state = self.state.lock();
        Ok(state
            .tables
            .get(&table)
            .map(|rows| {
                rows.values()
                    .filter(|record| filter.matches(record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, table: Table, mut record: Record) -> RemoteResult<Record> {
        self.begin(table, RemoteOp::Insert, None).await?;
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        let now = Value::String(Utc::now().to_rfc3339());
        record.insert("id".to_string(), Value::from(id));
        record.insert("created_at".to_string(), now.clone());
        record.insert("updated_at".to_string(), now);
        state
            .tables
            .entry(table)
            .or_default()
            .insert(id, record.clone());
        Ok(record)
    }

    async fn update(&self, table: Table, id: RecordId, patch: Record) -> RemoteResult<()> {
        self.begin(table, RemoteOp::Update, Some(id)).await?;
        let mut state = self.state.lock();
        let record = state
            .tables
            .get_mut(&table)
            .and_then(|rows| rows.get_mut(&id))
            .ok_or(RemoteError::NotFound { table, id })?;
        for (column, value) in patch {
            if column != "id" {
                record.insert(column, value);
            }
        }
        record.insert(
            "updated_at".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        Ok(())
    }

    async fn delete(&self, table: Table, id: RecordId) -> RemoteResult<()> {
        self.begin(table, RemoteOp::Delete, Some(id)).await?;
        let mut state = self.state.lock();
        state
            .tables
            .get_mut(&table)
            .and_then(|rows| rows.remove(&id))
            .map(|_| ())
            .ok_or(RemoteError::NotFound { table, id })
    }
}
