use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::debug;

use super::{Filter, Record, RecordId, RemoteError, RemoteResult, RemoteStore, Table};

/// Record store persisted in a single SQLite file, one JSON document per row.
pub struct SqliteRemoteStore {
    connection: Mutex<Connection>,
}

impl SqliteRemoteStore {
    pub fn new<P: AsRef<std::path::Path>>(path: P) -> RemoteResult<Self> {
        let connection = Connection::open(path)?;
        Self::initialize_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    pub fn in_memory() -> RemoteResult<Self> {
        let connection = Connection::open_in_memory()?;
        Self::initialize_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn initialize_schema(connection: &Connection) -> RemoteResult<()> {
        let ddl = r#"
            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_name TEXT NOT NULL,
                record_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS records_by_table ON records (table_name);
        "#;
        connection.execute_batch(ddl)?;
        Ok(())
    }

    fn load(connection: &Connection, table: Table, id: RecordId) -> RemoteResult<Record> {
        let json: Option<String> = connection
            .query_row(
                "SELECT record_json FROM records WHERE table_name = ?1 AND id = ?2",
                params![table.as_str(), id],
                |row| row.get(0),
            )
            .optional()?;
        let json = json.ok_or(RemoteError::NotFound { table, id })?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[async_trait]
impl RemoteStore for SqliteRemoteStore {
    async fn select(&self, table: Table, filter: &Filter) -> RemoteResult<Vec<Record>> {
        let conn = self.connection.lock();
        let mut stmt =
            conn.prepare("SELECT record_json FROM records WHERE table_name = ?1 ORDER BY id ASC")?;
        let rows = stmt.query_map(params![table.as_str()], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for json in rows {
            let record: Record = serde_json::from_str(&json?)?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        debug!(%table, count = records.len(), "sqlite select");
        Ok(records)
    }

    async fn insert(&self, table: Table, mut record: Record) -> RemoteResult<Record> {
        let mut conn = self.connection.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO records (table_name, record_json) VALUES (?1, '{}')",
            params![table.as_str()],
        )?;
        let id = tx.last_insert_rowid();
        let now = Value::String(Utc::now().to_rfc3339());
        record.insert("id".to_string(), Value::from(id));
        record.insert("created_at".to_string(), now.clone());
        record.insert("updated_at".to_string(), now);
        tx.execute(
            "UPDATE records SET record_json = ?1 WHERE id = ?2",
            params![serde_json::to_string(&record)?, id],
        )?;
        tx.commit()?;
        debug!(%table, id, "sqlite insert");
        Ok(record)
    }

    async fn update(&self, table: Table, id: RecordId, patch: Record) -> RemoteResult<()> {
        let mut conn = self.connection.lock();
        let tx = conn.transaction()?;
        let mut record = Self::load(&tx, table, id)?;
        for (column, value) in patch {
            if column != "id" {
                record.insert(column, value);
            }
        }
        record.insert(
            "updated_at".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        tx.execute(
            "UPDATE records SET record_json = ?1 WHERE table_name = ?2 AND id = ?3",
            params![serde_json::to_string(&record)?, table.as_str(), id],
        )?;
        tx.commit()?;
        debug!(%table, id, "sqlite update");
        Ok(())
    }

    async fn delete(&self, table: Table, id: RecordId) -> RemoteResult<()> {
        let conn = self.connection.lock();
        let removed = conn.execute(
            "DELETE FROM records WHERE table_name = ?1 AND id = ?2",
            params![table.as_str(), id],
        )?;
        if removed == 0 {
            return Err(RemoteError::NotFound { table, id });
        }
        debug!(%table, id, "sqlite delete");
        Ok(())
    }
}
