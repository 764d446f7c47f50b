#![cfg(feature = "sqlite")]

use std::sync::Arc;

use massing_tool::config::{EngineConfig, RuntimeSettings};
use massing_tool::floor::{FloorType, NewFloorPlateTemplate};
use massing_tool::notify::NotificationLog;
use massing_tool::project::Project;
use massing_tool::remote::{Filter, Record, RemoteError, RemoteStore, SqliteRemoteStore, Table, record_id};
use serde_json::{Value, json};
use tempfile::tempdir;

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[tokio::test]
async fn records_survive_reopening_the_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("massing.db");

    let id = {
        let store = SqliteRemoteStore::new(&path).unwrap();
        let stored = store
            .insert(Table::Floors, record(json!({ "project_id": 1, "name": "L1" })))
            .await
            .unwrap();
        assert!(stored.contains_key("created_at"));
        record_id(&stored).unwrap()
    };

    let store = SqliteRemoteStore::new(&path).unwrap();
    let rows = store.select(Table::Floors, &Filter::all()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(record_id(&rows[0]), Some(id));
    assert_eq!(rows[0]["name"], "L1");
}

#[tokio::test]
async fn select_filters_by_table_and_columns() {
    let store = SqliteRemoteStore::in_memory().unwrap();
    for (project_id, name) in [(1, "A"), (1, "B"), (2, "C")] {
        store
            .insert(
                Table::Products,
                record(json!({ "project_id": project_id, "name": name })),
            )
            .await
            .unwrap();
    }
    store
        .insert(Table::Floors, record(json!({ "project_id": 1, "name": "L1" })))
        .await
        .unwrap();

    let products = store
        .select(Table::Products, &Filter::eq("project_id", 1))
        .await
        .unwrap();
    let names: Vec<&str> = products.iter().filter_map(|r| r["name"].as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);

    let one = store
        .select(
            Table::Products,
            &Filter::eq("project_id", 2).and_eq("name", "C"),
        )
        .await
        .unwrap();
    assert_eq!(one.len(), 1);
}

#[tokio::test]
async fn update_merges_and_delete_removes() {
    let store = SqliteRemoteStore::in_memory().unwrap();
    let stored = store
        .insert(
            Table::UnitAllocations,
            record(json!({ "floor_id": 1, "unit_type_id": 2, "quantity": 3 })),
        )
        .await
        .unwrap();
    let id = record_id(&stored).unwrap();

    store
        .update(Table::UnitAllocations, id, record(json!({ "quantity": 9, "id": 777 })))
        .await
        .unwrap();
    let rows = store
        .select(Table::UnitAllocations, &Filter::eq("id", id))
        .await
        .unwrap();
    assert_eq!(rows[0]["quantity"], 9);
    assert_eq!(rows[0]["floor_id"], 1);

    store.delete(Table::UnitAllocations, id).await.unwrap();
    let err = store.delete(Table::UnitAllocations, id).await.unwrap_err();
    assert!(matches!(err, RemoteError::NotFound { id: missing, .. } if missing == id));

    let err = store
        .update(Table::Floors, id, record(json!({ "name": "x" })))
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::NotFound { table: Table::Floors, .. }));
}

#[tokio::test]
async fn project_can_be_reopened_from_disk() {
    let dir = tempdir().unwrap();
    let settings = RuntimeSettings {
        db_path: Some(dir.path().join("tower.db")),
        ..RuntimeSettings::default()
    };

    let log = Arc::new(NotificationLog::new());
    let project = Project::open(&settings, EngineConfig::default(), log.clone())
        .await
        .unwrap();
    let template = project
        .add_template(NewFloorPlateTemplate::new("Typical", 1200.0))
        .await
        .unwrap();
    project
        .add_floor("L1", Some(template.id), FloorType::Aboveground)
        .await
        .unwrap();
    let id = project.id();
    project.close();
    assert!(settings.local_store_path().unwrap().exists());

    let reopened = Project::open(
        &RuntimeSettings {
            project_id: Some(id),
            ..settings.clone()
        },
        EngineConfig::default(),
        log,
    )
    .await
    .unwrap();
    assert_eq!(reopened.floors().len(), 1);
    assert_eq!(reopened.summary().total_building_area, 1200.0);
}
