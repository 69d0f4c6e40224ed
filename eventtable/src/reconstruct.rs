//! Row reconstruction from the event log.
//!
//! Replay reads only the event log, never the live table. The first entry
//! must resolve to a creator and seeds the row; every later entry is folded
//! in through its updater with the same null-skipping merge the dispatcher
//! uses. Reducer output is restricted to the table's columns, so a rebuilt
//! row has the shape of the stored one.

use serde_json::Value;
use tracing::{instrument, warn};

use crate::errors::ReconstructError;
use crate::reducer::{merge_patch, Reducer, ReducerRegistry};
use crate::schema::{CompiledTable, ID_COLUMN};
use crate::store::{EventLogEntry, Store};
use crate::types::{Row, RowId};

/// Rebuild one row by folding its event log through the table's reducers.
///
/// Fields that are not columns of `table` are dropped. When the creator's
/// output carries no `id`, the row id is filled in as a value of the `id`
/// column's type.
#[instrument(
    name = "reconstruct.reduce_row",
    skip(store, reducers, compiled),
    fields(table = %compiled.name())
)]
pub async fn reduce_row<S: Store>(
    store: &S,
    reducers: &ReducerRegistry,
    compiled: &CompiledTable,
    row_id: &RowId,
) -> Result<Row, ReconstructError> {
    let table = compiled.name();
    let entries = store.read_event_log(table, row_id).await?;
    let mut entries = entries.iter();

    let Some(first) = entries.next() else {
        return Err(ReconstructError::NotFound {
            table: table.clone(),
            row_id: row_id.clone(),
        });
    };
    let Some(Reducer::Creator(create)) = reducers.get(table, first.name.as_str()) else {
        return Err(ReconstructError::NotACreation {
            table: table.clone(),
            row_id: row_id.clone(),
            event: first.name.clone(),
        });
    };

    let mut row = compiled.shape(&create(payload(first)?)?);
    if row.get(ID_COLUMN).map_or(true, Value::is_null) {
        row.insert(ID_COLUMN.to_string(), compiled.id_value(row_id));
    }

    for entry in entries {
        match reducers.get(table, entry.name.as_str()) {
            Some(Reducer::Updater(update)) => {
                let patch = compiled.shape(&update(&row, payload(entry)?)?);
                merge_patch(&mut row, patch);
            }
            Some(Reducer::Creator(_)) => warn!(
                event = %entry.name,
                "[reconstruct.kind_mismatch] creation logged after the first entry, skipped"
            ),
            None => warn!(
                event = %entry.name,
                "[reconstruct.no_reducer] no reducer registered, entry skipped"
            ),
        }
    }

    Ok(row)
}

fn payload(entry: &EventLogEntry) -> Result<&Row, ReconstructError> {
    entry
        .data
        .as_object()
        .ok_or_else(|| ReconstructError::MalformedPayload(entry.name.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, CompiledSchema, Schema};
    use crate::store::{StoreError, Transaction};
    use crate::types::{ActorId, CommandName, TableName};
    use crate::InMemoryStore;
    use chrono::Utc;
    use serde_json::json;

    fn schema() -> CompiledSchema {
        Schema::builder()
            .table("items", |t| {
                t.column("id", ColumnType::Text)
                    .column("name", ColumnType::Text)
            })
            .table("counters", |t| {
                t.column("id", ColumnType::BigInt)
                    .column("hits", ColumnType::Integer)
            })
            .build()
            .expect("valid schema")
            .compile()
    }

    fn entry_in(table: &str, name: &str, id: &str, data: Value) -> EventLogEntry {
        EventLogEntry {
            name: CommandName::try_new(name).expect("valid name"),
            table: TableName::try_new(table).expect("valid table name"),
            row_id: RowId::try_new(id).expect("valid id"),
            actor_id: ActorId::try_new("tester").expect("valid actor"),
            data,
            created_at: Utc::now(),
        }
    }

    fn entry(name: &str, id: &str, data: Value) -> EventLogEntry {
        entry_in("items", name, id, data)
    }

    async fn store_with(entries: Vec<EventLogEntry>) -> Result<InMemoryStore, StoreError> {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await?;
        for entry in entries {
            tx.append_event(entry).await?;
        }
        tx.commit().await?;
        Ok(store)
    }

    fn reducers() -> ReducerRegistry {
        let mut builder = ReducerRegistry::builder();
        builder
            .table("items")
            .creator("create_item", |payload: Row| payload)
            .updater("rename_item", |_: &Row, payload: Row| payload);
        builder
            .table("counters")
            .creator("create_counter", |payload: Row| payload);
        builder.build().expect("valid registry")
    }

    async fn rebuild(store: &InMemoryStore, table: &str, id: &str) -> Result<Row, ReconstructError> {
        let schema = schema();
        let compiled = schema.table_named(table).expect("table compiled");
        reduce_row(store, &reducers(), compiled, &RowId::try_new(id).expect("id")).await
    }

    #[tokio::test]
    async fn first_entry_must_be_a_creation() {
        let store = store_with(vec![entry("rename_item", "a", json!({"name": "b"}))])
            .await
            .expect("seeded");

        let result = rebuild(&store, "items", "a").await;

        assert!(matches!(
            result,
            Err(ReconstructError::NotACreation { event, .. }) if event.as_str() == "rename_item"
        ));
    }

    #[tokio::test]
    async fn unknown_and_misplaced_entries_are_skipped() {
        let store = store_with(vec![
            entry("create_item", "a", json!({"name": "a"})),
            entry("archive_item", "a", json!({"archived": true})),
            entry("create_item", "a", json!({"name": "again"})),
            entry("rename_item", "a", json!({"name": "b"})),
        ])
        .await
        .expect("seeded");

        let row = rebuild(&store, "items", "a").await.expect("row rebuilt");

        assert_eq!(Value::Object(row), json!({"id": "a", "name": "b"}));
    }

    #[tokio::test]
    async fn fields_outside_the_table_are_dropped() {
        let store = store_with(vec![
            entry("create_item", "a", json!({"name": "a", "colour": "red"})),
            entry("rename_item", "a", json!({"name": "b", "size": 3})),
        ])
        .await
        .expect("seeded");

        let row = rebuild(&store, "items", "a").await.expect("row rebuilt");

        assert_eq!(Value::Object(row), json!({"id": "a", "name": "b"}));
    }

    #[tokio::test]
    async fn integer_row_ids_are_filled_in_as_numbers() {
        let store = store_with(vec![entry_in(
            "counters",
            "create_counter",
            "42",
            json!({"hits": 1}),
        )])
        .await
        .expect("seeded");

        let row = rebuild(&store, "counters", "42").await.expect("row rebuilt");

        assert_eq!(Value::Object(row), json!({"id": 42, "hits": 1}));
    }

    #[tokio::test]
    async fn non_object_payload_is_malformed() {
        let store = store_with(vec![entry("create_item", "a", json!("not an object"))])
            .await
            .expect("seeded");

        let result = rebuild(&store, "items", "a").await;

        assert!(matches!(result, Err(ReconstructError::MalformedPayload(_))));
    }
}
