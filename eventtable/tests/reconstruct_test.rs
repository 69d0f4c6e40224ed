//! Row reconstruction from the event log, checked against live rows.

mod common;

use common::{
    actor, create_item, dispatcher, increment_item, items, seed_item, CreateItem, IncrementItem,
    ITEM_A,
};
use eventtable::{reduce_row, InMemoryStore, ReconstructError, RowId, TableName};
use serde_json::{json, Value};

#[tokio::test]
async fn replay_of_create_and_two_modifies_matches_the_live_row() {
    // Given: an item created with value 1 and incremented twice
    let store = InMemoryStore::new();
    let dispatcher = dispatcher(&store);
    let committed = dispatcher
        .run_command(
            &create_item(),
            CreateItem {
                name: "a".to_string(),
                value: 1,
            },
            &actor(),
        )
        .await
        .expect("create commits");
    let row_id = committed.created_in("items").expect("created").clone();
    for by in [2, 3] {
        dispatcher
            .run_command(
                &increment_item(),
                IncrementItem {
                    id: row_id.to_string(),
                    by,
                },
                &actor(),
            )
            .await
            .expect("increment commits");
    }

    // When: rebuilding it from the log
    let rebuilt = dispatcher
        .reduce_row(&items(), &row_id)
        .await
        .expect("row rebuilt");

    // Then: creator then both updaters, in log order
    assert_eq!(
        Value::Object(rebuilt.clone()),
        json!({"id": row_id.as_str(), "name": "a", "value": 6})
    );
    assert_eq!(store.row(&items(), &row_id), Some(rebuilt));
}

#[tokio::test]
async fn replay_of_a_row_without_entries_is_not_found() {
    let store = InMemoryStore::new();
    seed_item(&store, ITEM_A, 1);
    let dispatcher = dispatcher(&store);
    let row_id = RowId::try_new(ITEM_A).expect("valid row id");

    // A seeded row has no log entries, so it is unknown to replay.
    let table = dispatcher.schema().table(&items()).expect("items compiled");
    let result = reduce_row(dispatcher.store(), dispatcher.reducers(), table, &row_id).await;

    assert!(matches!(
        result,
        Err(ReconstructError::NotFound { row_id: missing, .. }) if missing == row_id
    ));
}

#[tokio::test]
async fn replay_of_a_table_outside_the_schema_is_rejected() {
    let store = InMemoryStore::new();
    let dispatcher = dispatcher(&store);
    let archive = TableName::try_new("archive").expect("valid table name");

    let result = dispatcher
        .reduce_row(&archive, &RowId::try_new(ITEM_A).expect("valid row id"))
        .await;

    assert!(matches!(
        result,
        Err(ReconstructError::UnknownTable(table)) if table == archive
    ));
}

#[tokio::test]
async fn replaying_the_same_modify_twice_yields_the_same_row() {
    // Given: an item with value 5 and an updater that sets a fixed value
    let store = InMemoryStore::new();
    let row_id = seed_item(&store, ITEM_A, 5);
    let command = eventtable::Command::<Value, common::Tx>::modify("set_value")
        .table("items")
        .mutator(|input| {
            let id = input
                .get("id")
                .and_then(RowId::from_value)
                .ok_or_else(|| eventtable::CommandError::InvalidInput("id required".into()))?;
            Ok(eventtable::Mutations::new().lock("item", &items(), id))
        })
        .validate(|_tx, _input, locked| {
            Box::pin(async move {
                locked
                    .get("item")
                    .map(|item| item.id.clone())
                    .ok_or_else(|| eventtable::CommandError::ValidationFailed("missing".into()))
            })
        })
        .build()
        .map(common::register)
        .expect("valid command");
    let mut reducers = eventtable::ReducerRegistry::builder();
    reducers
        .table("items")
        .updater("set_value", |_: &eventtable::Row, patch: eventtable::Row| {
            json!({"value": patch.get("value")})
        });
    let dispatcher = eventtable::Dispatcher::new(
        store.clone(),
        common::schema(),
        reducers.build().expect("valid registry"),
    );
    let input = json!({"id": ITEM_A, "value": 9});

    // When: the same modification is applied twice
    dispatcher
        .run_command(&command, input.clone(), &actor())
        .await
        .expect("first application commits");
    let after_first = store.row(&items(), &row_id);
    dispatcher
        .run_command(&command, input, &actor())
        .await
        .expect("second application commits");

    // Then: the row is unchanged by the repeat, but the log grew by one
    assert_eq!(store.row(&items(), &row_id), after_first);
    assert_eq!(
        after_first.and_then(|row| row.get("value").cloned()),
        Some(json!(9))
    );
    assert_eq!(store.event_log().len(), 2);
}
