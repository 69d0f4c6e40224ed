//! Shared fixture: an `items` table with create and increment commands.

#![allow(dead_code)]

use eventtable::{
    ActorId, ColumnType, Command, CommandError, CommandRegistry, CompiledSchema, Dispatcher,
    InMemoryStore, InMemoryTransaction, Mutations, ReducerRegistry, Registered, Row, RowId,
    Schema, TableName,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub type Tx = InMemoryTransaction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateItem {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementItem {
    pub id: String,
    pub by: i64,
}

pub fn items() -> TableName {
    TableName::try_new("items").expect("valid table name")
}

pub fn actor() -> ActorId {
    ActorId::try_new("user-1").expect("valid actor id")
}

pub fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

pub fn schema() -> CompiledSchema {
    Schema::builder()
        .table("items", |t| {
            t.column("id", ColumnType::Uuid)
                .column("name", ColumnType::Text)
                .column("value", ColumnType::Integer)
        })
        .build()
        .expect("items schema is valid")
        .compile()
}

/// Register `command` on its own, for tests that need just one dispatchable command.
pub fn register<I>(command: Command<I, Tx>) -> Registered<I, Tx>
where
    I: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    CommandRegistry::new()
        .register(command)
        .expect("a fresh registry accepts any name")
}

pub fn create_item() -> Registered<CreateItem, Tx> {
    register(create_item_command())
}

pub fn increment_item() -> Registered<IncrementItem, Tx> {
    register(increment_item_command())
}

pub fn create_item_command() -> Command<CreateItem, Tx> {
    Command::<CreateItem, Tx>::create("create_item")
        .table("items")
        .validate(|_tx, input, _locked| {
            Box::pin(async move {
                if input.name.is_empty() {
                    return Err(CommandError::ValidationFailed("name must not be empty".into()));
                }
                Ok(())
            })
        })
        .build()
        .expect("create_item is valid")
}

pub fn increment_item_command() -> Command<IncrementItem, Tx> {
    Command::<IncrementItem, Tx>::modify("increment_item")
        .table("items")
        .mutator(|input| {
            let id = RowId::try_new(input.id.clone())
                .map_err(|error| CommandError::InvalidInput(error.to_string()))?;
            Ok(Mutations::new().lock("item", &items(), id))
        })
        .validate(|_tx, _input, locked| {
            Box::pin(async move {
                locked
                    .get("item")
                    .map(|item| item.id.clone())
                    .ok_or_else(|| CommandError::ValidationFailed("item does not exist".into()))
            })
        })
        .build()
        .expect("increment_item is valid")
}

pub fn reducers() -> ReducerRegistry {
    let mut builder = ReducerRegistry::builder();
    builder
        .table("items")
        .creator("create_item", |item: CreateItem| item)
        .updater("increment_item", |previous: &Row, increment: IncrementItem| {
            let value = previous.get("value").and_then(Value::as_i64).unwrap_or(0);
            json!({ "value": value + increment.by })
        });
    builder.build().expect("reducers are unique")
}

pub fn dispatcher(store: &InMemoryStore) -> Dispatcher<InMemoryStore> {
    Dispatcher::new(store.clone(), schema(), reducers())
}

/// Seed an item directly, outside any command.
pub fn seed_item(store: &InMemoryStore, id: &str, value: i64) -> RowId {
    store
        .seed_row(&items(), row(json!({"id": id, "name": "seeded", "value": value})))
        .expect("seeded row has an id")
}

pub const ITEM_A: &str = "0191e0f4-7c4e-7000-8000-00000000000a";
pub const ITEM_B: &str = "0191e0f4-7c4e-7000-8000-00000000000b";
