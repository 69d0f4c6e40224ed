//! Start-up registration invariants.

mod common;

use common::{create_item_command, increment_item_command, CreateItem, Tx};
use eventtable::{Command, CommandRegistry, ReducerRegistry, RegistrationError, Row};

#[test]
fn second_command_with_the_same_name_is_refused() {
    // Given: create_item is registered
    let mut registry = CommandRegistry::new();
    registry.register(create_item_command()).expect("first registration");

    // When: another command claims the name
    let impostor = Command::<CreateItem, Tx>::create("create_item")
        .table("archive")
        .validate(|_tx, _input, _locked| Box::pin(async { Ok(()) }))
        .build()
        .expect("valid command");
    let result = registry.register(impostor);

    // Then: it is refused and the original stays registered
    assert!(matches!(
        result,
        Err(RegistrationError::DuplicateCommand(name)) if name.as_str() == "create_item"
    ));
    let commands = registry.freeze();
    assert_eq!(commands.len(), 1);
}

#[test]
fn second_reducer_for_the_same_pair_is_refused() {
    // Given: a creator for (items, create_item)
    let mut builder = ReducerRegistry::builder();
    builder.table("items").creator(&create_item_command(), |row: Row| row);

    // When: another creator claims the same pair
    builder.table("items").creator("create_item", |row: Row| row);

    // Then: the registry does not build
    assert!(matches!(
        builder.build(),
        Err(RegistrationError::DuplicateReducer { event, .. }) if event == "create_item"
    ));
}

#[test]
fn reducers_can_be_keyed_by_command() {
    let create = create_item_command();
    let increment = increment_item_command();
    let mut builder = ReducerRegistry::builder();
    builder
        .table("items")
        .creator(&create, |row: Row| row)
        .updater(&increment, |_: &Row, patch: Row| patch);

    let reducers = builder.build().expect("distinct pairs");

    assert_eq!(reducers.len(), 2);
}

#[test]
fn invalid_table_name_is_refused() {
    let mut builder = ReducerRegistry::builder();
    builder.table("Items").creator("create_item", |row: Row| row);

    assert_eq!(
        builder.build().map(|reducers| reducers.len()),
        Err(RegistrationError::InvalidIdentifier("Items".to_string()))
    );
}
