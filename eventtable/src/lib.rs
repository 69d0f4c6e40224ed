//! Event-sourced command dispatch over a declared relational schema.
//!
//! Client code declares tables, commands and reducers; the engine compiles the
//! schema into parameterized statements, runs each command in one atomic
//! transaction with row-level locks, applies the planned events through their
//! reducers, and appends every applied event to a per-row ordered event log.
//!
//! # Overview
//!
//! - Schema: [`Schema`], [`ColumnType`], [`CompiledSchema`], [`CompiledTable`]
//! - Commands: [`Command`], [`CommandRegistry`], [`Registered`], [`Commands`],
//!   [`Dispatchable`], [`Event`], [`Emit`], [`Mutations`], [`LockedRows`]
//! - Reducers: [`ReducerRegistry`], [`Reducer`]
//! - Execution: [`Dispatcher`], [`Committed`], [`reduce_row`]
//! - Storage: [`Store`], [`Transaction`], [`EventLogEntry`], [`InMemoryStore`]
//! - Errors: [`SchemaError`], [`RegistrationError`], [`CommandError`],
//!   [`ReducerError`], [`StoreError`], [`DispatchError`], [`ReconstructError`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod command;
mod dispatcher;
mod errors;
mod memory;
mod reconstruct;
mod reducer;
mod schema;
mod store;
mod types;
mod validation;

pub use command::{
    Command, CommandBuilder, CommandKind, Commands, CommandRegistry, CreateKind, Creation,
    Dispatchable, Emit, Event, EventDescriptor, EventKind, GenericKind, JsonDispatchable,
    LockedRow, LockedRows, Modification, ModifyKind, Mutations, Registered, RowRef, TABLE_FIELD,
};
pub use dispatcher::{Committed, Dispatcher, KindAnomaly};
pub use errors::{
    CommandError, CommandResult, DispatchError, ReconstructError, ReducerError,
    RegistrationError,
};
pub use memory::{InMemoryStore, InMemoryTransaction};
pub use reconstruct::reduce_row;
pub use reducer::{Reducer, ReducerRegistry, ReducerRegistryBuilder, TableReducers};
pub use schema::{
    ColumnDef, ColumnType, CompiledSchema, CompiledTable, Schema, SchemaBuilder, SchemaError,
    TableBuilder, TableDef, EVENT_LOG_INSERT, EVENT_LOG_SELECT, EVENT_LOG_TABLE, ID_COLUMN,
};
pub use store::{EventLogEntry, Operation, Store, StoreError, Transaction};
pub use types::{ActorId, ColumnName, CommandName, Row, RowId, TableName};
