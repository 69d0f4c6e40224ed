use thiserror::Error;

use crate::command::EventKind;
use crate::store::StoreError;
use crate::types::{CommandName, RowId, TableName};

/// Errors raised while populating the command or reducer registries.
///
/// These are start-up failures: a registry that reports one of them should
/// never be frozen and served.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistrationError {
    /// A command with this name is already registered.
    #[error("command {0} is already registered")]
    DuplicateCommand(CommandName),

    /// A reducer for this (table, event) pair is already registered.
    #[error("a reducer for event {event} on table {table} is already registered")]
    DuplicateReducer {
        /// Table the reducer belongs to
        table: TableName,
        /// Event name the reducer answers to
        event: String,
    },

    /// A name handed to a registry is not a valid identifier.
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),

    /// A command was built without its validate or plan step.
    #[error("command {0} has no planning step")]
    MissingPlanner(CommandName),
}

/// Errors raised while a command plans its events.
///
/// Planning failures abort the dispatch; the dispatcher rolls the
/// transaction back and returns them as [`DispatchError::Planning`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommandError {
    /// Input failed validation.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// A business rule rejected the command.
    #[error("business rule violated: {0}")]
    BusinessRuleViolation(String),

    /// Input could not be converted to or from its JSON form.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Neither the command nor its input names a table.
    #[error("command {0} has no fixed table and its input carries no `table` field")]
    MissingTable(CommandName),

    /// The input's `table` field is not a valid table name.
    #[error("invalid table `{0}` in command input")]
    InvalidTable(String),

    /// A store read made during validation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by a reducer while applying an event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReducerError {
    /// The payload did not deserialize into the reducer's payload type.
    #[error("payload of event {event} does not fit its reducer: {detail}")]
    Payload {
        /// Event name
        event: String,
        /// Deserialization failure
        detail: String,
    },

    /// The reducer output did not serialize into a row object.
    #[error("reducer for event {event} did not produce a row: {detail}")]
    Output {
        /// Event name
        event: String,
        /// Serialization failure
        detail: String,
    },
}

/// Why a dispatch was rolled back.
///
/// Every variant is returned only after the transaction was rolled back;
/// nothing the dispatch wrote is visible.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The command's validate or plan step failed.
    #[error("planning failed: {0}")]
    Planning(#[from] CommandError),

    /// A row reference or event named a table the schema does not declare.
    #[error("table {0} is not declared in the schema")]
    UnknownTable(TableName),

    /// An insert did not yield a usable row id.
    #[error("insert into {0} returned no row id")]
    MissingRowId(TableName),

    /// A modification targeted a row the mutator did not name.
    #[error("update target {table}/{row_id} is not part of the locked set")]
    UpdateTargetNotLocked {
        /// Target table
        table: TableName,
        /// Target row
        row_id: RowId,
    },

    /// A reducer rejected the event.
    #[error(transparent)]
    Reducer(#[from] ReducerError),

    /// An event's kind does not match its reducer's kind. Only raised when
    /// the dispatcher runs with strict reducer kinds.
    #[error("event {event} on table {table} is a {event_kind} but its reducer is a {reducer_kind}")]
    KindMismatch {
        /// Event name
        event: CommandName,
        /// Event table
        table: TableName,
        /// Kind of the planned event
        event_kind: EventKind,
        /// Kind of the registered reducer
        reducer_kind: EventKind,
    },
}

/// Errors raised while rebuilding a row from its event log.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReconstructError {
    /// The table is not part of the schema.
    #[error("unknown table {0}")]
    UnknownTable(TableName),

    /// The row has no event-log entries.
    #[error("row {table}/{row_id} not found in the event log")]
    NotFound {
        /// Table
        table: TableName,
        /// Row
        row_id: RowId,
    },

    /// The first logged event does not resolve to a creator.
    #[error("first event {event} of row {table}/{row_id} is not a creation")]
    NotACreation {
        /// Table
        table: TableName,
        /// Row
        row_id: RowId,
        /// Name of the offending first event
        event: CommandName,
    },

    /// A logged payload is not a JSON object.
    #[error("payload of logged event {0} is not an object")]
    MalformedPayload(CommandName),

    /// A reducer rejected a logged event.
    #[error(transparent)]
    Reducer(#[from] ReducerError),

    /// The store failed while reading the log.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type of command planning.
pub type CommandResult<T> = Result<T, CommandError>;
