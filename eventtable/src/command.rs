//! Commands: named intents that lock rows and plan events.
//!
//! A command has a globally unique name, a *mutator* naming every row it
//! needs locked, and a planning step producing [`Event`]s. Three kinds exist:
//!
//! - **create**: `validate`, then one [`Event::Creation`] whose payload is the
//!   input with its `table` field moved onto the event
//! - **modify**: `validate` resolves the target row id, then one
//!   [`Event::Modification`] for that row
//! - **generic**: `plan` emits any number of events across tables
//!
//! Events are stamped with the command's name, which is the join key into the
//! reducer registry. They can only be constructed here.
//!
//! # Example
//!
//! ```
//! use eventtable::{Command, CommandRegistry, InMemoryTransaction, Mutations};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct CreateItem {
//!     name: String,
//! }
//!
//! let create_item = Command::<CreateItem, InMemoryTransaction>::create("create_item")
//!     .table("items")
//!     .mutator(|_input| Ok(Mutations::new()))
//!     .validate(|_tx, input, _locked| {
//!         Box::pin(async move {
//!             if input.name.is_empty() {
//!                 return Err(eventtable::CommandError::ValidationFailed("name is empty".into()));
//!             }
//!             Ok(())
//!         })
//!     })
//!     .build()
//!     .expect("valid command");
//!
//! let mut registry = CommandRegistry::new();
//! registry.register(create_item).expect("first registration");
//! let commands = registry.freeze();
//! assert!(commands.contains("create_item"));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::errors::{CommandError, CommandResult, RegistrationError};
use crate::types::{CommandName, Row, RowId, TableName};

/// Input field that names the target table of a create or modify command.
pub const TABLE_FIELD: &str = "table";

/// Whether an event or reducer creates a row or modifies one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Row creation
    Creation,
    /// Partial update of an existing row
    Modification,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Creation => write!(f, "creation"),
            EventKind::Modification => write!(f, "modification"),
        }
    }
}

/// A planned row creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Creation {
    name: CommandName,
    table: TableName,
    payload: Row,
}

impl Creation {
    /// Event name (the originating command's name).
    pub fn name(&self) -> &CommandName {
        &self.name
    }

    /// Table to insert into.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Payload handed to the creator.
    pub fn payload(&self) -> &Row {
        &self.payload
    }
}

/// A planned partial update of one existing row.
#[derive(Debug, Clone, PartialEq)]
pub struct Modification {
    name: CommandName,
    table: TableName,
    row_id: RowId,
    payload: Row,
}

impl Modification {
    /// Event name (the originating command's name).
    pub fn name(&self) -> &CommandName {
        &self.name
    }

    /// Table of the target row.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Target row.
    pub fn row_id(&self) -> &RowId {
        &self.row_id
    }

    /// Payload handed to the updater.
    pub fn payload(&self) -> &Row {
        &self.payload
    }
}

/// An event produced by a command's planning step.
///
/// Events are transient: the dispatcher applies them through reducers and
/// logs their payloads. Neither variant can be built outside this crate, so
/// every event in flight was stamped by a registered command.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Create a row
    Creation(Creation),
    /// Modify a row
    Modification(Modification),
}

impl Event {
    /// Event name (the originating command's name).
    pub fn name(&self) -> &CommandName {
        match self {
            Event::Creation(event) => event.name(),
            Event::Modification(event) => event.name(),
        }
    }

    /// Table the event applies to.
    pub fn table(&self) -> &TableName {
        match self {
            Event::Creation(event) => event.table(),
            Event::Modification(event) => event.table(),
        }
    }

    /// Event payload, without any `table` field.
    pub fn payload(&self) -> &Row {
        match self {
            Event::Creation(event) => event.payload(),
            Event::Modification(event) => event.payload(),
        }
    }

    /// Target row of a modification.
    pub fn row_id(&self) -> Option<&RowId> {
        match self {
            Event::Creation(_) => None,
            Event::Modification(event) => Some(event.row_id()),
        }
    }

    /// Creation or modification.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Creation(_) => EventKind::Creation,
            Event::Modification(_) => EventKind::Modification,
        }
    }
}

/// What a generic planner asks for; turned into an [`Event`] by the command.
#[derive(Debug, Clone, PartialEq)]
pub enum Emit {
    /// Create a row in `table`.
    Create {
        /// Target table
        table: TableName,
        /// Creator payload
        payload: Row,
    },
    /// Modify row `row_id` of `table`.
    Modify {
        /// Target table
        table: TableName,
        /// Target row
        row_id: RowId,
        /// Updater payload
        payload: Row,
    },
    /// Explicit no-op; skipped by the dispatcher.
    Skip,
}

impl Emit {
    /// Emit a creation, serializing `payload` into a row.
    pub fn create(table: &TableName, payload: impl Serialize) -> CommandResult<Self> {
        Ok(Self::Create {
            table: table.clone(),
            payload: to_row(&payload)?,
        })
    }

    /// Emit a modification, serializing `payload` into a row.
    pub fn modify(table: &TableName, row_id: &RowId, payload: impl Serialize) -> CommandResult<Self> {
        Ok(Self::Modify {
            table: table.clone(),
            row_id: row_id.clone(),
            payload: to_row(&payload)?,
        })
    }
}

fn to_row(value: &impl Serialize) -> CommandResult<Row> {
    match serde_json::to_value(value) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(other) => Err(CommandError::InvalidInput(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(error) => Err(CommandError::InvalidInput(error.to_string())),
    }
}

/// A row reference: table plus row id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowRef {
    /// Table
    pub table: TableName,
    /// Row id
    pub id: RowId,
}

impl RowRef {
    /// Reference row `id` of `table`.
    pub fn new(table: TableName, id: RowId) -> Self {
        Self { table, id }
    }
}

/// Rows a command needs locked before planning, keyed by logical field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mutations {
    rows: BTreeMap<String, RowRef>,
}

impl Mutations {
    /// No rows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name row `id` of `table` under `field`.
    #[must_use]
    pub fn lock(mut self, field: impl Into<String>, table: &TableName, id: RowId) -> Self {
        self.rows
            .insert(field.into(), RowRef::new(table.clone(), id));
        self
    }

    /// Field name and row reference pairs, ordered by field name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RowRef)> {
        self.rows.iter().map(|(field, row)| (field.as_str(), row))
    }

    /// Number of named fields.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows are named.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A row locked for the duration of a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct LockedRow {
    /// Table
    pub table: TableName,
    /// Row id
    pub id: RowId,
    /// Column values as selected under the lock
    pub row: Row,
}

/// The locked rows handed to validate and plan steps, by mutator field.
///
/// Fields whose row did not exist are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LockedRows {
    rows: BTreeMap<String, LockedRow>,
}

impl LockedRows {
    /// The locked row named by `field`.
    pub fn get(&self, field: &str) -> Option<&LockedRow> {
        self.rows.get(field)
    }

    /// Column values of the locked row named by `field`.
    pub fn row(&self, field: &str) -> Option<&Row> {
        self.rows.get(field).map(|locked| &locked.row)
    }

    /// Whether `field` resolved to an existing row.
    pub fn contains(&self, field: &str) -> bool {
        self.rows.contains_key(field)
    }

    /// Field name and locked row pairs, ordered by field name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LockedRow)> {
        self.rows.iter().map(|(field, row)| (field.as_str(), row))
    }

    /// Number of locked rows that exist.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no named row existed.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn insert(&mut self, field: String, row: LockedRow) {
        self.rows.insert(field, row);
    }
}

/// The uniform contract the dispatcher drives.
///
/// `X` is the store's transaction type; planning steps may read through it
/// within the dispatch's transaction.
///
/// Only handles issued by a [`CommandRegistry`] implement it, so every
/// dispatched command has a registered, unique name.
pub trait Dispatchable<X>: sealed::Sealed + Send + Sync {
    /// Input accepted by the command.
    type Input: Send + Sync;

    /// Command name; also the name of every event it emits.
    fn name(&self) -> &CommandName;

    /// Rows to lock before planning.
    fn mutator(&self, input: &Self::Input) -> CommandResult<Mutations>;

    /// Plan events in application order. `None` entries are no-op markers.
    fn plan<'a>(
        &'a self,
        tx: &'a mut X,
        input: &'a Self::Input,
        locked: &'a LockedRows,
    ) -> BoxFuture<'a, CommandResult<Vec<Option<Event>>>>;
}

mod sealed {
    pub trait Sealed {}
}

/// The three command kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Emits one creation
    Create,
    /// Emits one modification
    Modify,
    /// Emits whatever its plan step returns
    Generic,
}

type MutatorFn<I> = Box<dyn Fn(&I) -> CommandResult<Mutations> + Send + Sync>;

type StepFn<I, X, T> = Box<
    dyn for<'a> Fn(&'a mut X, &'a I, &'a LockedRows) -> BoxFuture<'a, CommandResult<T>>
        + Send
        + Sync,
>;

enum Planner<I, X> {
    Create(StepFn<I, X, ()>),
    Modify(StepFn<I, X, RowId>),
    Generic(StepFn<I, X, Vec<Emit>>),
}

/// A registered command with input type `I` over transactions of type `X`.
pub struct Command<I, X> {
    name: CommandName,
    table: Option<TableName>,
    mutator: MutatorFn<I>,
    planner: Planner<I, X>,
}

impl<I, X> std::fmt::Debug for Command<I, X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

impl<I, X> Command<I, X> {
    /// Start a create command.
    pub fn create(name: &str) -> CommandBuilder<I, X, CreateKind> {
        CommandBuilder::new(name)
    }

    /// Start a modify command.
    pub fn modify(name: &str) -> CommandBuilder<I, X, ModifyKind> {
        CommandBuilder::new(name)
    }

    /// Start a generic command.
    pub fn generic(name: &str) -> CommandBuilder<I, X, GenericKind> {
        CommandBuilder::new(name)
    }

    /// Command name.
    pub fn name(&self) -> &CommandName {
        &self.name
    }

    /// Fixed table, if any.
    pub fn table(&self) -> Option<&TableName> {
        self.table.as_ref()
    }

    /// Command kind.
    pub fn kind(&self) -> CommandKind {
        match self.planner {
            Planner::Create(_) => CommandKind::Create,
            Planner::Modify(_) => CommandKind::Modify,
            Planner::Generic(_) => CommandKind::Generic,
        }
    }
}

impl<I: Serialize, X> Command<I, X> {
    /// Split the input into target table and payload.
    ///
    /// The fixed table wins over an input `table` field; the field is removed
    /// from the payload either way.
    fn split_input(&self, input: &I) -> CommandResult<(TableName, Row)> {
        let mut payload = to_row(input)?;
        let input_table = payload.remove(TABLE_FIELD);

        let table = match (&self.table, input_table) {
            (Some(table), _) => table.clone(),
            (None, Some(Value::String(raw))) => {
                TableName::try_new(raw.clone()).map_err(|_| CommandError::InvalidTable(raw))?
            }
            (None, Some(other)) => return Err(CommandError::InvalidTable(other.to_string())),
            (None, None) => return Err(CommandError::MissingTable(self.name.clone())),
        };
        Ok((table, payload))
    }

    fn stamp(&self, emit: Emit) -> Option<Event> {
        match emit {
            Emit::Create { table, mut payload } => {
                payload.remove(TABLE_FIELD);
                Some(Event::Creation(Creation {
                    name: self.name.clone(),
                    table,
                    payload,
                }))
            }
            Emit::Modify {
                table,
                row_id,
                mut payload,
            } => {
                payload.remove(TABLE_FIELD);
                Some(Event::Modification(Modification {
                    name: self.name.clone(),
                    table,
                    row_id,
                    payload,
                }))
            }
            Emit::Skip => None,
        }
    }
}

impl<I, X> Command<I, X>
where
    I: Serialize + Send + Sync,
    X: Send,
{
    fn mutations(&self, input: &I) -> CommandResult<Mutations> {
        (self.mutator)(input)
    }

    fn plan_events<'a>(
        &'a self,
        tx: &'a mut X,
        input: &'a I,
        locked: &'a LockedRows,
    ) -> BoxFuture<'a, CommandResult<Vec<Option<Event>>>> {
        Box::pin(async move {
            match &self.planner {
                Planner::Create(validate) => {
                    validate(tx, input, locked).await?;
                    let (table, payload) = self.split_input(input)?;
                    Ok(vec![Some(Event::Creation(Creation {
                        name: self.name.clone(),
                        table,
                        payload,
                    }))])
                }
                Planner::Modify(validate) => {
                    let row_id = validate(tx, input, locked).await?;
                    let (table, payload) = self.split_input(input)?;
                    Ok(vec![Some(Event::Modification(Modification {
                        name: self.name.clone(),
                        table,
                        row_id,
                        payload,
                    }))])
                }
                Planner::Generic(plan) => {
                    let emitted = plan(tx, input, locked).await?;
                    Ok(emitted.into_iter().map(|emit| self.stamp(emit)).collect())
                }
            }
        })
    }
}

/// Marker for create-command builders.
#[derive(Debug)]
pub struct CreateKind;

/// Marker for modify-command builders.
#[derive(Debug)]
pub struct ModifyKind;

/// Marker for generic-command builders.
#[derive(Debug)]
pub struct GenericKind;

/// Fluent command builder.
///
/// Invalid names are remembered and reported from [`build()`](Self::build).
pub struct CommandBuilder<I, X, K> {
    name: Result<CommandName, RegistrationError>,
    table: Option<Result<TableName, RegistrationError>>,
    mutator: Option<MutatorFn<I>>,
    planner: Option<Planner<I, X>>,
    _kind: PhantomData<K>,
}

impl<I, X, K> CommandBuilder<I, X, K> {
    fn new(name: &str) -> Self {
        Self {
            name: CommandName::try_new(name)
                .map_err(|_| RegistrationError::InvalidIdentifier(name.to_string())),
            table: None,
            mutator: None,
            planner: None,
            _kind: PhantomData,
        }
    }

    /// Fix the target table. Without one, the input's `table` field decides.
    #[must_use]
    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(
            TableName::try_new(table)
                .map_err(|_| RegistrationError::InvalidIdentifier(table.to_string())),
        );
        self
    }

    /// Name the rows to lock before planning. Defaults to none.
    #[must_use]
    pub fn mutator<F>(mut self, mutator: F) -> Self
    where
        F: Fn(&I) -> CommandResult<Mutations> + Send + Sync + 'static,
    {
        self.mutator = Some(Box::new(mutator));
        self
    }

    /// Finish the command.
    pub fn build(self) -> Result<Command<I, X>, RegistrationError> {
        let name = self.name?;
        let table = self.table.transpose()?;
        let planner = self
            .planner
            .ok_or_else(|| RegistrationError::MissingPlanner(name.clone()))?;
        let mutator = self
            .mutator
            .unwrap_or_else(|| Box::new(|_: &I| Ok(Mutations::new())));

        Ok(Command {
            name,
            table,
            mutator,
            planner,
        })
    }
}

impl<I, X> CommandBuilder<I, X, CreateKind> {
    /// Validation run before the creation event is emitted.
    #[must_use]
    pub fn validate<F>(mut self, validate: F) -> Self
    where
        F: for<'a> Fn(&'a mut X, &'a I, &'a LockedRows) -> BoxFuture<'a, CommandResult<()>>
            + Send
            + Sync
            + 'static,
    {
        self.planner = Some(Planner::Create(Box::new(validate)));
        self
    }
}

impl<I, X> CommandBuilder<I, X, ModifyKind> {
    /// Validation that resolves the target row id.
    #[must_use]
    pub fn validate<F>(mut self, validate: F) -> Self
    where
        F: for<'a> Fn(&'a mut X, &'a I, &'a LockedRows) -> BoxFuture<'a, CommandResult<RowId>>
            + Send
            + Sync
            + 'static,
    {
        self.planner = Some(Planner::Modify(Box::new(validate)));
        self
    }
}

impl<I, X> CommandBuilder<I, X, GenericKind> {
    /// Planning step emitting any number of events.
    #[must_use]
    pub fn plan<F>(mut self, plan: F) -> Self
    where
        F: for<'a> Fn(&'a mut X, &'a I, &'a LockedRows) -> BoxFuture<'a, CommandResult<Vec<Emit>>>
            + Send
            + Sync
            + 'static,
    {
        self.planner = Some(Planner::Generic(Box::new(plan)));
        self
    }
}

/// Something that names an event: a command, a command name, or a string.
pub trait EventDescriptor {
    /// The event name.
    fn event_name(&self) -> &str;
}

impl EventDescriptor for str {
    fn event_name(&self) -> &str {
        self
    }
}

impl EventDescriptor for String {
    fn event_name(&self) -> &str {
        self
    }
}

impl EventDescriptor for CommandName {
    fn event_name(&self) -> &str {
        self.as_str()
    }
}

impl<I, X> EventDescriptor for Command<I, X> {
    fn event_name(&self) -> &str {
        self.name.as_str()
    }
}

impl<T: EventDescriptor + ?Sized> EventDescriptor for Arc<T> {
    fn event_name(&self) -> &str {
        (**self).event_name()
    }
}

/// A registered command, the only form of a command the dispatcher accepts.
///
/// Issued by [`CommandRegistry::register`]. Cloning shares the command.
///
/// ```
/// use eventtable::{ActorId, Command, CommandRegistry, Dispatcher, Emit, InMemoryStore, InMemoryTransaction};
/// use serde_json::{json, Value};
///
/// async fn run(dispatcher: Dispatcher<InMemoryStore>, actor: ActorId) {
///     let command = Command::<Value, InMemoryTransaction>::generic("noop")
///         .plan(|_tx, _input, _locked| Box::pin(async { Ok(vec![Emit::Skip]) }))
///         .build()
///         .expect("valid command");
///     let noop = CommandRegistry::new().register(command).expect("unique name");
///     let _ = dispatcher.run_command(&noop, json!({}), &actor).await;
/// }
/// ```
///
/// A command that was built but never registered does not dispatch:
///
/// ```compile_fail
/// use eventtable::{ActorId, Command, Dispatcher, Emit, InMemoryStore, InMemoryTransaction};
/// use serde_json::{json, Value};
///
/// async fn run(dispatcher: Dispatcher<InMemoryStore>, actor: ActorId) {
///     let command = Command::<Value, InMemoryTransaction>::generic("noop")
///         .plan(|_tx, _input, _locked| Box::pin(async { Ok(vec![Emit::Skip]) }))
///         .build()
///         .expect("valid command");
///     let _ = dispatcher.run_command(&command, json!({}), &actor).await;
/// }
/// ```
pub struct Registered<I, X> {
    command: Arc<Command<I, X>>,
}

impl<I, X> Clone for Registered<I, X> {
    fn clone(&self) -> Self {
        Self {
            command: Arc::clone(&self.command),
        }
    }
}

impl<I, X> std::fmt::Debug for Registered<I, X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Registered").field(&self.command).finish()
    }
}

impl<I, X> std::ops::Deref for Registered<I, X> {
    type Target = Command<I, X>;

    fn deref(&self) -> &Command<I, X> {
        &self.command
    }
}

impl<I, X> EventDescriptor for Registered<I, X> {
    fn event_name(&self) -> &str {
        self.command.name.as_str()
    }
}

impl<I, X> sealed::Sealed for Registered<I, X> {}

impl<I, X> Dispatchable<X> for Registered<I, X>
where
    I: Serialize + Send + Sync,
    X: Send,
{
    type Input = I;

    fn name(&self) -> &CommandName {
        &self.command.name
    }

    fn mutator(&self, input: &I) -> CommandResult<Mutations> {
        self.command.mutations(input)
    }

    fn plan<'a>(
        &'a self,
        tx: &'a mut X,
        input: &'a I,
        locked: &'a LockedRows,
    ) -> BoxFuture<'a, CommandResult<Vec<Option<Event>>>> {
        self.command.plan_events(tx, input, locked)
    }
}

/// A command reachable by name with JSON input.
pub type JsonDispatchable<X> = Arc<dyn Dispatchable<X, Input = Value>>;

struct JsonCommand<I, X> {
    command: Arc<Command<I, X>>,
}

fn decode_input<I: DeserializeOwned>(input: &Value) -> CommandResult<I> {
    I::deserialize(input).map_err(|error| CommandError::InvalidInput(error.to_string()))
}

impl<I, X> sealed::Sealed for JsonCommand<I, X> {}

impl<I, X> Dispatchable<X> for JsonCommand<I, X>
where
    I: Serialize + DeserializeOwned + Send + Sync,
    X: Send,
{
    type Input = Value;

    fn name(&self) -> &CommandName {
        &self.command.name
    }

    fn mutator(&self, input: &Value) -> CommandResult<Mutations> {
        let typed: I = decode_input(input)?;
        self.command.mutations(&typed)
    }

    fn plan<'a>(
        &'a self,
        tx: &'a mut X,
        input: &'a Value,
        locked: &'a LockedRows,
    ) -> BoxFuture<'a, CommandResult<Vec<Option<Event>>>> {
        Box::pin(async move {
            let typed: I = decode_input(input)?;
            self.command.plan_events(tx, &typed, locked).await
        })
    }
}

/// Start-up registry of commands.
///
/// Populate it once, then [`freeze`](Self::freeze) it into a read-only
/// [`Commands`] shared by every dispatch.
pub struct CommandRegistry<X> {
    commands: HashMap<CommandName, JsonDispatchable<X>>,
}

impl<X> Default for CommandRegistry<X> {
    fn default() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }
}

impl<X> std::fmt::Debug for CommandRegistry<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<X: Send + 'static> CommandRegistry<X> {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command and hand back its typed dispatchable form.
    ///
    /// Fails if a command with the same name is already registered.
    pub fn register<I>(&mut self, command: Command<I, X>) -> Result<Registered<I, X>, RegistrationError>
    where
        I: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        if self.commands.contains_key(&command.name) {
            return Err(RegistrationError::DuplicateCommand(command.name));
        }

        let command = Arc::new(command);
        let erased: JsonDispatchable<X> = Arc::new(JsonCommand {
            command: Arc::clone(&command),
        });
        self.commands.insert(command.name.clone(), erased);
        Ok(Registered { command })
    }

    /// End the registration phase.
    pub fn freeze(self) -> Commands<X> {
        Commands {
            commands: self.commands,
        }
    }
}

/// Frozen, read-only command lookup.
pub struct Commands<X> {
    commands: HashMap<CommandName, JsonDispatchable<X>>,
}

impl<X> std::fmt::Debug for Commands<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commands")
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<X> Commands<X> {
    /// Look a command up by name; it takes JSON input.
    pub fn get(&self, name: &str) -> Option<JsonDispatchable<X>> {
        let name = CommandName::try_new(name).ok()?;
        self.commands.get(&name).cloned()
    }

    /// Whether a command of that name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered command names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &CommandName> {
        self.commands.keys()
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
