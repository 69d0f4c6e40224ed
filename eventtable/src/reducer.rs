//! Per-table reducers keyed by event name.
//!
//! A reducer is either a *creator* (payload to full row) or an *updater*
//! (previous row plus payload to partial row). Exactly one reducer may exist
//! per (table, event name) pair. Payload and output types are erased at the
//! registry boundary through serde and restored when the reducer runs.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::command::{EventDescriptor, EventKind};
use crate::errors::{ReducerError, RegistrationError};
use crate::types::{Row, TableName};

type CreatorFn = Box<dyn Fn(&Row) -> Result<Row, ReducerError> + Send + Sync>;
type UpdaterFn = Box<dyn Fn(&Row, &Row) -> Result<Row, ReducerError> + Send + Sync>;

/// A registered reducer with its payload type erased.
pub enum Reducer {
    /// Turns a creation payload into the row to insert.
    Creator(CreatorFn),
    /// Turns the previous row and a modification payload into a partial row.
    Updater(UpdaterFn),
}

impl std::fmt::Debug for Reducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reducer::Creator(_) => f.write_str("Reducer::Creator"),
            Reducer::Updater(_) => f.write_str("Reducer::Updater"),
        }
    }
}

impl Reducer {
    /// Kind of event this reducer handles.
    pub fn kind(&self) -> EventKind {
        match self {
            Reducer::Creator(_) => EventKind::Creation,
            Reducer::Updater(_) => EventKind::Modification,
        }
    }
}

fn decode_payload<P: DeserializeOwned>(event: &str, payload: &Row) -> Result<P, ReducerError> {
    P::deserialize(Value::Object(payload.clone())).map_err(|error| ReducerError::Payload {
        event: event.to_string(),
        detail: error.to_string(),
    })
}

fn encode_output<R: Serialize>(event: &str, output: &R) -> Result<Row, ReducerError> {
    match serde_json::to_value(output) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(other) => Err(ReducerError::Output {
            event: event.to_string(),
            detail: format!("expected a JSON object, got {other}"),
        }),
        Err(error) => Err(ReducerError::Output {
            event: event.to_string(),
            detail: error.to_string(),
        }),
    }
}

/// Merge a partial row into `row`. Nulls in the patch leave the field as is,
/// matching the `COALESCE` update statement.
pub(crate) fn merge_patch(row: &mut Row, patch: Row) {
    for (field, value) in patch {
        if !value.is_null() {
            row.insert(field, value);
        }
    }
}

/// Builder collecting reducers during start-up.
///
/// Registration errors are accumulated; the first one is returned from
/// [`build()`](Self::build).
#[derive(Debug, Default)]
pub struct ReducerRegistryBuilder {
    tables: HashMap<TableName, HashMap<String, Reducer>>,
    errors: Vec<RegistrationError>,
}

impl ReducerRegistryBuilder {
    /// Register reducers for one table.
    pub fn table(&mut self, name: &str) -> TableReducers<'_> {
        let table = TableName::try_new(name).map_err(|_| {
            self.errors
                .push(RegistrationError::InvalidIdentifier(name.to_string()));
        });
        TableReducers {
            builder: self,
            table: table.ok(),
        }
    }

    fn insert(&mut self, table: &TableName, event: &str, reducer: Reducer) {
        let reducers = self.tables.entry(table.clone()).or_default();
        if reducers.contains_key(event) {
            self.errors.push(RegistrationError::DuplicateReducer {
                table: table.clone(),
                event: event.to_string(),
            });
            return;
        }
        reducers.insert(event.to_string(), reducer);
    }

    /// Freeze the registry.
    pub fn build(self) -> Result<ReducerRegistry, RegistrationError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(ReducerRegistry {
                tables: self.tables,
            }),
        }
    }
}

/// Reducer registration for one table.
#[derive(Debug)]
pub struct TableReducers<'a> {
    builder: &'a mut ReducerRegistryBuilder,
    table: Option<TableName>,
}

impl TableReducers<'_> {
    /// Register a creator for `event` on this table.
    ///
    /// The payload is deserialized into `P`; the returned `R` must serialize
    /// into a JSON object.
    pub fn creator<E, P, R, F>(&mut self, event: &E, creator: F) -> &mut Self
    where
        E: EventDescriptor + ?Sized,
        P: DeserializeOwned,
        R: Serialize,
        F: Fn(P) -> R + Send + Sync + 'static,
    {
        let event = event.event_name().to_string();
        let name = event.clone();
        let reducer = Reducer::Creator(Box::new(move |payload| {
            let payload = decode_payload::<P>(&name, payload)?;
            encode_output(&name, &creator(payload))
        }));
        self.register(&event, reducer)
    }

    /// Register an updater for `event` on this table.
    ///
    /// The updater receives the row's latest state and the payload
    /// deserialized into `P`; fields it leaves out of `R` stay unchanged.
    pub fn updater<E, P, R, F>(&mut self, event: &E, updater: F) -> &mut Self
    where
        E: EventDescriptor + ?Sized,
        P: DeserializeOwned,
        R: Serialize,
        F: Fn(&Row, P) -> R + Send + Sync + 'static,
    {
        let event = event.event_name().to_string();
        let name = event.clone();
        let reducer = Reducer::Updater(Box::new(move |previous, payload| {
            let payload = decode_payload::<P>(&name, payload)?;
            encode_output(&name, &updater(previous, payload))
        }));
        self.register(&event, reducer)
    }

    fn register(&mut self, event: &str, reducer: Reducer) -> &mut Self {
        if let Some(table) = &self.table {
            self.builder.insert(table, event, reducer);
        }
        self
    }
}

/// Frozen reducer lookup, shared read-only by every dispatch.
#[derive(Debug, Default)]
pub struct ReducerRegistry {
    tables: HashMap<TableName, HashMap<String, Reducer>>,
}

impl ReducerRegistry {
    /// Start registering reducers.
    pub fn builder() -> ReducerRegistryBuilder {
        ReducerRegistryBuilder::default()
    }

    /// The reducer for `event` on `table`, if any.
    pub fn get(&self, table: &TableName, event: &str) -> Option<&Reducer> {
        self.tables.get(table).and_then(|reducers| reducers.get(event))
    }

    /// Number of registered reducers across all tables.
    pub fn len(&self) -> usize {
        self.tables.values().map(HashMap::len).sum()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
