//! Declarative table schema and its compilation into statement templates.
//!
//! A [`Schema`] maps table names to an ordered list of typed columns. It is
//! compiled once, at start-up, into a [`CompiledSchema`]: for every table the
//! column order plus three parameterized statements:
//!
//! - **lock**: select every column of one row by id, `FOR UPDATE`
//! - **insert**: all columns in declaration order, `RETURNING` the new id
//! - **update**: every column set to `COALESCE(new, existing)`, id last
//!
//! Column order fixes positional-parameter order and never changes for the
//! lifetime of the compiled schema. Compilation is pure; nothing here touches
//! a database.
//!
//! The reserved `events` table holds the event log. Its shape is fixed and it
//! cannot be declared through the builder.
//!
//! # Example
//!
//! ```
//! use eventtable::{ColumnType, Schema};
//!
//! let schema = Schema::builder()
//!     .table("items", |t| {
//!         t.column("id", ColumnType::Uuid)
//!             .column("name", ColumnType::Text)
//!             .column("value", ColumnType::Integer)
//!     })
//!     .build()
//!     .expect("valid schema");
//!
//! let compiled = schema.compile();
//! let items = compiled.table_named("items").expect("items is compiled");
//! assert_eq!(items.column_names(), vec!["id", "name", "value"]);
//! ```

use std::collections::HashMap;
use std::fmt::Write;

use serde_json::Value;
use thiserror::Error;

use crate::types::{ColumnName, Row, RowId, TableName};

/// Name of the reserved event-log table.
pub const EVENT_LOG_TABLE: &str = "events";

/// Append statement for the event log.
///
/// Takes exactly six ordered values: event name, table name, row id, actor id,
/// JSON payload, timestamp.
pub const EVENT_LOG_INSERT: &str = r#"INSERT INTO "events" ("name", "table_name", "row_id", "actor_id", "data", "created_at") VALUES ($1, $2, $3, $4, $5, $6)"#;

/// Read statement for one row's event log, in strict append order.
///
/// Ordering is by the log's sequence column, never by timestamp, so entries
/// sharing a timestamp still replay in the order they were appended.
pub const EVENT_LOG_SELECT: &str = r#"SELECT "name", "table_name", "row_id", "actor_id", "data", "created_at" FROM "events" WHERE "table_name" = $1 AND "row_id" = $2 ORDER BY "seq" ASC"#;

/// Column every declared table must carry; statements are keyed by it.
pub const ID_COLUMN: &str = "id";

/// Semantic type tag of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// `boolean`
    Boolean,
    /// 16-bit integer, `smallint`
    SmallInt,
    /// 32-bit integer, `integer`
    Integer,
    /// 64-bit integer, `bigint`
    BigInt,
    /// `uuid`
    Uuid,
    /// `text`
    Text,
    /// `json`
    Json,
    /// `jsonb`
    Jsonb,
    /// Timestamp with time zone, `timestamptz`
    Timestamp,
    /// `json[]`
    JsonArray,
    /// `jsonb[]`
    JsonbArray,
}

impl ColumnType {
    /// SQL type used to cast this column's statement parameters.
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::SmallInt => "smallint",
            Self::Integer => "integer",
            Self::BigInt => "bigint",
            Self::Uuid => "uuid",
            Self::Text => "text",
            Self::Json => "json",
            Self::Jsonb => "jsonb",
            Self::Timestamp => "timestamptz",
            Self::JsonArray => "json[]",
            Self::JsonbArray => "jsonb[]",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sql_type())
    }
}

/// Errors raised while declaring a schema.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// The name is not a plain lower-case SQL identifier.
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),

    /// The reserved event-log table cannot be declared.
    #[error("table name `events` is reserved for the event log")]
    ReservedTable,

    /// A table was declared twice.
    #[error("table {0} declared more than once")]
    DuplicateTable(TableName),

    /// A column was declared twice within one table.
    #[error("column {column} declared more than once in table {table}")]
    DuplicateColumn {
        /// Table containing the duplicate
        table: TableName,
        /// The duplicated column
        column: ColumnName,
    },

    /// A table declared no columns at all.
    #[error("table {0} declares no columns")]
    NoColumns(TableName),

    /// A table has no `id` column to key its statements by.
    #[error("table {0} has no `id` column")]
    MissingIdColumn(TableName),
}

/// A column declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name
    pub name: ColumnName,
    /// Column type
    pub ty: ColumnType,
}

/// A table declaration: its name and ordered columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    name: TableName,
    columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Table name.
    pub fn name(&self) -> &TableName {
        &self.name
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }
}

/// Declarative schema: table name to ordered, typed columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    tables: Vec<TableDef>,
}

impl Schema {
    /// Start declaring a schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Declared tables, in declaration order.
    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    /// Compile the schema into statement templates.
    pub fn compile(&self) -> CompiledSchema {
        CompiledSchema::compile(self)
    }
}

/// Fluent schema builder.
///
/// Methods always return `Self` for clean chaining. Errors are accumulated
/// internally and the first one is returned from [`build()`](Self::build).
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    tables: Vec<TableDef>,
    errors: Vec<SchemaError>,
}

impl SchemaBuilder {
    /// Declare a table and its columns.
    pub fn table(mut self, name: &str, columns: impl FnOnce(TableBuilder) -> TableBuilder) -> Self {
        if name == EVENT_LOG_TABLE {
            self.errors.push(SchemaError::ReservedTable);
            return self;
        }

        let Ok(table) = TableName::try_new(name) else {
            self.errors
                .push(SchemaError::InvalidIdentifier(name.to_string()));
            return self;
        };

        if self.tables.iter().any(|existing| existing.name == table) {
            self.errors.push(SchemaError::DuplicateTable(table));
            return self;
        }

        let built = columns(TableBuilder {
            table: table.clone(),
            columns: Vec::new(),
            errors: Vec::new(),
        });
        self.errors.extend(built.errors);

        if built.columns.is_empty() {
            self.errors.push(SchemaError::NoColumns(table));
            return self;
        }

        if !built
            .columns
            .iter()
            .any(|column| column.name.as_ref() == ID_COLUMN)
        {
            self.errors.push(SchemaError::MissingIdColumn(table));
            return self;
        }

        self.tables.push(TableDef {
            name: table,
            columns: built.columns,
        });
        self
    }

    /// Finish the declaration.
    pub fn build(self) -> Result<Schema, SchemaError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(Schema {
                tables: self.tables,
            }),
        }
    }
}

/// Builder for one table's columns.
#[derive(Debug)]
pub struct TableBuilder {
    table: TableName,
    columns: Vec<ColumnDef>,
    errors: Vec<SchemaError>,
}

impl TableBuilder {
    /// Append a column. Declaration order is significant.
    pub fn column(mut self, name: &str, ty: ColumnType) -> Self {
        let Ok(column) = ColumnName::try_new(name) else {
            self.errors
                .push(SchemaError::InvalidIdentifier(name.to_string()));
            return self;
        };

        if self.columns.iter().any(|existing| existing.name == column) {
            self.errors.push(SchemaError::DuplicateColumn {
                table: self.table.clone(),
                column,
            });
            return self;
        }

        self.columns.push(ColumnDef { name: column, ty });
        self
    }
}

/// One table compiled into its column order and statement templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTable {
    name: TableName,
    columns: Vec<ColumnDef>,
    id_type: ColumnType,
    lock_statement: String,
    insert_statement: String,
    update_statement: String,
}

impl CompiledTable {
    fn compile(table: &TableDef) -> Self {
        let id_type = table
            .columns
            .iter()
            .find(|column| column.name.as_ref() == ID_COLUMN)
            .map_or(ColumnType::Text, |column| column.ty);

        Self {
            name: table.name.clone(),
            columns: table.columns.clone(),
            id_type,
            lock_statement: lock_statement(table, id_type),
            insert_statement: insert_statement(table),
            update_statement: update_statement(table, id_type),
        }
    }

    /// Table name.
    pub fn name(&self) -> &TableName {
        &self.name
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Type of the `id` column.
    pub fn id_type(&self) -> ColumnType {
        self.id_type
    }

    /// Lock-and-select statement; `$1` is the row id.
    pub fn lock_statement(&self) -> &str {
        &self.lock_statement
    }

    /// Insert statement; one parameter per column, returns the new id as text.
    pub fn insert_statement(&self) -> &str {
        &self.insert_statement
    }

    /// Partial update statement; one parameter per column, then the row id.
    pub fn update_statement(&self) -> &str {
        &self.update_statement
    }

    /// Project a row onto column order. Fields the row lacks become `null`;
    /// fields that are not columns are dropped.
    pub fn project(&self, row: &Row) -> Vec<Value> {
        self.columns
            .iter()
            .map(|column| row.get(column.name.as_ref()).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Restrict a row to this table's columns, as [`project`](Self::project)
    /// does, but keyed by column name.
    pub fn shape(&self, row: &Row) -> Row {
        self.columns
            .iter()
            .map(|column| {
                let value = row.get(column.name.as_ref()).cloned().unwrap_or(Value::Null);
                (column.name.to_string(), value)
            })
            .collect()
    }

    /// A row id as the JSON value the `id` column holds. Integer ids become
    /// numbers; an id that does not parse stays a string.
    pub fn id_value(&self, row_id: &RowId) -> Value {
        match self.id_type {
            ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt => row_id
                .as_str()
                .parse::<i64>()
                .map_or_else(|_| Value::String(row_id.to_string()), Value::from),
            _ => Value::String(row_id.to_string()),
        }
    }
}

fn quoted(identifier: &str) -> String {
    format!("\"{identifier}\"")
}

fn lock_statement(table: &TableDef, id_type: ColumnType) -> String {
    let select_list = table
        .columns
        .iter()
        .map(|column| {
            let name = quoted(column.name.as_ref());
            format!("to_jsonb({name}) AS {name}")
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "SELECT {select_list} FROM {} WHERE {} = $1::{id_type} FOR UPDATE",
        quoted(table.name.as_ref()),
        quoted(ID_COLUMN),
    )
}

fn insert_statement(table: &TableDef) -> String {
    let mut columns = String::new();
    let mut placeholders = String::new();
    for (index, column) in table.columns.iter().enumerate() {
        if index > 0 {
            columns.push_str(", ");
            placeholders.push_str(", ");
        }
        columns.push_str(&quoted(column.name.as_ref()));
        let _ = write!(placeholders, "${}::{}", index + 1, column.ty);
    }

    format!(
        "INSERT INTO {} ({columns}) VALUES ({placeholders}) RETURNING {}::text AS {}",
        quoted(table.name.as_ref()),
        quoted(ID_COLUMN),
        quoted(ID_COLUMN),
    )
}

fn update_statement(table: &TableDef, id_type: ColumnType) -> String {
    let assignments = table
        .columns
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let name = quoted(column.name.as_ref());
            format!("{name} = COALESCE(${}::{}, {name})", index + 1, column.ty)
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "UPDATE {} SET {assignments} WHERE {} = ${}::{id_type}",
        quoted(table.name.as_ref()),
        quoted(ID_COLUMN),
        table.columns.len() + 1,
    )
}

/// Every declared table compiled once; immutable and shareable afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledSchema {
    tables: HashMap<TableName, CompiledTable>,
}

impl CompiledSchema {
    /// Compile every table of the schema.
    pub fn compile(schema: &Schema) -> Self {
        let tables = schema
            .tables
            .iter()
            .map(|table| (table.name.clone(), CompiledTable::compile(table)))
            .collect();
        Self { tables }
    }

    /// Look up a compiled table.
    pub fn table(&self, name: &TableName) -> Option<&CompiledTable> {
        self.tables.get(name)
    }

    /// Look up a compiled table by raw name.
    pub fn table_named(&self, name: &str) -> Option<&CompiledTable> {
        TableName::try_new(name)
            .ok()
            .and_then(|name| self.tables.get(&name))
    }

    /// All compiled tables, in no particular order.
    pub fn tables(&self) -> impl Iterator<Item = &CompiledTable> {
        self.tables.values()
    }
}
