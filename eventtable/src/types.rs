//! Validated identifiers shared by every layer of the engine.
//!
//! All identifiers are `nutype` newtypes: if an instance exists it is valid.
//! Table and column names are additionally restricted to plain SQL
//! identifiers because they are interpolated into generated statements.

use crate::validation::{has_no_whitespace, is_sql_identifier};
use nutype::nutype;
use serde_json::{Map, Value};

/// A row as the engine sees it: field name to JSON value.
///
/// Rows locked before planning, reducer outputs and event payloads all share
/// this representation. Column order is not carried here; it comes from the
/// compiled table when values are bound to a statement.
pub type Row = Map<String, Value>;

/// Name of a table declared in the schema.
#[nutype(
    validate(not_empty, len_char_max = 63, predicate = is_sql_identifier),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        TryFrom,
        Serialize,
        Deserialize
    )
)]
pub struct TableName(String);

/// Name of a column within a table.
#[nutype(
    validate(not_empty, len_char_max = 63, predicate = is_sql_identifier),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        TryFrom,
        Serialize,
        Deserialize
    )
)]
pub struct ColumnName(String);

/// Globally unique command name.
///
/// The command name doubles as the name of every event the command emits and
/// is therefore the join key into the reducer registry.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255, predicate = has_no_whitespace),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        TryFrom,
        Serialize,
        Deserialize
    )
)]
pub struct CommandName(String);

/// Identifier of a row, in its textual form.
///
/// Ids are carried as text whatever the column type; generated statements cast
/// the parameter back to the `id` column's type.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        TryFrom,
        Serialize,
        Deserialize
    )
)]
pub struct RowId(String);

impl RowId {
    /// Read a row id out of a JSON value.
    ///
    /// Strings are taken as-is and integers are rendered in decimal. Any
    /// other value (including `null`) has no textual id.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::try_new(s.clone()).ok(),
            Value::Number(n) => Self::try_new(n.to_string()).ok(),
            _ => None,
        }
    }
}

/// Opaque identifier of whoever issued a command.
///
/// Attributed to every event-log entry a dispatch produces.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        TryFrom,
        Serialize,
        Deserialize
    )
)]
pub struct ActorId(String);
