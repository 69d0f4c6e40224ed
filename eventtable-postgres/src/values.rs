//! JSON values to typed statement parameters, and locked rows back to JSON.

use chrono::{DateTime, Utc};
use eventtable::{ColumnDef, ColumnType, CompiledTable, Row, StoreError, TableName};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Postgres, Row as _};
use uuid::Uuid;

pub(crate) type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Bind one column value with the Rust type matching the column's SQL type.
///
/// `null` binds as a typed SQL `NULL`, which the update statement reads as
/// "leave unchanged".
pub(crate) fn bind<'q>(
    query: PgQuery<'q>,
    table: &TableName,
    column: &ColumnDef,
    value: Value,
) -> Result<PgQuery<'q>, StoreError> {
    let bound = match column.ty {
        ColumnType::Boolean => boolean(value).map(|v| query.bind(v)),
        ColumnType::SmallInt => integer::<i16>(value).map(|v| query.bind(v)),
        ColumnType::Integer => integer::<i32>(value).map(|v| query.bind(v)),
        ColumnType::BigInt => integer::<i64>(value).map(|v| query.bind(v)),
        ColumnType::Uuid => uuid(value).map(|v| query.bind(v)),
        ColumnType::Text => text(value).map(|v| query.bind(v)),
        ColumnType::Json | ColumnType::Jsonb => Ok(query.bind(json(value))),
        ColumnType::Timestamp => timestamp(value).map(|v| query.bind(v)),
        ColumnType::JsonArray | ColumnType::JsonbArray => json_array(value).map(|v| query.bind(v)),
    };

    bound.map_err(|detail| StoreError::InvalidValue {
        table: table.clone(),
        column: column.name.to_string(),
        detail,
    })
}

fn boolean(value: Value) -> Result<Option<bool>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(b)),
        other => Err(format!("expected boolean, got {other}")),
    }
}

fn integer<T: TryFrom<i64>>(value: Value) -> Result<Option<T>, String> {
    let wide = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_i64().ok_or_else(|| format!("expected integer, got {n}"))?,
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("expected integer, got {s:?}"))?,
        other => return Err(format!("expected integer, got {other}")),
    };
    T::try_from(wide)
        .map(Some)
        .map_err(|_| format!("integer {wide} out of range for column"))
}

fn uuid(value: Value) -> Result<Option<Uuid>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Uuid::parse_str(&s)
            .map(Some)
            .map_err(|error| format!("invalid uuid {s:?}: {error}")),
        other => Err(format!("expected uuid string, got {other}")),
    }
}

fn text(value: Value) -> Result<Option<String>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Err(format!("expected string, got {other}")),
    }
}

fn json(value: Value) -> Option<Json<Value>> {
    match value {
        Value::Null => None,
        other => Some(Json(other)),
    }
}

fn timestamp(value: Value) -> Result<Option<DateTime<Utc>>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => DateTime::parse_from_rfc3339(&s)
            .map(|parsed| Some(parsed.with_timezone(&Utc)))
            .map_err(|error| format!("invalid RFC 3339 timestamp {s:?}: {error}")),
        other => Err(format!("expected timestamp string, got {other}")),
    }
}

fn json_array(value: Value) -> Result<Option<Vec<Json<Value>>>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Array(items) => Ok(Some(items.into_iter().map(Json).collect())),
        other => Err(format!("expected array, got {other}")),
    }
}

/// Decode a row selected by the lock statement, whose select list renders
/// every column through `to_jsonb`.
pub(crate) fn decode_locked_row(table: &CompiledTable, row: &PgRow) -> Result<Row, sqlx::Error> {
    table
        .columns()
        .iter()
        .map(|column| {
            let value: Option<Json<Value>> = row.try_get(column.name.as_str())?;
            Ok::<_, sqlx::Error>((
                column.name.to_string(),
                value.map_or(Value::Null, |Json(value)| value),
            ))
        })
        .collect()
}
