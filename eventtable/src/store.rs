use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::CompiledTable;
use crate::types::{ActorId, CommandName, Row, RowId, TableName};

/// One persisted entry of the append-only event log.
///
/// Entries are appended by the dispatcher, one per applied event, and read
/// back in strict append order per `(table, row_id)` for row reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Event name; always the originating command's name.
    pub name: CommandName,
    /// Table the event applied to.
    pub table: TableName,
    /// Row the event created or modified.
    pub row_id: RowId,
    /// Who issued the command.
    pub actor_id: ActorId,
    /// The event payload, without any `table` field.
    pub data: Value,
    /// When the entry was appended.
    pub created_at: DateTime<Utc>,
}

/// Trait defining the contract for store implementations.
///
/// A store hands out transactions for command dispatch and reads the event
/// log for row reconstruction. How a backend achieves atomicity and row
/// locking is hidden behind [`Transaction`].
///
/// Implementations include:
/// - [`InMemoryStore`](crate::InMemoryStore): in-process backend for tests
/// - `eventtable-postgres`: PostgreSQL backend executing the compiled statements
pub trait Store: Send + Sync {
    /// Transaction type handed to commands during dispatch.
    type Transaction: Transaction;

    /// Open a new transaction.
    fn begin(&self) -> impl Future<Output = Result<Self::Transaction, StoreError>> + Send;

    /// Read every event-log entry for one row, oldest first.
    ///
    /// Ordering is strict append order, never timestamp order.
    fn read_event_log(
        &self,
        table: &TableName,
        row_id: &RowId,
    ) -> impl Future<Output = Result<Vec<EventLogEntry>, StoreError>> + Send;
}

/// An open transaction exclusively owned by one dispatch.
///
/// Nothing written through a transaction is visible to others until
/// [`commit`](Self::commit). Dropping a transaction without committing it
/// discards its writes.
pub trait Transaction: Send {
    /// Select one row by id and hold a row-level lock on it until the
    /// transaction ends. Returns `None` when no such row exists.
    fn lock_row(
        &mut self,
        table: &CompiledTable,
        row_id: &RowId,
    ) -> impl Future<Output = Result<Option<Row>, StoreError>> + Send;

    /// Insert one row. `values` follow the table's column order. Returns the
    /// new row's id, or `None` if the backend produced none.
    fn insert_row(
        &mut self,
        table: &CompiledTable,
        values: Vec<Value>,
    ) -> impl Future<Output = Result<Option<RowId>, StoreError>> + Send;

    /// Partially update one row. `values` follow the table's column order;
    /// a `null` leaves that column unchanged.
    fn update_row(
        &mut self,
        table: &CompiledTable,
        row_id: &RowId,
        values: Vec<Value>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Append one entry to the event log.
    fn append_event(
        &mut self,
        entry: EventLogEntry,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Make every write of this transaction durable and release its locks.
    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Discard every write of this transaction and release its locks.
    fn rollback(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Blanket implementation allowing `Store` to work with references.
///
/// This lets a dispatcher borrow a store owned elsewhere.
impl<T: Store> Store for &T {
    type Transaction = T::Transaction;

    async fn begin(&self) -> Result<Self::Transaction, StoreError> {
        (*self).begin().await
    }

    async fn read_event_log(
        &self,
        table: &TableName,
        row_id: &RowId,
    ) -> Result<Vec<EventLogEntry>, StoreError> {
        (*self).read_event_log(table, row_id).await
    }
}

/// Identifies the store operation that failed.
///
/// Used by [`StoreError::StoreFailure`] to provide strongly-typed
/// identification of which operation encountered an infrastructure failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Beginning a transaction.
    BeginTransaction,
    /// Locking and selecting a row.
    LockRow,
    /// Inserting a row.
    InsertRow,
    /// Updating a row.
    UpdateRow,
    /// Appending to the event log.
    AppendEvent,
    /// Reading a row's event log.
    ReadEventLog,
    /// Committing a transaction.
    CommitTransaction,
    /// Rolling a transaction back.
    RollbackTransaction,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::BeginTransaction => write!(f, "begin_transaction"),
            Operation::LockRow => write!(f, "lock_row"),
            Operation::InsertRow => write!(f, "insert_row"),
            Operation::UpdateRow => write!(f, "update_row"),
            Operation::AppendEvent => write!(f, "append_event"),
            Operation::ReadEventLog => write!(f, "read_event_log"),
            Operation::CommitTransaction => write!(f, "commit_transaction"),
            Operation::RollbackTransaction => write!(f, "rollback_transaction"),
        }
    }
}

/// Error type returned by store operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Represents infrastructure failures surfaced by the backing store
    /// (connection drops, constraint violations, statement errors).
    #[error("{operation} operation failed: {detail}")]
    StoreFailure {
        /// The failing operation
        operation: Operation,
        /// Backend-specific description
        detail: String,
    },

    /// A value could not be converted to its column's type.
    #[error("invalid value for {table}.{column}: {detail}")]
    InvalidValue {
        /// Table being written
        table: TableName,
        /// Column whose value was rejected
        column: String,
        /// Why the value was rejected
        detail: String,
    },

    /// An event-log entry read back from the store could not be decoded.
    #[error("corrupt event log entry: {0}")]
    CorruptLogEntry(String),
}

impl StoreError {
    /// Shorthand for a [`StoreError::StoreFailure`].
    pub fn failure(operation: Operation, detail: impl Into<String>) -> Self {
        Self::StoreFailure {
            operation,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failure_names_the_operation() {
        let error = StoreError::failure(Operation::LockRow, "connection reset");

        assert_eq!(
            error.to_string(),
            "lock_row operation failed: connection reset"
        );
    }

    #[test]
    fn invalid_value_names_table_and_column() {
        let error = StoreError::InvalidValue {
            table: TableName::try_new("items").expect("valid table"),
            column: "value".to_string(),
            detail: "expected integer".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "invalid value for items.value: expected integer"
        );
    }
}
