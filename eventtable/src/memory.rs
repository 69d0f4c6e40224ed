//! In-memory store for tests and development.
//!
//! Mirrors the transactional behavior the dispatcher relies on from a real
//! database: row locks held until the transaction ends, writes invisible to
//! others until commit, `COALESCE` updates, and an append-ordered event log.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use crate::schema::{CompiledTable, ID_COLUMN};
use crate::store::{EventLogEntry, Operation, Store, StoreError, Transaction};
use crate::types::{Row, RowId, TableName};

type RowKey = (TableName, RowId);

#[derive(Default)]
struct Data {
    tables: HashMap<TableName, BTreeMap<RowId, Row>>,
    log: Vec<EventLogEntry>,
}

impl Data {
    fn row(&self, table: &TableName, id: &RowId) -> Option<&Row> {
        self.tables.get(table).and_then(|rows| rows.get(id))
    }
}

#[derive(Default)]
struct Inner {
    data: Mutex<Data>,
    row_locks: Mutex<HashMap<RowKey, Arc<RowLock<()>>>>,
}

/// Thread-safe in-memory store.
///
/// Cloning shares the underlying data.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.inner.data.lock();
        f.debug_struct("InMemoryStore")
            .field("tables", &data.tables.len())
            .field("log_entries", &data.log.len())
            .finish()
    }
}

impl InMemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a committed row in place directly, bypassing commands and the log.
    ///
    /// The row must carry an `id` field.
    pub fn seed_row(&self, table: &TableName, row: Row) -> Result<RowId, StoreError> {
        let id = row
            .get(ID_COLUMN)
            .and_then(RowId::from_value)
            .ok_or_else(|| StoreError::InvalidValue {
                table: table.clone(),
                column: ID_COLUMN.to_string(),
                detail: "seeded rows need an id".to_string(),
            })?;
        self.inner
            .data
            .lock()
            .tables
            .entry(table.clone())
            .or_default()
            .insert(id.clone(), row);
        Ok(id)
    }

    /// Committed state of one row.
    pub fn row(&self, table: &TableName, id: &RowId) -> Option<Row> {
        self.inner.data.lock().row(table, id).cloned()
    }

    /// Committed rows of one table, ordered by id.
    pub fn rows(&self, table: &TableName) -> Vec<Row> {
        self.inner
            .data
            .lock()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The whole committed event log, oldest first.
    pub fn event_log(&self) -> Vec<EventLogEntry> {
        self.inner.data.lock().log.clone()
    }

    fn row_lock(&self, key: &RowKey) -> Arc<RowLock<()>> {
        Arc::clone(self.inner.row_locks.lock().entry(key.clone()).or_default())
    }

    /// Forget row locks that nobody holds or waits for.
    fn release_row_locks(&self, keys: impl IntoIterator<Item = RowKey>) {
        let mut locks = self.inner.row_locks.lock();
        for key in keys {
            if locks
                .get(&key)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                locks.remove(&key);
            }
        }
    }

    #[cfg(test)]
    fn tracked_row_locks(&self) -> usize {
        self.inner.row_locks.lock().len()
    }
}

impl Store for InMemoryStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction, StoreError> {
        Ok(InMemoryTransaction {
            store: self.clone(),
            guards: HashMap::new(),
            staged_rows: HashMap::new(),
            staged_log: Vec::new(),
        })
    }

    async fn read_event_log(
        &self,
        table: &TableName,
        row_id: &RowId,
    ) -> Result<Vec<EventLogEntry>, StoreError> {
        Ok(self
            .inner
            .data
            .lock()
            .log
            .iter()
            .filter(|entry| &entry.table == table && &entry.row_id == row_id)
            .cloned()
            .collect())
    }
}

/// Transaction over an [`InMemoryStore`].
///
/// Writes are staged and applied in one step on commit. Row locks taken by
/// [`lock_row`](Transaction::lock_row) or
/// [`insert_row`](Transaction::insert_row) are released when the transaction
/// ends, however it ends.
pub struct InMemoryTransaction {
    store: InMemoryStore,
    guards: HashMap<RowKey, OwnedMutexGuard<()>>,
    staged_rows: HashMap<RowKey, Row>,
    staged_log: Vec<EventLogEntry>,
}

impl std::fmt::Debug for InMemoryTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransaction")
            .field("locked_rows", &self.guards.len())
            .field("staged_rows", &self.staged_rows.len())
            .field("staged_log", &self.staged_log.len())
            .finish()
    }
}

impl InMemoryTransaction {
    /// Take the row lock for `key` unless this transaction already holds it.
    async fn acquire(&mut self, key: RowKey) {
        if !self.guards.contains_key(&key) {
            let lock = self.store.row_lock(&key);
            let guard = lock.lock_owned().await;
            self.guards.insert(key, guard);
        }
    }

    /// Current state of a row as seen inside this transaction.
    pub fn read_row(&self, table: &TableName, id: &RowId) -> Option<Row> {
        let key = (table.clone(), id.clone());
        self.staged_rows
            .get(&key)
            .cloned()
            .or_else(|| self.store.row(table, id))
    }
}

impl Transaction for InMemoryTransaction {
    async fn lock_row(
        &mut self,
        table: &CompiledTable,
        row_id: &RowId,
    ) -> Result<Option<Row>, StoreError> {
        self.acquire((table.name().clone(), row_id.clone())).await;
        Ok(self.read_row(table.name(), row_id))
    }

    async fn insert_row(
        &mut self,
        table: &CompiledTable,
        values: Vec<Value>,
    ) -> Result<Option<RowId>, StoreError> {
        let row: Row = table
            .column_names()
            .into_iter()
            .map(str::to_string)
            .zip(values)
            .collect();

        let Some(id) = row.get(ID_COLUMN).and_then(RowId::from_value) else {
            return Ok(None);
        };

        // A concurrent insert of the same key holds this lock until it ends.
        self.acquire((table.name().clone(), id.clone())).await;
        if self.read_row(table.name(), &id).is_some() {
            return Err(StoreError::failure(
                Operation::InsertRow,
                format!("duplicate key {id} in {}", table.name()),
            ));
        }

        self.staged_rows
            .insert((table.name().clone(), id.clone()), row);
        Ok(Some(id))
    }

    async fn update_row(
        &mut self,
        table: &CompiledTable,
        row_id: &RowId,
        values: Vec<Value>,
    ) -> Result<(), StoreError> {
        let Some(mut row) = self.read_row(table.name(), row_id) else {
            return Ok(());
        };

        for (column, value) in table.column_names().into_iter().zip(values) {
            if !value.is_null() {
                row.insert(column.to_string(), value);
            }
        }

        self.staged_rows
            .insert((table.name().clone(), row_id.clone()), row);
        Ok(())
    }

    async fn append_event(&mut self, entry: EventLogEntry) -> Result<(), StoreError> {
        self.staged_log.push(entry);
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let mut data = self.store.inner.data.lock();
        for ((table, id), row) in std::mem::take(&mut self.staged_rows) {
            data.tables.entry(table).or_default().insert(id, row);
        }
        data.log.append(&mut self.staged_log);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if self.guards.is_empty() {
            return;
        }
        let keys: Vec<RowKey> = self.guards.keys().cloned().collect();
        self.guards.clear();
        self.store.release_row_locks(keys);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, CompiledSchema, Schema};
    use serde_json::json;
    use std::time::Duration;

    fn schema() -> CompiledSchema {
        Schema::builder()
            .table("items", |t| {
                t.column("id", ColumnType::Text)
                    .column("name", ColumnType::Text)
                    .column("value", ColumnType::Integer)
            })
            .build()
            .expect("valid schema")
            .compile()
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap_or_default()
    }

    fn id(raw: &str) -> RowId {
        RowId::try_new(raw).expect("valid row id")
    }

    #[tokio::test]
    async fn inserted_rows_are_invisible_until_commit() {
        let schema = schema();
        let items = schema.table_named("items").expect("compiled");
        let store = InMemoryStore::new();

        let mut tx = store.begin().await.expect("begin");
        let inserted = tx
            .insert_row(items, vec![json!("a"), json!("first"), json!(1)])
            .await
            .expect("insert");
        assert_eq!(inserted, Some(id("a")));
        assert!(store.row(items.name(), &id("a")).is_none());

        tx.commit().await.expect("commit");

        assert_eq!(
            store.row(items.name(), &id("a")).map(Value::Object),
            Some(json!({"id": "a", "name": "first", "value": 1}))
        );
    }

    #[tokio::test]
    async fn insert_without_id_yields_no_row_id() {
        let schema = schema();
        let items = schema.table_named("items").expect("compiled");
        let store = InMemoryStore::new();

        let mut tx = store.begin().await.expect("begin");
        let inserted = tx
            .insert_row(items, vec![Value::Null, json!("first"), json!(1)])
            .await
            .expect("insert");

        assert_eq!(inserted, None);
    }

    #[tokio::test]
    async fn update_leaves_null_columns_unchanged() {
        let schema = schema();
        let items = schema.table_named("items").expect("compiled");
        let store = InMemoryStore::new();
        store
            .seed_row(items.name(), row(json!({"id": "a", "name": "first", "value": 1})))
            .expect("seed");

        let mut tx = store.begin().await.expect("begin");
        tx.update_row(items, &id("a"), vec![Value::Null, Value::Null, json!(2)])
            .await
            .expect("update");
        tx.commit().await.expect("commit");

        assert_eq!(
            store.row(items.name(), &id("a")).map(Value::Object),
            Some(json!({"id": "a", "name": "first", "value": 2}))
        );
    }

    #[tokio::test]
    async fn rollback_discards_writes_and_log_entries() {
        let schema = schema();
        let items = schema.table_named("items").expect("compiled");
        let store = InMemoryStore::new();

        let mut tx = store.begin().await.expect("begin");
        tx.insert_row(items, vec![json!("a"), json!("first"), json!(1)])
            .await
            .expect("insert");
        tx.rollback().await.expect("rollback");

        assert!(store.rows(items.name()).is_empty());
        assert!(store.event_log().is_empty());
    }

    #[tokio::test]
    async fn second_lock_on_a_row_waits_for_the_first_transaction() {
        // Given: a transaction holding the lock on row `a`
        let schema = schema();
        let items = schema.table_named("items").expect("compiled").clone();
        let store = InMemoryStore::new();
        store
            .seed_row(items.name(), row(json!({"id": "a", "value": 1})))
            .expect("seed");
        let mut first = store.begin().await.expect("begin");
        first.lock_row(&items, &id("a")).await.expect("lock");

        // When: another transaction asks for the same row
        let contender = {
            let store = store.clone();
            let items = items.clone();
            tokio::spawn(async move {
                let mut second = store.begin().await.expect("begin");
                second.lock_row(&items, &id("a")).await.expect("lock")
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        first
            .update_row(&items, &id("a"), vec![Value::Null, Value::Null, json!(2)])
            .await
            .expect("update");
        first.commit().await.expect("commit");

        // Then: it proceeds only after commit and sees the committed value
        let seen = contender.await.expect("task completes");
        assert_eq!(seen.and_then(|row| row.get("value").cloned()), Some(json!(2)));
    }

    #[tokio::test]
    async fn racing_inserts_of_one_key_keep_the_first_and_reject_the_second() {
        // Given: a transaction that inserted row `k` but has not committed
        let schema = schema();
        let items = schema.table_named("items").expect("compiled").clone();
        let store = InMemoryStore::new();
        let mut first = store.begin().await.expect("begin");
        first
            .insert_row(&items, vec![json!("k"), json!("first"), json!(1)])
            .await
            .expect("first insert");

        // When: a second transaction inserts the same key
        let contender = {
            let store = store.clone();
            let items = items.clone();
            tokio::spawn(async move {
                let mut second = store.begin().await.expect("begin");
                second
                    .insert_row(&items, vec![json!("k"), json!("second"), json!(2)])
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        first.commit().await.expect("commit");

        // Then: the second insert fails once the first commits, and the first row stands
        let result = contender.await.expect("task completes");
        assert!(matches!(
            result,
            Err(StoreError::StoreFailure {
                operation: Operation::InsertRow,
                ..
            })
        ));
        assert_eq!(
            store.rows(items.name()),
            vec![row(json!({"id": "k", "name": "first", "value": 1}))]
        );
    }

    #[tokio::test]
    async fn insert_proceeds_after_a_conflicting_insert_rolls_back() {
        let schema = schema();
        let items = schema.table_named("items").expect("compiled");
        let store = InMemoryStore::new();

        let mut first = store.begin().await.expect("begin");
        first
            .insert_row(items, vec![json!("k"), json!("first"), json!(1)])
            .await
            .expect("first insert");
        first.rollback().await.expect("rollback");

        let mut second = store.begin().await.expect("begin");
        let inserted = second
            .insert_row(items, vec![json!("k"), json!("second"), json!(2)])
            .await
            .expect("second insert");
        second.commit().await.expect("commit");

        assert_eq!(inserted, Some(id("k")));
        assert_eq!(
            store.row(items.name(), &id("k")).and_then(|row| row.get("name").cloned()),
            Some(json!("second"))
        );
    }

    #[tokio::test]
    async fn row_locks_are_forgotten_once_transactions_end() {
        // Given: transactions that locked existing and missing rows
        let schema = schema();
        let items = schema.table_named("items").expect("compiled");
        let store = InMemoryStore::new();
        store
            .seed_row(items.name(), row(json!({"id": "a"})))
            .expect("seed");

        let mut committed = store.begin().await.expect("begin");
        committed.lock_row(items, &id("a")).await.expect("lock");
        committed.lock_row(items, &id("missing")).await.expect("lock");
        let mut dropped = store.begin().await.expect("begin");
        dropped.lock_row(items, &id("b")).await.expect("lock");
        assert_eq!(store.tracked_row_locks(), 3);

        // When: one commits and the other is dropped unfinished
        committed.commit().await.expect("commit");
        drop(dropped);

        // Then: no lock bookkeeping is left behind
        assert_eq!(store.tracked_row_locks(), 0);
    }

    #[tokio::test]
    async fn locking_the_same_row_twice_in_one_transaction_does_not_deadlock() {
        let schema = schema();
        let items = schema.table_named("items").expect("compiled");
        let store = InMemoryStore::new();
        store
            .seed_row(items.name(), row(json!({"id": "a"})))
            .expect("seed");

        let mut tx = store.begin().await.expect("begin");
        tx.lock_row(items, &id("a")).await.expect("first lock");
        let again = tx.lock_row(items, &id("a")).await.expect("second lock");

        assert!(again.is_some());
    }
}
