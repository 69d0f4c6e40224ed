//! PostgreSQL store for the eventtable dispatcher.
//!
//! Executes the statements compiled by [`eventtable::CompiledSchema`] inside
//! one database transaction per command: `SELECT ... FOR UPDATE` row locks,
//! typed inserts, `COALESCE`-based partial updates, and appends to the
//! `events` log table created by [`PostgresStore::migrate`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use eventtable::{
    ActorId, CommandName, CompiledTable, EventLogEntry, Operation, Row as TableRow, RowId, Store,
    StoreError, TableName, Transaction, EVENT_LOG_INSERT, EVENT_LOG_SELECT, ID_COLUMN,
};
use nutype::nutype;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{postgres::PgPoolOptions, query, PgConnection, Pool, Postgres, Row};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

mod values;

/// Errors from setting up or checking a [`PostgresStore`].
#[derive(Debug, Error)]
pub enum PostgresStoreError {
    /// The connection pool could not be created.
    #[error("failed to create postgres connection pool")]
    ConnectionFailed(#[source] sqlx::Error),
    /// The health-check query failed.
    #[error("postgres health check failed")]
    PingFailed(#[source] sqlx::Error),
    /// The bundled event log migrations could not be applied.
    #[error("failed to apply event log migrations")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),
}

/// Maximum number of database connections in the pool.
///
/// Must be at least 1, enforced by using `NonZeroU32` as the underlying type.
///
/// # Examples
///
/// ```
/// use eventtable_postgres::MaxConnections;
/// use std::num::NonZeroU32;
///
/// let pool = MaxConnections::new(NonZeroU32::new(5).expect("5 is non-zero"));
/// assert_eq!(pool.to_string(), "5");
/// ```
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRef, Into))]
pub struct MaxConnections(std::num::NonZeroU32);

/// Configuration for the [`PostgresStore`] connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: MaxConnections,
    /// Timeout for acquiring a connection from the pool (default: 30 seconds)
    pub acquire_timeout: Duration,
    /// Idle timeout for connections in the pool (default: 10 minutes)
    pub idle_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        const DEFAULT_MAX_CONNECTIONS: std::num::NonZeroU32 = match std::num::NonZeroU32::new(10) {
            Some(v) => v,
            None => unreachable!(),
        };

        Self {
            max_connections: MaxConnections::new(DEFAULT_MAX_CONNECTIONS),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600), // 10 minutes
        }
    }
}

/// Store backed by a PostgreSQL connection pool.
///
/// Each [`begin`](Store::begin) checks one connection out of the pool for the
/// lifetime of the returned [`PostgresTransaction`].
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgresStore with default configuration.
    pub async fn new<S: Into<String>>(connection_string: S) -> Result<Self, PostgresStoreError> {
        Self::with_config(connection_string, PostgresConfig::default()).await
    }

    /// Create a new PostgresStore with custom configuration.
    pub async fn with_config<S: Into<String>>(
        connection_string: S,
        config: PostgresConfig,
    ) -> Result<Self, PostgresStoreError> {
        let connection_string = connection_string.into();
        let max_connections: std::num::NonZeroU32 = config.max_connections.into();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.get())
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&connection_string)
            .await
            .map_err(PostgresStoreError::ConnectionFailed)?;
        info!(
            max_connections = %config.max_connections,
            "[postgres.connect] connection pool ready"
        );
        Ok(Self { pool })
    }

    /// Create a PostgresStore from an existing connection pool.
    ///
    /// Use this when you need full control over pool configuration or want to
    /// share a pool across multiple components.
    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Round-trip a trivial query to check the database is reachable.
    #[instrument(name = "postgres.ping", skip(self))]
    pub async fn ping(&self) -> Result<(), PostgresStoreError> {
        query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(PostgresStoreError::PingFailed)
    }

    /// Create the `events` log table and its per-row index if missing.
    ///
    /// Client tables are never created here; they must already exist with the
    /// columns declared in the schema.
    #[instrument(name = "postgres.migrate", skip(self))]
    pub async fn migrate(&self) -> Result<(), PostgresStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(PostgresStoreError::MigrationFailed)?;
        info!("[postgres.migrate] event log schema is current");
        Ok(())
    }
}

impl Store for PostgresStore {
    type Transaction = PostgresTransaction;

    #[instrument(name = "postgres.begin", skip(self))]
    async fn begin(&self) -> Result<PostgresTransaction, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::BeginTransaction))?;
        Ok(PostgresTransaction { tx })
    }

    #[instrument(name = "postgres.read_event_log", skip(self))]
    async fn read_event_log(
        &self,
        table: &TableName,
        row_id: &RowId,
    ) -> Result<Vec<EventLogEntry>, StoreError> {
        let rows = query(EVENT_LOG_SELECT)
            .bind(table.as_str())
            .bind(row_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::ReadEventLog))?;

        debug!(entries = rows.len(), "[postgres.read_event_log] entries read");
        rows.iter().map(decode_log_entry).collect()
    }
}

/// One open database transaction.
///
/// Row locks taken through [`lock_row`](Transaction::lock_row) are held by
/// PostgreSQL until commit or rollback. Dropping the value without either
/// rolls the transaction back.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    /// The transaction's connection, for reads a command's planner performs
    /// beyond its locked rows.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

impl Transaction for PostgresTransaction {
    #[instrument(name = "postgres.lock_row", skip(self, table), fields(table = %table.name()))]
    async fn lock_row(
        &mut self,
        table: &CompiledTable,
        row_id: &RowId,
    ) -> Result<Option<TableRow>, StoreError> {
        let row = query(table.lock_statement())
            .bind(row_id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::LockRow))?;

        row.map(|row| values::decode_locked_row(table, &row))
            .transpose()
            .map_err(|error| map_sqlx_error(error, Operation::LockRow))
    }

    #[instrument(name = "postgres.insert_row", skip_all, fields(table = %table.name()))]
    async fn insert_row(
        &mut self,
        table: &CompiledTable,
        values: Vec<Value>,
    ) -> Result<Option<RowId>, StoreError> {
        let mut statement = query(table.insert_statement());
        for (column, value) in table.columns().iter().zip(values) {
            statement = values::bind(statement, table.name(), column, value)?;
        }

        let Some(row) = statement
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::InsertRow))?
        else {
            return Ok(None);
        };

        let id: Option<String> = row
            .try_get(ID_COLUMN)
            .map_err(|error| map_sqlx_error(error, Operation::InsertRow))?;
        Ok(id.and_then(|id| RowId::try_new(id).ok()))
    }

    #[instrument(name = "postgres.update_row", skip(self, table, values), fields(table = %table.name()))]
    async fn update_row(
        &mut self,
        table: &CompiledTable,
        row_id: &RowId,
        values: Vec<Value>,
    ) -> Result<(), StoreError> {
        let mut statement = query(table.update_statement());
        for (column, value) in table.columns().iter().zip(values) {
            statement = values::bind(statement, table.name(), column, value)?;
        }

        statement
            .bind(row_id.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::UpdateRow))?;
        Ok(())
    }

    #[instrument(
        name = "postgres.append_event",
        skip_all,
        fields(event = %entry.name, table = %entry.table, row_id = %entry.row_id)
    )]
    async fn append_event(&mut self, entry: EventLogEntry) -> Result<(), StoreError> {
        query(EVENT_LOG_INSERT)
            .bind(entry.name.as_str())
            .bind(entry.table.as_str())
            .bind(entry.row_id.as_str())
            .bind(entry.actor_id.as_str())
            .bind(Json(entry.data))
            .bind(entry.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::AppendEvent))?;
        Ok(())
    }

    #[instrument(name = "postgres.commit", skip_all)]
    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::CommitTransaction))
    }

    #[instrument(name = "postgres.rollback", skip_all)]
    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::RollbackTransaction))
    }
}

fn decode_log_entry(row: &PgRow) -> Result<EventLogEntry, StoreError> {
    let read = |error: sqlx::Error| map_sqlx_error(error, Operation::ReadEventLog);
    let corrupt = |error: &dyn std::fmt::Display| StoreError::CorruptLogEntry(error.to_string());

    let name: String = row.try_get("name").map_err(read)?;
    let table: String = row.try_get("table_name").map_err(read)?;
    let row_id: String = row.try_get("row_id").map_err(read)?;
    let actor_id: String = row.try_get("actor_id").map_err(read)?;
    let Json(data): Json<Value> = row.try_get("data").map_err(read)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(read)?;

    Ok(EventLogEntry {
        name: CommandName::try_new(name).map_err(|e| corrupt(&e))?,
        table: TableName::try_new(table).map_err(|e| corrupt(&e))?,
        row_id: RowId::try_new(row_id).map_err(|e| corrupt(&e))?,
        actor_id: ActorId::try_new(actor_id).map_err(|e| corrupt(&e))?,
        data,
        created_at,
    })
}

fn map_sqlx_error(error: sqlx::Error, operation: Operation) -> StoreError {
    if let sqlx::Error::Database(db_error) = &error {
        // 40001 serialization_failure, 40P01 deadlock_detected
        if matches!(db_error.code().as_deref(), Some("40001" | "40P01")) {
            warn!(
                error = %db_error,
                operation = %operation,
                "[postgres.lock_conflict] transaction aborted by a lock conflict"
            );
            return StoreError::failure(operation, db_error.to_string());
        }
    }

    error!(
        error = %error,
        operation = %operation,
        "[postgres.database_error] database operation failed"
    );
    StoreError::failure(operation, error.to_string())
}
