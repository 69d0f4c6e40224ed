//! Transactional command execution.
//!
//! Each [`Dispatcher::run_command`] call is one transaction walking
//! `Begin -> LockMutatorRows -> PlanEvents -> ApplyEvents -> Commit`. A
//! failure anywhere rolls the whole transaction back and is returned to the
//! caller as a [`DispatchError`]; a success returns a [`Committed`] report.
//!
//! Events with no registered reducer are dropped with a warning. An event
//! whose kind does not match its reducer is skipped and reported as an
//! anomaly, or aborts the dispatch when strict reducer kinds are enabled.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::command::{Dispatchable, Event, EventKind, LockedRow, LockedRows, Mutations, RowRef};
use crate::errors::{DispatchError, ReconstructError};
use crate::reconstruct;
use crate::reducer::{merge_patch, Reducer, ReducerRegistry};
use crate::schema::{ColumnType, CompiledSchema, CompiledTable, ID_COLUMN};
use crate::store::{EventLogEntry, Store, StoreError, Transaction};
use crate::types::{ActorId, CommandName, Row, RowId, TableName};

/// An event skipped because its kind did not match its reducer's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindAnomaly {
    /// Event name
    pub event: CommandName,
    /// Event table
    pub table: TableName,
    /// Kind of the planned event
    pub event_kind: EventKind,
    /// Kind of the registered reducer
    pub reducer_kind: EventKind,
}

/// Report of a committed dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    /// The command that ran.
    pub command: CommandName,
    /// Rows inserted, in application order.
    pub created: Vec<RowRef>,
    /// Rows updated, in order of first update.
    pub modified: Vec<RowRef>,
    /// Events applied and logged.
    pub applied: usize,
    /// Events dropped for lack of a reducer.
    pub dropped: usize,
    /// No-op markers returned by planning.
    pub skipped: usize,
    /// Events skipped on a kind mismatch.
    pub anomalies: Vec<KindAnomaly>,
}

impl Committed {
    fn new(command: CommandName) -> Self {
        Self {
            command,
            created: Vec::new(),
            modified: Vec::new(),
            applied: 0,
            dropped: 0,
            skipped: 0,
            anomalies: Vec::new(),
        }
    }

    /// Id of the first row created in `table`.
    pub fn created_in(&self, table: &str) -> Option<&RowId> {
        self.created
            .iter()
            .find(|row| row.table.as_str() == table)
            .map(|row| &row.id)
    }
}

type RowCache = HashMap<RowRef, Row>;

/// Runs commands against a store.
///
/// The compiled schema and reducer registry are shared read-only; a single
/// dispatcher serves any number of concurrent dispatches.
#[derive(Debug, Clone)]
pub struct Dispatcher<S> {
    store: S,
    schema: Arc<CompiledSchema>,
    reducers: Arc<ReducerRegistry>,
    strict_kinds: bool,
}

impl<S: Store> Dispatcher<S> {
    /// Dispatcher over `store` with permissive reducer kinds.
    pub fn new(
        store: S,
        schema: impl Into<Arc<CompiledSchema>>,
        reducers: impl Into<Arc<ReducerRegistry>>,
    ) -> Self {
        Self {
            store,
            schema: schema.into(),
            reducers: reducers.into(),
            strict_kinds: false,
        }
    }

    /// Abort dispatches whose events do not match their reducer's kind.
    #[must_use]
    pub fn strict_reducer_kinds(mut self, strict: bool) -> Self {
        self.strict_kinds = strict;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The compiled schema.
    pub fn schema(&self) -> &CompiledSchema {
        &self.schema
    }

    /// The reducer registry.
    pub fn reducers(&self) -> &ReducerRegistry {
        &self.reducers
    }

    /// Run one command in one transaction.
    ///
    /// On error the transaction has been rolled back and nothing the command
    /// did is visible.
    #[instrument(
        name = "dispatcher.run_command",
        skip_all,
        fields(command = %command.name(), actor = %actor)
    )]
    pub async fn run_command<C>(
        &self,
        command: &C,
        input: C::Input,
        actor: &ActorId,
    ) -> Result<Committed, DispatchError>
    where
        C: Dispatchable<S::Transaction> + ?Sized,
    {
        let mut tx = self.store.begin().await?;

        match self.execute(&mut tx, command, &input, actor).await {
            Ok(committed) => {
                tx.commit().await?;
                info!(
                    created = committed.created.len(),
                    modified = committed.modified.len(),
                    applied = committed.applied,
                    dropped = committed.dropped,
                    "[dispatcher.commit] command committed"
                );
                Ok(committed)
            }
            Err(error) => {
                error!(error = %error, "[dispatcher.rollback] command failed, rolling back");
                if let Err(rollback_error) = tx.rollback().await {
                    error!(
                        error = %rollback_error,
                        "[dispatcher.rollback_failed] rollback did not complete"
                    );
                }
                Err(error)
            }
        }
    }

    /// Rebuild a row from its event log, shaped like the table's stored rows.
    pub async fn reduce_row(&self, table: &TableName, row_id: &RowId) -> Result<Row, ReconstructError> {
        let compiled = self
            .schema
            .table(table)
            .ok_or_else(|| ReconstructError::UnknownTable(table.clone()))?;
        reconstruct::reduce_row(&self.store, &self.reducers, compiled, row_id).await
    }

    async fn execute<C>(
        &self,
        tx: &mut S::Transaction,
        command: &C,
        input: &C::Input,
        actor: &ActorId,
    ) -> Result<Committed, DispatchError>
    where
        C: Dispatchable<S::Transaction> + ?Sized,
    {
        let mutations = command.mutator(input)?;
        let (locked, mut cache) = self.lock_rows(tx, &mutations).await?;

        let events = command.plan(tx, input, &locked).await?;
        debug!(events = events.len(), "[dispatcher.plan] events planned");

        let mut committed = Committed::new(command.name().clone());
        for event in events {
            let Some(event) = event else {
                committed.skipped += 1;
                continue;
            };
            self.apply(tx, &event, actor, &mut cache, &mut committed)
                .await?;
        }
        Ok(committed)
    }

    async fn lock_rows(
        &self,
        tx: &mut S::Transaction,
        mutations: &Mutations,
    ) -> Result<(LockedRows, RowCache), DispatchError> {
        let mut cache = RowCache::new();

        // Lock in (table, id) order so dispatches sharing rows take them in the same order.
        let targets: BTreeSet<&RowRef> = mutations.iter().map(|(_, target)| target).collect();
        for target in targets {
            let table = self.compiled(&target.table)?;
            match tx.lock_row(table, &target.id).await? {
                Some(row) => {
                    cache.insert(target.clone(), row);
                }
                None => debug!(
                    table = %target.table,
                    row_id = %target.id,
                    "[dispatcher.lock] named row does not exist"
                ),
            }
        }

        let mut locked = LockedRows::default();
        for (field, target) in mutations.iter() {
            if let Some(row) = cache.get(target) {
                locked.insert(
                    field.to_string(),
                    LockedRow {
                        table: target.table.clone(),
                        id: target.id.clone(),
                        row: row.clone(),
                    },
                );
            }
        }
        Ok((locked, cache))
    }

    async fn apply(
        &self,
        tx: &mut S::Transaction,
        event: &Event,
        actor: &ActorId,
        cache: &mut RowCache,
        committed: &mut Committed,
    ) -> Result<(), DispatchError> {
        let Some(reducer) = self.reducers.get(event.table(), event.name().as_str()) else {
            warn!(
                event = %event.name(),
                table = %event.table(),
                "[dispatcher.no_reducer] no reducer registered, event dropped"
            );
            committed.dropped += 1;
            return Ok(());
        };
        let table = self.compiled(event.table())?;

        match (event, reducer) {
            (Event::Creation(creation), Reducer::Creator(create)) => {
                let mut row = create(creation.payload())?;
                if table.id_type() == ColumnType::Uuid
                    && row.get(ID_COLUMN).map_or(true, Value::is_null)
                {
                    row.insert(
                        ID_COLUMN.to_string(),
                        Value::String(Uuid::now_v7().to_string()),
                    );
                }

                let row_id = tx
                    .insert_row(table, table.project(&row))
                    .await?
                    .ok_or_else(|| DispatchError::MissingRowId(table.name().clone()))?;
                append_log(tx, event, &row_id, actor).await?;
                committed
                    .created
                    .push(RowRef::new(table.name().clone(), row_id));
            }
            (Event::Modification(modification), Reducer::Updater(update)) => {
                let target = RowRef::new(table.name().clone(), modification.row_id().clone());
                let Some(previous) = cache.get_mut(&target) else {
                    return Err(DispatchError::UpdateTargetNotLocked {
                        table: target.table,
                        row_id: target.id,
                    });
                };

                let patch = table.shape(&update(previous, modification.payload())?);
                let values = table.project(&patch);
                merge_patch(previous, patch);

                tx.update_row(table, &target.id, values).await?;
                append_log(tx, event, &target.id, actor).await?;
                if !committed.modified.contains(&target) {
                    committed.modified.push(target);
                }
            }
            _ => {
                let anomaly = KindAnomaly {
                    event: event.name().clone(),
                    table: table.name().clone(),
                    event_kind: event.kind(),
                    reducer_kind: reducer.kind(),
                };
                if self.strict_kinds {
                    return Err(DispatchError::KindMismatch {
                        event: anomaly.event,
                        table: anomaly.table,
                        event_kind: anomaly.event_kind,
                        reducer_kind: anomaly.reducer_kind,
                    });
                }
                warn!(
                    event = %anomaly.event,
                    table = %anomaly.table,
                    event_kind = %anomaly.event_kind,
                    reducer_kind = %anomaly.reducer_kind,
                    "[dispatcher.kind_mismatch] event kind does not match its reducer, event skipped"
                );
                committed.anomalies.push(anomaly);
                return Ok(());
            }
        }

        committed.applied += 1;
        Ok(())
    }

    fn compiled(&self, table: &TableName) -> Result<&CompiledTable, DispatchError> {
        self.schema
            .table(table)
            .ok_or_else(|| DispatchError::UnknownTable(table.clone()))
    }
}

async fn append_log<X: Transaction>(
    tx: &mut X,
    event: &Event,
    row_id: &RowId,
    actor: &ActorId,
) -> Result<(), StoreError> {
    tx.append_event(EventLogEntry {
        name: event.name().clone(),
        table: event.table().clone(),
        row_id: row_id.clone(),
        actor_id: actor.clone(),
        data: Value::Object(event.payload().clone()),
        created_at: Utc::now(),
    })
    .await
}
