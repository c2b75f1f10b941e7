//! Generic resource persistence over one SQLite connection.
//!
//! # Responsibility
//! - Provision model tables and run raw setup statements atomically.
//! - Insert, read, list, update, soft-delete and undelete single resources.
//! - Publish payloads on the `events` notification channel.
//!
//! # Invariants
//! - Every write runs in exactly one IMMEDIATE transaction; any failure
//!   rolls the whole call back.
//! - Zero matching rows is `Ok(None)`, never an error.
//! - Rows are never physically removed; delete only sets `delete_time`.
//! - Log lines carry table names, statuses and durations only, never
//!   column values or payloads.

use crate::db::{DbError, DbResult, ModelSchema, RawStatement};
use crate::model::common::{
    CREATE_TIME_COLUMN, DELETE_TIME_COLUMN, ID_COLUMN, UPDATE_TIME_COLUMN, VERSION_COLUMN,
};
use crate::model::resource::{decode_row, Resource};
use crate::notify::{register_notify_function, Notification, NotificationHub, NOTIFY_CHANNEL};
use crate::query::{Query, QueryHook, Rendered, SetValue, Visibility, NOW_MS_SQL};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, InterruptHandle, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::Receiver;
use std::time::Instant;

/// Prepared once at construction and reused for every `notify` call.
const NOTIFY_SQL: &str = "SELECT notify('events', ?1)";

pub type PersistResult<T> = Result<T, PersistError>;

/// Façade operation, used for error context and log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateTables,
    Create,
    Read,
    List,
    Update,
    Delete,
    Undelete,
    Notify,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateTables => "create_tables",
            Self::Create => "create",
            Self::Read => "read",
            Self::List => "list",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Undelete => "undelete",
            Self::Notify => "notify",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a façade operation.
///
/// "Not found" is deliberately absent; see `Ok(None)` on each operation.
#[derive(Debug)]
pub enum PersistError {
    /// Notify function registration or statement preparation failed.
    Initialization(DbError),
    /// A table creation or a non-tolerated raw statement failed.
    Schema { target: String, source: DbError },
    /// Insert, update, delete, undelete or notify failed.
    /// `target` is the table, or the channel for notify.
    Write {
        operation: Operation,
        target: &'static str,
        source: DbError,
    },
    /// Read or list failed.
    Read {
        operation: Operation,
        target: &'static str,
        source: DbError,
    },
    /// Closing the connection failed.
    Shutdown(DbError),
}

impl PersistError {
    /// Returns whether the operation was cancelled through `interrupt`.
    pub fn is_interrupted(&self) -> bool {
        self.db_error().is_interrupted()
    }

    /// Underlying storage error.
    pub fn db_error(&self) -> &DbError {
        match self {
            Self::Initialization(source) | Self::Shutdown(source) => source,
            Self::Schema { source, .. }
            | Self::Write { source, .. }
            | Self::Read { source, .. } => source,
        }
    }
}

impl Display for PersistError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialization(err) => write!(f, "persistence initialization failed: {err}"),
            Self::Schema { target, source } => {
                write!(f, "schema provisioning failed at {target}: {source}")
            }
            Self::Write {
                operation,
                target,
                source,
            } => write!(f, "{operation} on `{target}` failed: {source}"),
            Self::Read {
                operation,
                target,
                source,
            } => write!(f, "{operation} on `{target}` failed: {source}"),
            Self::Shutdown(err) => write!(f, "closing persistence failed: {err}"),
        }
    }
}

impl Error for PersistError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.db_error())
    }
}

/// Persistence façade bound to one SQLite connection.
///
/// The connection is guarded by a mutex, so one `SqlPersistence` can be
/// shared across threads through `Arc`; each call holds the connection for
/// its whole unit of work.
pub struct SqlPersistence {
    conn: Mutex<Connection>,
    hub: NotificationHub,
    interrupt: InterruptHandle,
}

impl SqlPersistence {
    /// Binds to an open connection and prepares the notify statement.
    ///
    /// # Errors
    /// - `PersistError::Initialization` when the `notify` SQL function
    ///   cannot be installed or the statement fails to prepare.
    pub fn new(conn: Connection) -> PersistResult<Self> {
        let hub = NotificationHub::new();
        register_notify_function(&conn, hub.clone())
            .map_err(|err| init_failed(err.into()))?;
        conn.prepare_cached(NOTIFY_SQL)
            .map(drop)
            .map_err(|err| init_failed(err.into()))?;
        let interrupt = conn.get_interrupt_handle();

        info!("event=persistence_init module=persist status=ok channel={NOTIFY_CHANNEL}");
        Ok(Self {
            conn: Mutex::new(conn),
            hub,
            interrupt,
        })
    }

    /// Ensures every model table exists, then runs `raw` in order.
    ///
    /// Everything happens in one transaction. A raw statement marked
    /// `err_ok` runs inside a savepoint; its failure is rolled back to that
    /// savepoint, logged, and skipped.
    pub fn create_tables(&self, models: &[ModelSchema], raw: &[RawStatement]) -> PersistResult<()> {
        let started_at = Instant::now();
        let mut conn = self.conn.lock();
        let result = provision(&mut conn, models, raw);

        match &result {
            Ok(()) => info!(
                "event=create_tables module=persist status=ok tables={} raw_statements={} duration_ms={}",
                models.len(),
                raw.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=create_tables module=persist status=error duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }

    /// Inserts one row and returns it as stored.
    ///
    /// `create_time` and `update_time` are stamped by the database clock.
    pub fn create<R: Resource>(&self, resource: &R) -> PersistResult<R> {
        let started_at = Instant::now();
        let result = render_insert(resource).and_then(|rendered| {
            self.in_write_tx(|conn| {
                let mut rows = fetch_rows::<R>(conn, &rendered)?;
                if rows.is_empty() {
                    return Err(DbError::InvalidData(format!(
                        "insert into `{}` returned no row",
                        R::table()
                    )));
                }
                Ok(rows.swap_remove(0))
            })
        });

        finish(Operation::Create, R::table(), started_at, result, |_| "ok")
            .map_err(|source| write_failed(Operation::Create, R::table(), source))
    }

    /// Reads the first row matching `hook`.
    ///
    /// Soft-deleted rows are hidden unless `show_deleted`. The hook runs
    /// after visibility is set; a read without a hook-supplied limit
    /// fetches one row.
    pub fn read<R: Resource>(
        &self,
        show_deleted: bool,
        hook: QueryHook<'_>,
    ) -> PersistResult<Option<R>> {
        let started_at = Instant::now();
        let mut query = Query::new(R::SCHEMA);
        query.set_visibility(visibility_for(show_deleted));
        hook(&mut query);
        if query.row_limit().is_none() {
            query.limit(1);
        }

        let result = query.render_select().and_then(|rendered| {
            let conn = self.conn.lock();
            fetch_rows::<R>(&conn, &rendered)
        });

        finish(Operation::Read, R::table(), started_at, result, row_status)
            .map(|rows| rows.into_iter().next())
            .map_err(|source| read_failed(Operation::Read, R::table(), source))
    }

    /// Reads every row matching `hook`, which may also order and page.
    pub fn list<R: Resource>(
        &self,
        show_deleted: bool,
        hook: Option<QueryHook<'_>>,
    ) -> PersistResult<Vec<R>> {
        let started_at = Instant::now();
        let mut query = Query::new(R::SCHEMA);
        query.set_visibility(visibility_for(show_deleted));
        if let Some(hook) = hook {
            hook(&mut query);
        }

        let result = query.render_select().and_then(|rendered| {
            let conn = self.conn.lock();
            fetch_rows::<R>(&conn, &rendered)
        });

        finish(Operation::List, R::table(), started_at, result, |_| "ok")
            .map_err(|source| read_failed(Operation::List, R::table(), source))
    }

    /// Writes `fields` plus `update_time` from `resource`.
    ///
    /// The hook supplies the row predicate; without a hook the update is
    /// scoped to the resource's primary key. Soft-deleted rows are not
    /// matched unless the hook widens visibility.
    ///
    /// # Errors
    /// - `Write` with `UnknownColumn` / `ImmutableColumn` for bad fields;
    ///   `version` counts as immutable here.
    /// - `Write` with `InvalidData` when the hook leaves no predicate.
    pub fn update<R: Resource>(
        &self,
        resource: &R,
        fields: &[&str],
        hook: Option<QueryHook<'_>>,
    ) -> PersistResult<Option<R>> {
        let started_at = Instant::now();
        let mut query = Query::new(R::SCHEMA);
        for field in fields {
            query.column(field);
        }
        match hook {
            Some(hook) => hook(&mut query),
            None => {
                query.where_pk(resource.id());
            }
        }

        let result = render_update(resource, &query)
            .and_then(|rendered| self.in_write_tx(|conn| fetch_rows::<R>(conn, &rendered)));

        finish(Operation::Update, R::table(), started_at, result, row_status)
            .map(single_row::<R>)
            .map_err(|source| write_failed(Operation::Update, R::table(), source))
    }

    /// Soft-deletes the active row with the resource's primary key.
    ///
    /// An already-deleted row is not matched and yields `Ok(None)`.
    pub fn delete<R: Resource>(
        &self,
        resource: &R,
        hook: Option<QueryHook<'_>>,
    ) -> PersistResult<Option<R>> {
        let started_at = Instant::now();
        let mut query = Query::new(R::SCHEMA);
        query.where_pk(resource.id());
        if let Some(hook) = hook {
            hook(&mut query);
        }

        let result = query
            .render_update(&[(DELETE_TIME_COLUMN, SetValue::Now)])
            .and_then(|rendered| self.in_write_tx(|conn| fetch_rows::<R>(conn, &rendered)));

        finish(Operation::Delete, R::table(), started_at, result, row_status)
            .map(single_row::<R>)
            .map_err(|source| write_failed(Operation::Delete, R::table(), source))
    }

    /// Clears `delete_time` on the soft-deleted row with the resource's
    /// primary key. Active rows are not matched and stay untouched.
    pub fn undelete<R: Resource>(
        &self,
        resource: &R,
        hook: Option<QueryHook<'_>>,
    ) -> PersistResult<Option<R>> {
        let started_at = Instant::now();
        let mut query = Query::new(R::SCHEMA);
        query.where_pk(resource.id()).deleted();
        if let Some(hook) = hook {
            hook(&mut query);
        }

        let result = query
            .render_update(&[(DELETE_TIME_COLUMN, SetValue::Null)])
            .and_then(|rendered| self.in_write_tx(|conn| fetch_rows::<R>(conn, &rendered)));

        finish(Operation::Undelete, R::table(), started_at, result, row_status)
            .map(single_row::<R>)
            .map_err(|source| write_failed(Operation::Undelete, R::table(), source))
    }

    /// Publishes `payload` on the `events` channel.
    pub fn notify(&self, payload: &str) -> PersistResult<()> {
        let started_at = Instant::now();
        let result = {
            let conn = self.conn.lock();
            conn.prepare_cached(NOTIFY_SQL)
                .and_then(|mut stmt| stmt.query_row([payload], |_| Ok(())))
                .map_err(DbError::from)
        };

        finish(Operation::Notify, NOTIFY_CHANNEL, started_at, result, |_| "ok")
            .map_err(|source| write_failed(Operation::Notify, NOTIFY_CHANNEL, source))
    }

    /// Registers a listener for the `events` channel.
    pub fn subscribe(&self) -> Receiver<Notification> {
        self.hub.subscribe()
    }

    /// Cancels the statement currently running on this connection.
    ///
    /// The interrupted operation fails and its transaction rolls back.
    /// Calling this while idle has no effect.
    pub fn interrupt(&self) {
        warn!("event=interrupt module=persist status=requested");
        self.interrupt.interrupt();
    }

    /// Runs `f` with the underlying connection, for inspection and setup
    /// that falls outside the façade.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Releases cached statements and closes the connection.
    pub fn close(self) -> PersistResult<()> {
        let conn = self.conn.into_inner();
        conn.flush_prepared_statement_cache();
        match conn.close() {
            Ok(()) => {
                info!("event=persistence_close module=persist status=ok");
                Ok(())
            }
            Err((_conn, err)) => {
                error!("event=persistence_close module=persist status=error error={err}");
                Err(PersistError::Shutdown(err.into()))
            }
        }
    }

    fn in_write_tx<T>(&self, work: impl FnOnce(&Connection) -> DbResult<T>) -> DbResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = work(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

fn provision(conn: &mut Connection, models: &[ModelSchema], raw: &[RawStatement]) -> PersistResult<()> {
    let mut tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|err| schema_failed("transaction begin", err.into()))?;

    for model in models {
        let sql = model
            .create_table_sql()
            .map_err(|err| schema_failed(&format!("table `{}`", model.table), err))?;
        tx.execute_batch(&sql)
            .map_err(|err| schema_failed(&format!("table `{}`", model.table), err.into()))?;
        debug!(
            "event=create_table module=persist status=ok table={}",
            model.table
        );
    }

    for (index, statement) in raw.iter().enumerate() {
        let target = format!("raw statement #{index}");
        let savepoint = tx
            .savepoint()
            .map_err(|err| schema_failed(&target, err.into()))?;
        match savepoint.execute_batch(&statement.sql) {
            Ok(()) => savepoint
                .commit()
                .map_err(|err| schema_failed(&target, err.into()))?,
            Err(err) if statement.err_ok => {
                // Dropping the savepoint rolls back to it.
                drop(savepoint);
                warn!(
                    "event=raw_statement module=persist status=tolerated index={index} error={err}"
                );
            }
            Err(err) => return Err(schema_failed(&target, err.into())),
        }
    }

    tx.commit()
        .map_err(|err| schema_failed("transaction commit", err.into()))
}

fn render_insert<R: Resource>(resource: &R) -> DbResult<Rendered> {
    let common = resource.common();
    common
        .validate()
        .map_err(|err| DbError::InvalidData(err.to_string()))?;

    let mut columns = vec![
        ID_COLUMN,
        CREATE_TIME_COLUMN,
        UPDATE_TIME_COLUMN,
        DELETE_TIME_COLUMN,
        VERSION_COLUMN,
    ];
    let mut placeholders = vec!["?", NOW_MS_SQL, NOW_MS_SQL, "?", "?"];
    let mut params = vec![
        Value::Text(common.id.to_string()),
        Value::from(common.delete_time),
        Value::Integer(common.version_value()?),
    ];

    for (column, value) in resource.column_values() {
        if !R::SCHEMA.columns.iter().any(|def| def.name == column) {
            return Err(DbError::UnknownColumn {
                table: R::table(),
                column: column.to_string(),
            });
        }
        columns.push(column);
        placeholders.push("?");
        params.push(value);
    }

    Ok(Rendered {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            R::table(),
            columns.join(", "),
            placeholders.join(", ")
        ),
        params,
    })
}

fn render_update<R: Resource>(resource: &R, query: &Query) -> DbResult<Rendered> {
    if query.predicate_count() == 0 {
        return Err(DbError::InvalidData(format!(
            "update on `{}` has no predicate and would touch every row",
            R::table()
        )));
    }

    let common = resource.common();
    let mut values = resource.column_values();
    values.push((DELETE_TIME_COLUMN, Value::from(common.delete_time)));

    let mut assignments = vec![(UPDATE_TIME_COLUMN, SetValue::Now)];
    for column in query.columns() {
        let column = column.as_str();
        if column == UPDATE_TIME_COLUMN {
            continue;
        }
        // `version` only moves through `Query::increment_version`.
        if column == ID_COLUMN || column == CREATE_TIME_COLUMN || column == VERSION_COLUMN {
            return Err(DbError::ImmutableColumn {
                table: R::table(),
                column: column.to_string(),
            });
        }
        let value = values
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| DbError::UnknownColumn {
                table: R::table(),
                column: column.to_string(),
            })?;
        assignments.push((column, SetValue::Param(value)));
    }

    query.render_update(&assignments)
}

fn fetch_rows<R: Resource>(conn: &Connection, rendered: &Rendered) -> DbResult<Vec<R>> {
    let mut stmt = conn.prepare(&rendered.sql)?;
    let mut rows = stmt.query(params_from_iter(rendered.params.iter()))?;
    let mut resources = Vec::new();

    while let Some(row) = rows.next()? {
        resources.push(decode_row::<R>(row)?);
    }

    Ok(resources)
}

fn visibility_for(show_deleted: bool) -> Visibility {
    if show_deleted {
        Visibility::WithDeleted
    } else {
        Visibility::Active
    }
}

fn single_row<R: Resource>(rows: Vec<R>) -> Option<R> {
    if rows.len() > 1 {
        warn!(
            "event=multi_row_match module=persist status=warn table={} rows={}",
            R::table(),
            rows.len()
        );
    }
    rows.into_iter().next()
}

fn row_status<R>(rows: &Vec<R>) -> &'static str {
    if rows.is_empty() {
        "not_found"
    } else {
        "ok"
    }
}

fn finish<T>(
    operation: Operation,
    target: &'static str,
    started_at: Instant,
    result: DbResult<T>,
    status: impl FnOnce(&T) -> &'static str,
) -> DbResult<T> {
    match &result {
        Ok(value) => debug!(
            "event={} module=persist status={} table={} duration_ms={}",
            operation,
            status(value),
            target,
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event={} module=persist status=error table={} duration_ms={} error={}",
            operation,
            target,
            started_at.elapsed().as_millis(),
            err
        ),
    }
    result
}

fn init_failed(source: DbError) -> PersistError {
    error!("event=persistence_init module=persist status=error error={source}");
    PersistError::Initialization(source)
}

fn schema_failed(target: &str, source: DbError) -> PersistError {
    PersistError::Schema {
        target: target.to_string(),
        source,
    }
}

fn write_failed(operation: Operation, target: &'static str, source: DbError) -> PersistError {
    PersistError::Write {
        operation,
        target,
        source,
    }
}

fn read_failed(operation: Operation, target: &'static str, source: DbError) -> PersistError {
    PersistError::Read {
        operation,
        target,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::{init_failed, Operation, PersistError, NOTIFY_SQL};
    use crate::db::DbError;
    use crate::notify::NOTIFY_CHANNEL;

    #[test]
    fn notify_statement_targets_the_events_channel() {
        assert!(NOTIFY_SQL.contains(&format!("'{NOTIFY_CHANNEL}'")));
    }

    #[test]
    fn write_error_display_names_operation_and_table() {
        let err = PersistError::Write {
            operation: Operation::Update,
            target: "widgets",
            source: DbError::UnknownColumn {
                table: "widgets",
                column: "colour".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "update on `widgets` failed: unknown column `colour` for table `widgets`"
        );
        assert!(!err.is_interrupted());
    }

    #[test]
    fn initialization_error_wraps_the_storage_error() {
        let err = init_failed(DbError::InvalidData("notify unavailable".to_string()));

        assert!(matches!(err, PersistError::Initialization(_)));
        assert!(err.to_string().starts_with("persistence initialization failed:"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
