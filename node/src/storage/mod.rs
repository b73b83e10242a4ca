//! This module implements the persistence layer of the judge node: the
//! submission store, the queue store, the ad-hoc execution store and the
//! append-only event log, all backed by one sqlite database.
//!
//! Entities cross into this module as the record types of `entities`; row
//! mapping happens here and nowhere else.
//!

pub mod event_log;
pub mod executions;
pub mod queue;
pub mod submissions;

use std::str::FromStr;
use std::sync::Arc;

use sqlite::Value;
use uuid::Uuid;

use crate::db::SqliteConnection;

pub use event_log::SqliteEventLog;
pub use executions::{ExecutionStore, SqliteExecutionStore};
pub use queue::{QueueStore, SqliteQueueStore};
pub use submissions::{SqliteSubmissionStore, SubmissionStore};

error_chain::error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    links {
        DbError(crate::db::Error, crate::db::ErrorKind);
        EventLogError(event_log::Error, event_log::ErrorKind);
        ExecutionsError(executions::Error, executions::ErrorKind);
        QueueError(queue::Error, queue::ErrorKind);
        SubmissionsError(submissions::Error, submissions::ErrorKind);
    }
}

/// Provide a facade of the storage subsystem used by the judge node.
pub struct AppStorage {
    /// The submission store.
    submissions: Arc<SqliteSubmissionStore>,

    /// The queue store.
    queue: Arc<SqliteQueueStore>,

    /// The ad-hoc execution store.
    executions: Arc<SqliteExecutionStore>,

    /// The append-only event log.
    event_log: Arc<SqliteEventLog>,
}

impl AppStorage {
    /// Create a new `AppStorage` over the given connection, creating any
    /// missing tables.
    pub fn new(db: Arc<SqliteConnection>) -> Result<Self> {
        Ok(AppStorage {
            submissions: Arc::new(SqliteSubmissionStore::new(db.clone())?),
            queue: Arc::new(SqliteQueueStore::new(db.clone())?),
            executions: Arc::new(SqliteExecutionStore::new(db.clone())?),
            event_log: Arc::new(SqliteEventLog::new(db)?),
        })
    }

    /// Get the submission store.
    pub fn submissions(&self) -> Arc<dyn SubmissionStore> {
        self.submissions.clone()
    }

    /// Get the queue store.
    pub fn queue(&self) -> Arc<dyn QueueStore> {
        self.queue.clone()
    }

    /// Get the ad-hoc execution store.
    pub fn executions(&self) -> Arc<dyn ExecutionStore> {
        self.executions.clone()
    }

    /// Get the event log.
    pub fn event_log(&self) -> Arc<SqliteEventLog> {
        self.event_log.clone()
    }
}

// Row mapping helpers shared by the concrete stores. Every helper returns
// `None` on a shape the schema should make impossible; callers surface that
// as a corrupt-row error naming the table.

pub(crate) fn req_text(row: &[Value], index: usize) -> Option<String> {
    row.get(index)?.as_string().map(String::from)
}

pub(crate) fn opt_text(row: &[Value], index: usize) -> Option<String> {
    match row.get(index) {
        Some(Value::Null) | None => None,
        Some(v) => v.as_string().map(String::from),
    }
}

pub(crate) fn req_u64(row: &[Value], index: usize) -> Option<u64> {
    row.get(index)?.as_integer().map(crate::utils::from_db_int)
}

pub(crate) fn opt_u64(row: &[Value], index: usize) -> Option<u64> {
    match row.get(index) {
        Some(Value::Null) | None => None,
        Some(v) => v.as_integer().map(crate::utils::from_db_int),
    }
}

pub(crate) fn req_i64(row: &[Value], index: usize) -> Option<i64> {
    row.get(index)?.as_integer()
}

pub(crate) fn req_uuid(row: &[Value], index: usize) -> Option<Uuid> {
    let text = req_text(row, index)?;
    Uuid::from_str(&text).ok()
}

pub(crate) fn parse_req<T>(row: &[Value], index: usize) -> Option<T>
    where T: FromStr {
    let text = req_text(row, index)?;
    T::from_str(&text).ok()
}

// Bind-side helpers.

pub(crate) fn text_value<T>(value: T) -> Value
    where T: Into<String> {
    Value::String(value.into())
}

pub(crate) fn int_value(value: u64) -> Value {
    Value::Integer(crate::utils::to_db_int(value))
}

pub(crate) fn opt_int_value(value: Option<u64>) -> Value {
    match value {
        Some(v) => int_value(v),
        None => Value::Null,
    }
}

pub(crate) fn opt_text_value(value: Option<&str>) -> Value {
    match value {
        Some(v) => Value::String(String::from(v)),
        None => Value::Null,
    }
}

/// Get the number of rows changed by the most recent statement on the given
/// connection.
pub(crate) fn rows_changed(conn: &sqlite::Connection) -> sqlite::Result<i64> {
    let mut cursor = conn.prepare("SELECT changes()")?.cursor();
    match cursor.next()? {
        Some(row) => Ok(row[0].as_integer().unwrap_or(0)),
        None => Ok(0),
    }
}
