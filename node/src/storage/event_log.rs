//! This module implements the append-only event log: a sink that records
//! every published domain event for audit and replay.
//!

use std::sync::Arc;

use sqlite::Value;
use uuid::Uuid;

use crate::db::SqliteConnection;
use crate::events::{Event, EventBus};

use super::{int_value, req_text, req_u64, req_uuid, text_value};

error_chain::error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    links {
        DbError(crate::db::Error, crate::db::ErrorKind);
    }

    foreign_links {
        SqliteError(::sqlite::Error);
        SerdeJsonError(::serde_json::Error);
    }

    errors {
        CorruptRow(table: String) {
            description("row does not match the expected shape")
            display("corrupt row in table `{}`", table)
        }
    }
}

/// One recorded event emission.
#[derive(Clone, Debug)]
pub struct EventRecord {
    /// Identity of the event emission.
    pub event_id: Uuid,

    /// The dotted kind name of the event.
    pub kind: String,

    /// The entity the event is about.
    pub correlation_id: Uuid,

    /// When the event occurred, in epoch milliseconds.
    pub occurred_at: u64,

    /// The JSON serialized envelope.
    pub payload: String,
}

/// The sqlite-backed append-only event log.
pub struct SqliteEventLog {
    /// Connection to the sqlite database.
    db: Arc<SqliteConnection>,
}

impl SqliteEventLog {
    /// Create a new `SqliteEventLog`, creating its table when it does not
    /// exist yet.
    pub fn new(db: Arc<SqliteConnection>) -> Result<Self> {
        db.ensure_table("event_log", r#"
            CREATE TABLE event_log(
                id              TEXT PRIMARY KEY,
                kind            TEXT NOT NULL,
                correlation_id  TEXT NOT NULL,
                occurred_at     INTEGER NOT NULL,
                payload         TEXT NOT NULL,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL
            );
        "#)?;

        Ok(SqliteEventLog { db })
    }

    /// Append one event to the log.
    pub fn append(&self, event: &Event) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        self.db.execute(|conn| -> Result<()> {
            let mut cursor = conn.prepare(r#"
                INSERT INTO event_log(
                    id, kind, correlation_id, occurred_at, payload,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#)?.cursor();
            cursor.bind(&[
                text_value(event.event_id.to_string()),
                text_value(event.payload.kind()),
                text_value(event.correlation_id.to_string()),
                int_value(event.occurred_at),
                text_value(payload),
                int_value(event.occurred_at),
                int_value(event.occurred_at),
            ])?;
            cursor.next()?;
            Ok(())
        })
    }

    /// List the recorded events for one correlation id, oldest first.
    pub fn find_by_correlation(&self, correlation_id: Uuid) -> Result<Vec<EventRecord>> {
        self.db.execute(|conn| -> Result<Vec<EventRecord>> {
            let mut cursor = conn.prepare(r#"
                SELECT id, kind, correlation_id, occurred_at, payload
                FROM event_log WHERE correlation_id = ?
                ORDER BY rowid ASC
            "#)?.cursor();
            cursor.bind(&[text_value(correlation_id.to_string())])?;

            let mut records = Vec::new();
            while let Some(row) = cursor.next()? {
                let record = record_from_row(row)
                    .ok_or_else(|| Error::from(ErrorKind::CorruptRow(String::from("event_log"))))?;
                records.push(record);
            }
            Ok(records)
        })
    }

    /// Register the given log as a subscriber on the given bus. Append
    /// failures are logged and swallowed; the log is best-effort.
    pub fn attach(log: Arc<SqliteEventLog>, bus: &EventBus) {
        bus.subscribe(Box::new(move |event| {
            if let Err(e) = log.append(event) {
                log::error!("failed to append event {} to the event log: {}",
                    event.payload.kind(), e);
            }
        }));
    }
}

/// Deserialize an event record from a database row.
fn record_from_row(row: &[Value]) -> Option<EventRecord> {
    Some(EventRecord {
        event_id: req_uuid(row, 0)?,
        kind: req_text(row, 1)?,
        correlation_id: req_uuid(row, 2)?,
        occurred_at: req_u64(row, 3)?,
        payload: req_text(row, 4)?,
    })
}
