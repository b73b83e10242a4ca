//! This module implements the store for ad-hoc code executions.
//!

use std::sync::Arc;

use sqlite::Value;
use uuid::Uuid;

use crate::db::SqliteConnection;
use crate::entities::{CodeExecution, ExecutionResult};

use super::{int_value, opt_text, parse_req, req_text, req_u64, req_uuid, rows_changed, text_value};

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

/// The persistence contract for ad-hoc executions.
pub trait ExecutionStore: Send + Sync {
    /// Persist an execution record, inserting or replacing by id.
    fn save(&self, execution: &CodeExecution) -> Result<()>;

    /// Load an execution record.
    fn find_by_id(&self, id: Uuid) -> Result<Option<CodeExecution>>;

    /// List the newest execution records.
    fn find_recent(&self, limit: usize) -> Result<Vec<CodeExecution>>;

    /// Delete execution records created before the given cutoff. Returns
    /// the number of deleted records.
    fn purge_older_than(&self, created_before: u64) -> Result<u64>;
}

/// The sqlite-backed execution store.
pub struct SqliteExecutionStore {
    /// Connection to the sqlite database.
    db: Arc<SqliteConnection>,
}

const EXECUTION_COLUMNS: &str = r#"
    id, source, language, stdin, time_limit_ms, memory_limit_mb,
    status, result, created_at, updated_at
"#;

impl SqliteExecutionStore {
    /// Create a new `SqliteExecutionStore`, creating its table when it does
    /// not exist yet.
    pub fn new(db: Arc<SqliteConnection>) -> Result<Self> {
        db.ensure_table("code_executions", r#"
            CREATE TABLE code_executions(
                id              TEXT PRIMARY KEY,
                source          TEXT NOT NULL,
                language        TEXT NOT NULL,
                stdin           TEXT NOT NULL,
                time_limit_ms   INTEGER NOT NULL,
                memory_limit_mb INTEGER NOT NULL,
                status          TEXT NOT NULL,
                result          TEXT,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL
            );
        "#)?;

        Ok(SqliteExecutionStore { db })
    }
}

impl ExecutionStore for SqliteExecutionStore {
    fn save(&self, execution: &CodeExecution) -> Result<()> {
        let result_json = match &execution.result {
            Some(result) => Some(serde_json::to_string(result)?),
            None => None,
        };

        self.db.execute(|conn| -> Result<()> {
            let mut cursor = conn.prepare(r#"
                INSERT OR REPLACE INTO code_executions(
                    id, source, language, stdin, time_limit_ms,
                    memory_limit_mb, status, result, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#)?.cursor();
            cursor.bind(&[
                text_value(execution.id.to_string()),
                text_value(execution.source.clone()),
                text_value(execution.language.to_string()),
                text_value(execution.stdin.clone()),
                int_value(execution.time_limit_ms),
                int_value(execution.memory_limit_mb),
                text_value(execution.status.to_string()),
                super::opt_text_value(result_json.as_deref()),
                int_value(execution.created_at),
                int_value(execution.updated_at),
            ])?;
            cursor.next()?;
            Ok(())
        })
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<CodeExecution>> {
        self.db.execute(|conn| -> Result<Option<CodeExecution>> {
            let stmt = format!("SELECT {} FROM code_executions WHERE id = ?", EXECUTION_COLUMNS);
            let mut cursor = conn.prepare(&stmt)?.cursor();
            cursor.bind(&[text_value(id.to_string())])?;

            match cursor.next()? {
                Some(row) => {
                    let execution = execution_from_row(row)
                        .ok_or_else(|| Error::from(ErrorKind::CorruptRow(String::from("code_executions"))))?;
                    Ok(Some(execution))
                }
                None => Ok(None),
            }
        })
    }

    fn find_recent(&self, limit: usize) -> Result<Vec<CodeExecution>> {
        self.db.execute(|conn| -> Result<Vec<CodeExecution>> {
            let stmt = format!(
                "SELECT {} FROM code_executions ORDER BY created_at DESC LIMIT ?",
                EXECUTION_COLUMNS);
            let mut cursor = conn.prepare(&stmt)?.cursor();
            cursor.bind(&[Value::Integer(limit as i64)])?;

            let mut executions = Vec::new();
            while let Some(row) = cursor.next()? {
                let execution = execution_from_row(row)
                    .ok_or_else(|| Error::from(ErrorKind::CorruptRow(String::from("code_executions"))))?;
                executions.push(execution);
            }
            Ok(executions)
        })
    }

    fn purge_older_than(&self, created_before: u64) -> Result<u64> {
        let purged = self.db.execute(|conn| -> Result<i64> {
            let mut cursor = conn.prepare("DELETE FROM code_executions WHERE created_at < ?")?
                .cursor();
            cursor.bind(&[int_value(created_before)])?;
            cursor.next()?;
            Ok(rows_changed(conn)?)
        })?;
        Ok(purged as u64)
    }
}

/// Deserialize an execution record from a database row selected with
/// `EXECUTION_COLUMNS`.
fn execution_from_row(row: &[Value]) -> Option<CodeExecution> {
    let result: Option<ExecutionResult> = match opt_text(row, 7) {
        Some(text) => Some(serde_json::from_str(&text).ok()?),
        None => None,
    };

    Some(CodeExecution {
        id: req_uuid(row, 0)?,
        source: req_text(row, 1)?,
        language: parse_req(row, 2)?,
        stdin: req_text(row, 3)?,
        time_limit_ms: req_u64(row, 4)?,
        memory_limit_mb: req_u64(row, 5)?,
        status: parse_req(row, 6)?,
        result,
        created_at: req_u64(row, 8)?,
        updated_at: req_u64(row, 9)?,
    })
}
