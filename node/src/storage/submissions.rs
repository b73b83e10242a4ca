//! This module implements the submission store: persistence for submissions
//! and their per-case results, and the queries the services and the
//! dispatcher need.
//!

use std::str::FromStr;
use std::sync::Arc;

use sqlite::Value;
use uuid::Uuid;

use grading::Verdict;

use crate::db::SqliteConnection;
use crate::entities::{CaseResult, ExecutionStatus, Metadata, Submission};
use crate::utils::now_millis;

use super::{int_value, opt_int_value, opt_text_value, parse_req, req_text, req_u64, req_uuid, rows_changed, text_value};

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
        SubmissionNotFound(id: String) {
            description("submission not found")
            display("submission not found: {}", id)
        }

        NotTerminal(id: String) {
            description("submission is not in a terminal status")
            display("submission is not in a terminal status: {}", id)
        }

        InvalidTransition(id: String, expected: String) {
            description("submission is not in the expected status")
            display("submission {} is not {}", id, expected)
        }

        CorruptRow(table: String) {
            description("row does not match the expected shape")
            display("corrupt row in table `{}`", table)
        }
    }
}

/// The persistence contract for submissions and their case results.
pub trait SubmissionStore: Send + Sync {
    /// Persist a freshly created submission.
    fn create(&self, submission: &Submission) -> Result<()>;

    /// Load a submission, including its case results in case order.
    fn find_by_id(&self, id: Uuid) -> Result<Option<Submission>>;

    /// Move a PENDING submission to RUNNING. Fails when the submission is
    /// not PENDING, which keeps two workers from racing the same
    /// submission through mismatched leases.
    fn mark_running(&self, id: Uuid) -> Result<()>;

    /// Return a RUNNING submission to PENDING after its worker lost the
    /// lease. A submission in any other status is left untouched.
    fn mark_pending(&self, id: Uuid) -> Result<()>;

    /// Write the terminal COMPLETED state of a judged submission: verdict,
    /// accumulators, compile diagnostics, `judged_at` and the case results,
    /// in one operation.
    fn finalize(&self, submission: &Submission) -> Result<()>;

    /// Move a submission to FAILED with an INTERNAL_ERROR verdict.
    fn finalize_failed(&self, id: Uuid) -> Result<()>;

    /// Reset a terminal submission back to PENDING for a rejudge: clears
    /// the verdict, the accumulators and the prior case results. Fails with
    /// `NotTerminal` when the submission is still PENDING or RUNNING.
    fn reset_for_rejudge(&self, id: Uuid) -> Result<()>;

    /// List the submissions of a user, newest first.
    fn find_by_user(&self, user_id: Uuid, limit: usize) -> Result<Vec<Submission>>;

    /// List the submissions against a problem, newest first.
    fn find_by_problem(&self, problem_id: Uuid, limit: usize) -> Result<Vec<Submission>>;

    /// List the newest submissions across all problems.
    fn find_recent(&self, limit: usize) -> Result<Vec<Submission>>;

    /// Count submissions in the given status.
    fn count_by_status(&self, status: ExecutionStatus) -> Result<u64>;
}

/// The sqlite-backed submission store.
pub struct SqliteSubmissionStore {
    /// Connection to the sqlite database.
    db: Arc<SqliteConnection>,
}

impl SqliteSubmissionStore {
    /// Create a new `SqliteSubmissionStore`, creating its tables when they
    /// do not exist yet.
    pub fn new(db: Arc<SqliteConnection>) -> Result<Self> {
        db.ensure_table("submissions", r#"
            CREATE TABLE submissions(
                id                  TEXT PRIMARY KEY,
                problem_id          TEXT NOT NULL,
                user_id             TEXT NOT NULL,
                source              TEXT NOT NULL,
                language            TEXT NOT NULL,
                status              TEXT NOT NULL,
                result              TEXT NOT NULL,
                total_points        INTEGER NOT NULL,
                max_points          INTEGER NOT NULL,
                execution_time_ms   INTEGER NOT NULL,
                memory_usage_kb     INTEGER NOT NULL,
                compile_error       TEXT NOT NULL,
                metadata            TEXT NOT NULL,
                created_at          INTEGER NOT NULL,
                updated_at          INTEGER NOT NULL,
                judged_at           INTEGER
            );
        "#)?;
        db.ensure_table("case_results", r#"
            CREATE TABLE case_results(
                id                  TEXT PRIMARY KEY,
                submission_id       TEXT NOT NULL,
                case_id             TEXT NOT NULL,
                verdict             TEXT NOT NULL,
                points_awarded      INTEGER NOT NULL,
                execution_time_ms   INTEGER NOT NULL,
                memory_used_kb      INTEGER NOT NULL,
                output_excerpt      TEXT NOT NULL,
                stderr_excerpt      TEXT NOT NULL,
                exit_code           INTEGER NOT NULL,
                feedback            TEXT,
                created_at          INTEGER NOT NULL,
                updated_at          INTEGER NOT NULL
            );
        "#)?;

        Ok(SqliteSubmissionStore { db })
    }

    /// Insert the case results of a submission. Must run inside a closure
    /// that already holds the connection.
    fn insert_case_results(conn: &sqlite::Connection, results: &[CaseResult]) -> Result<()> {
        for result in results {
            let mut cursor = conn.prepare(r#"
                INSERT INTO case_results(
                    id, submission_id, case_id, verdict, points_awarded,
                    execution_time_ms, memory_used_kb, output_excerpt,
                    stderr_excerpt, exit_code, feedback, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#)?.cursor();
            cursor.bind(&[
                text_value(result.id.to_string()),
                text_value(result.submission_id.to_string()),
                text_value(result.case_id.clone()),
                text_value(result.verdict.code()),
                int_value(u64::from(result.points_awarded)),
                int_value(result.execution_time_ms),
                int_value(result.memory_used_kb),
                text_value(result.output_excerpt.clone()),
                text_value(result.stderr_excerpt.clone()),
                Value::Integer(i64::from(result.exit_code)),
                opt_text_value(result.feedback.as_deref()),
                int_value(result.created_at),
                int_value(result.created_at),
            ])?;
            cursor.next()?;
        }
        Ok(())
    }

    /// Load the case results of a submission, in insertion order.
    fn load_case_results(conn: &sqlite::Connection, submission_id: Uuid) -> Result<Vec<CaseResult>> {
        let mut cursor = conn.prepare(r#"
            SELECT id, submission_id, case_id, verdict, points_awarded,
                   execution_time_ms, memory_used_kb, output_excerpt,
                   stderr_excerpt, exit_code, feedback, created_at
            FROM case_results WHERE submission_id = ? ORDER BY rowid ASC
        "#)?.cursor();
        cursor.bind(&[text_value(submission_id.to_string())])?;

        let mut results = Vec::new();
        while let Some(row) = cursor.next()? {
            let result = case_result_from_row(row)
                .ok_or_else(|| Error::from(ErrorKind::CorruptRow(String::from("case_results"))))?;
            results.push(result);
        }
        Ok(results)
    }

    /// Run a listing query returning full submissions. The query must
    /// select the submission column set and take a single bound parameter
    /// unless `bind` is `None`.
    fn query_submissions(&self, stmt: &str, bind: Option<Value>, limit: usize) -> Result<Vec<Submission>> {
        self.db.execute(|conn| -> Result<Vec<Submission>> {
            let mut cursor = conn.prepare(stmt)?.cursor();
            let limit_value = Value::Integer(limit as i64);
            match bind {
                Some(value) => cursor.bind(&[value, limit_value])?,
                None => cursor.bind(&[limit_value])?,
            }

            let mut submissions = Vec::new();
            while let Some(row) = cursor.next()? {
                let mut submission = submission_from_row(row)
                    .ok_or_else(|| Error::from(ErrorKind::CorruptRow(String::from("submissions"))))?;
                submission.case_results = Self::load_case_results(conn, submission.id)?;
                submissions.push(submission);
            }
            Ok(submissions)
        })
    }
}

const SUBMISSION_COLUMNS: &str = r#"
    id, problem_id, user_id, source, language, status, result,
    total_points, max_points, execution_time_ms, memory_usage_kb,
    compile_error, metadata, created_at, updated_at, judged_at
"#;

impl SubmissionStore for SqliteSubmissionStore {
    fn create(&self, submission: &Submission) -> Result<()> {
        let metadata = serde_json::to_string(&submission.metadata)?;
        self.db.execute(|conn| -> Result<()> {
            let mut cursor = conn.prepare(r#"
                INSERT INTO submissions(
                    id, problem_id, user_id, source, language, status, result,
                    total_points, max_points, execution_time_ms, memory_usage_kb,
                    compile_error, metadata, created_at, updated_at, judged_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#)?.cursor();
            cursor.bind(&[
                text_value(submission.id.to_string()),
                text_value(submission.problem_id.to_string()),
                text_value(submission.user_id.to_string()),
                text_value(submission.source.clone()),
                text_value(submission.language.to_string()),
                text_value(submission.status.to_string()),
                text_value(submission.result.code()),
                int_value(u64::from(submission.total_points)),
                int_value(u64::from(submission.max_points)),
                int_value(submission.execution_time_ms),
                int_value(submission.memory_usage_kb),
                text_value(submission.compile_error.clone()),
                text_value(metadata),
                int_value(submission.created_at),
                int_value(submission.updated_at),
                opt_int_value(submission.judged_at),
            ])?;
            cursor.next()?;
            Ok(())
        })?;

        log::debug!("submission {} persisted", submission.id);
        Ok(())
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<Submission>> {
        self.db.execute(|conn| -> Result<Option<Submission>> {
            let stmt = format!("SELECT {} FROM submissions WHERE id = ?", SUBMISSION_COLUMNS);
            let mut cursor = conn.prepare(&stmt)?.cursor();
            cursor.bind(&[text_value(id.to_string())])?;

            match cursor.next()? {
                Some(row) => {
                    let mut submission = submission_from_row(row)
                        .ok_or_else(|| Error::from(ErrorKind::CorruptRow(String::from("submissions"))))?;
                    submission.case_results = Self::load_case_results(conn, id)?;
                    Ok(Some(submission))
                }
                None => Ok(None),
            }
        })
    }

    fn mark_running(&self, id: Uuid) -> Result<()> {
        let changed = self.db.execute(|conn| -> Result<i64> {
            let mut cursor = conn.prepare(r#"
                UPDATE submissions SET status = 'RUNNING', updated_at = ?
                WHERE id = ? AND status = 'PENDING'
            "#)?.cursor();
            cursor.bind(&[int_value(now_millis()), text_value(id.to_string())])?;
            cursor.next()?;
            Ok(rows_changed(conn)?)
        })?;

        if changed == 0 {
            return Err(Error::from(ErrorKind::InvalidTransition(
                id.to_string(), String::from("PENDING"))));
        }
        Ok(())
    }

    fn mark_pending(&self, id: Uuid) -> Result<()> {
        self.db.execute(|conn| -> Result<()> {
            let mut cursor = conn.prepare(r#"
                UPDATE submissions SET status = 'PENDING', updated_at = ?
                WHERE id = ? AND status = 'RUNNING'
            "#)?.cursor();
            cursor.bind(&[int_value(now_millis()), text_value(id.to_string())])?;
            cursor.next()?;
            Ok(())
        })
    }

    fn finalize(&self, submission: &Submission) -> Result<()> {
        let judged_at = submission.judged_at.unwrap_or_else(now_millis);
        self.db.execute(|conn| -> Result<()> {
            let mut cursor = conn.prepare(r#"
                UPDATE submissions SET
                    status = ?, result = ?, total_points = ?,
                    execution_time_ms = ?, memory_usage_kb = ?,
                    compile_error = ?, updated_at = ?, judged_at = ?
                WHERE id = ?
            "#)?.cursor();
            cursor.bind(&[
                text_value(submission.status.to_string()),
                text_value(submission.result.code()),
                int_value(u64::from(submission.total_points)),
                int_value(submission.execution_time_ms),
                int_value(submission.memory_usage_kb),
                text_value(submission.compile_error.clone()),
                int_value(now_millis()),
                int_value(judged_at),
                text_value(submission.id.to_string()),
            ])?;
            cursor.next()?;
            if rows_changed(conn)? == 0 {
                return Err(Error::from(ErrorKind::SubmissionNotFound(submission.id.to_string())));
            }

            Self::insert_case_results(conn, &submission.case_results)
        })
    }

    fn finalize_failed(&self, id: Uuid) -> Result<()> {
        let changed = self.db.execute(|conn| -> Result<i64> {
            let mut cursor = conn.prepare(r#"
                UPDATE submissions SET
                    status = 'FAILED', result = 'IE', updated_at = ?, judged_at = ?
                WHERE id = ?
            "#)?.cursor();
            let now = now_millis();
            cursor.bind(&[int_value(now), int_value(now), text_value(id.to_string())])?;
            cursor.next()?;
            Ok(rows_changed(conn)?)
        })?;

        if changed == 0 {
            return Err(Error::from(ErrorKind::SubmissionNotFound(id.to_string())));
        }
        Ok(())
    }

    fn reset_for_rejudge(&self, id: Uuid) -> Result<()> {
        self.db.execute(|conn| -> Result<()> {
            let mut cursor = conn.prepare(r#"
                UPDATE submissions SET
                    status = 'PENDING', result = 'PENDING', total_points = 0,
                    execution_time_ms = 0, memory_usage_kb = 0,
                    compile_error = '', updated_at = ?, judged_at = NULL
                WHERE id = ? AND status IN ('COMPLETED', 'FAILED')
            "#)?.cursor();
            cursor.bind(&[int_value(now_millis()), text_value(id.to_string())])?;
            cursor.next()?;
            if rows_changed(conn)? == 0 {
                return Err(Error::from(ErrorKind::NotTerminal(id.to_string())));
            }

            let mut cursor = conn.prepare("DELETE FROM case_results WHERE submission_id = ?")?
                .cursor();
            cursor.bind(&[text_value(id.to_string())])?;
            cursor.next()?;
            Ok(())
        })
    }

    fn find_by_user(&self, user_id: Uuid, limit: usize) -> Result<Vec<Submission>> {
        let stmt = format!(
            "SELECT {} FROM submissions WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
            SUBMISSION_COLUMNS);
        self.query_submissions(&stmt, Some(text_value(user_id.to_string())), limit)
    }

    fn find_by_problem(&self, problem_id: Uuid, limit: usize) -> Result<Vec<Submission>> {
        let stmt = format!(
            "SELECT {} FROM submissions WHERE problem_id = ? ORDER BY created_at DESC LIMIT ?",
            SUBMISSION_COLUMNS);
        self.query_submissions(&stmt, Some(text_value(problem_id.to_string())), limit)
    }

    fn find_recent(&self, limit: usize) -> Result<Vec<Submission>> {
        let stmt = format!(
            "SELECT {} FROM submissions ORDER BY created_at DESC LIMIT ?",
            SUBMISSION_COLUMNS);
        self.query_submissions(&stmt, None, limit)
    }

    fn count_by_status(&self, status: ExecutionStatus) -> Result<u64> {
        self.db.execute(|conn| -> Result<u64> {
            let mut cursor = conn.prepare("SELECT COUNT(*) FROM submissions WHERE status = ?")?
                .cursor();
            cursor.bind(&[text_value(status.to_string())])?;
            match cursor.next()? {
                Some(row) => Ok(req_u64(row, 0).unwrap_or(0)),
                None => Ok(0),
            }
        })
    }
}

/// Deserialize a submission from a database row selected with
/// `SUBMISSION_COLUMNS`. Case results are loaded separately.
fn submission_from_row(row: &[Value]) -> Option<Submission> {
    let metadata: Metadata = match req_text(row, 12) {
        Some(text) => serde_json::from_str(&text).ok()?,
        None => return None,
    };

    Some(Submission {
        id: req_uuid(row, 0)?,
        problem_id: req_uuid(row, 1)?,
        user_id: req_uuid(row, 2)?,
        source: req_text(row, 3)?,
        language: parse_req(row, 4)?,
        status: parse_req(row, 5)?,
        result: parse_req(row, 6)?,
        total_points: req_u64(row, 7)? as u32,
        max_points: req_u64(row, 8)? as u32,
        execution_time_ms: req_u64(row, 9)?,
        memory_usage_kb: req_u64(row, 10)?,
        compile_error: req_text(row, 11)?,
        case_results: Vec::new(),
        metadata,
        created_at: req_u64(row, 13)?,
        updated_at: req_u64(row, 14)?,
        judged_at: super::opt_u64(row, 15),
    })
}

/// Deserialize a case result from a database row.
fn case_result_from_row(row: &[Value]) -> Option<CaseResult> {
    Some(CaseResult {
        id: req_uuid(row, 0)?,
        submission_id: req_uuid(row, 1)?,
        case_id: req_text(row, 2)?,
        verdict: Verdict::from_str(&req_text(row, 3)?).ok()?,
        points_awarded: req_u64(row, 4)? as u32,
        execution_time_ms: req_u64(row, 5)?,
        memory_used_kb: req_u64(row, 6)?,
        output_excerpt: req_text(row, 7)?,
        stderr_excerpt: req_text(row, 8)?,
        exit_code: super::req_i64(row, 9)? as i32,
        feedback: super::opt_text(row, 10),
        created_at: req_u64(row, 11)?,
    })
}
