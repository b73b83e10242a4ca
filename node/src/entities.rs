//! This module defines the closed record types the judge node operates on.
//!
//! Row and JSON mapping for these entities happens only at the persistence
//! boundary (the `storage` module); nothing in here knows how it is stored.
//!

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use grading::{CaseOutcome, Language, Termination, Verdict};

use crate::utils::now_millis;

/// The default number of retries a queue item is granted before it is
/// abandoned.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// The execution state of a submission, a queue item or an ad-hoc
/// execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Waiting to be picked up.
    Pending,

    /// Currently owned by a worker.
    Running,

    /// Finished normally.
    Completed,

    /// Finished abnormally.
    Failed,

    /// Cancelled before completion.
    Cancelled,
}

impl ExecutionStatus {
    /// Determine whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        use ExecutionStatus::*;
        matches!(self, Completed | Failed | Cancelled)
    }
}

impl Display for ExecutionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use ExecutionStatus::*;
        match self {
            Pending => f.write_str("PENDING"),
            Running => f.write_str("RUNNING"),
            Completed => f.write_str("COMPLETED"),
            Failed => f.write_str("FAILED"),
            Cancelled => f.write_str("CANCELLED"),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        use ExecutionStatus::*;
        match s {
            "PENDING" => Ok(Pending),
            "RUNNING" => Ok(Running),
            "COMPLETED" => Ok(Completed),
            "FAILED" => Ok(Failed),
            "CANCELLED" => Ok(Cancelled),
            _ => Err(()),
        }
    }
}

/// A free-form metadata bag attached to submissions and queue items.
pub type Metadata = HashMap<String, serde_json::Value>;

/// The canonical unit of work: a user-authored program submitted against a
/// problem.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Submission {
    /// Identity of the submission, assigned at creation and immutable.
    pub id: Uuid,

    /// The problem the submission was made against.
    pub problem_id: Uuid,

    /// The submitting user.
    pub user_id: Uuid,

    /// The submitted source text.
    pub source: String,

    /// The language the source text is written in.
    pub language: Language,

    /// The execution state of the submission.
    pub status: ExecutionStatus,

    /// The verdict. `Pending` until the submission reaches a terminal
    /// status.
    pub result: Verdict,

    /// Points collected so far. Monotonically non-decreasing during a judge
    /// run and never greater than `max_points`.
    pub total_points: u32,

    /// The maximum points the problem's case manifest can award, fixed at
    /// creation time.
    pub max_points: u32,

    /// Maximum wall time over all graded cases, in milliseconds.
    pub execution_time_ms: u64,

    /// Maximum peak memory over all graded cases, in kilobytes.
    pub memory_usage_kb: u64,

    /// Compile diagnostics, when the verdict is a compilation error.
    pub compile_error: String,

    /// Per-case results, in case order. Owned by the submission.
    pub case_results: Vec<CaseResult>,

    /// Free-form metadata supplied by the caller.
    pub metadata: Metadata,

    /// Creation timestamp, in epoch milliseconds.
    pub created_at: u64,

    /// Last update timestamp, in epoch milliseconds.
    pub updated_at: u64,

    /// Timestamp of the terminal transition, in epoch milliseconds. Set if
    /// and only if the status is COMPLETED or FAILED.
    pub judged_at: Option<u64>,
}

impl Submission {
    /// Create a new pending submission.
    pub fn new(
        user_id: Uuid,
        problem_id: Uuid,
        source: String,
        language: Language,
        max_points: u32,
        metadata: Metadata) -> Self {
        let now = now_millis();
        Submission {
            id: Uuid::new_v4(),
            problem_id,
            user_id,
            source,
            language,
            status: ExecutionStatus::Pending,
            result: Verdict::Pending,
            total_points: 0,
            max_points,
            execution_time_ms: 0,
            memory_usage_kb: 0,
            compile_error: String::new(),
            case_results: Vec::new(),
            metadata,
            created_at: now,
            updated_at: now,
            judged_at: None,
        }
    }

    /// Append a case result and fold its statistics into the accumulators.
    pub fn add_case_result(&mut self, result: CaseResult) {
        self.total_points += result.points_awarded;
        self.execution_time_ms = self.execution_time_ms.max(result.execution_time_ms);
        self.memory_usage_kb = self.memory_usage_kb.max(result.memory_used_kb);
        self.case_results.push(result);
        self.updated_at = now_millis();
    }

    /// Determine whether the submission has reached a terminal status.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Get the collected points as a percentage of the maximum.
    pub fn score_percentage(&self) -> f64 {
        if self.max_points == 0 {
            return 0.0;
        }
        f64::from(self.total_points) / f64::from(self.max_points) * 100.0
    }
}

/// The outcome of one grader case, owned by its submission and never
/// mutated after insertion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseResult {
    /// Identity of the case result.
    pub id: Uuid,

    /// The owning submission.
    pub submission_id: Uuid,

    /// Identifier of the graded case, opaque to the core.
    pub case_id: String,

    /// The classification of the case.
    pub verdict: Verdict,

    /// Points awarded on this case.
    pub points_awarded: u32,

    /// Wall time consumed, in milliseconds.
    pub execution_time_ms: u64,

    /// Peak memory consumption, in kilobytes.
    pub memory_used_kb: u64,

    /// Truncated view of the program's standard output.
    pub output_excerpt: String,

    /// Truncated view of the program's standard error.
    pub stderr_excerpt: String,

    /// Exit code of the program.
    pub exit_code: i32,

    /// Free-form commentary attached by the runner, if any.
    pub feedback: Option<String>,

    /// Creation timestamp, in epoch milliseconds.
    pub created_at: u64,
}

impl CaseResult {
    /// Build a case result row from a runner outcome.
    pub fn from_outcome(submission_id: Uuid, outcome: CaseOutcome) -> Self {
        CaseResult {
            id: Uuid::new_v4(),
            submission_id,
            case_id: outcome.case_id,
            verdict: outcome.verdict,
            points_awarded: outcome.points_awarded,
            execution_time_ms: outcome.execution_time_ms,
            memory_used_kb: outcome.memory_used_kb,
            output_excerpt: outcome.output_excerpt,
            stderr_excerpt: outcome.stderr_excerpt,
            exit_code: outcome.exit_code,
            feedback: outcome.feedback,
            created_at: now_millis(),
        }
    }
}

/// One pending unit of scheduler work, pairing a submission with its
/// priority, retry budget and lease state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueItem {
    /// Identity of the queue item.
    pub id: Uuid,

    /// The submission this item schedules.
    pub submission_id: Uuid,

    /// Scheduling priority; higher claims earlier.
    pub priority: i32,

    /// Number of times this item has been returned to the queue.
    pub retry_count: u32,

    /// The retry budget.
    pub max_retries: u32,

    /// The lease state of the item.
    pub status: ExecutionStatus,

    /// The worker currently holding the lease, when RUNNING.
    pub worker_id: Option<String>,

    /// Free-form metadata.
    pub metadata: Metadata,

    /// Creation timestamp, in epoch milliseconds.
    pub created_at: u64,

    /// Last update timestamp, in epoch milliseconds.
    pub updated_at: u64,

    /// When the lease was handed to the worker.
    pub assigned_at: Option<u64>,

    /// When the worker started processing.
    pub started_at: Option<u64>,

    /// When the item reached a terminal status.
    pub completed_at: Option<u64>,

    /// The failure message, when the item failed.
    pub error_message: Option<String>,
}

impl QueueItem {
    /// Create a new pending queue item for the given submission.
    pub fn new(submission_id: Uuid, priority: i32) -> Self {
        let now = now_millis();
        QueueItem {
            id: Uuid::new_v4(),
            submission_id,
            priority,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            status: ExecutionStatus::Pending,
            worker_id: None,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    /// Determine whether the item may be returned to the queue once more.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Determine whether the item still occupies the queue, i.e. is neither
    /// COMPLETED nor FAILED.
    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// An ad-hoc execution attempt with no problem association.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CodeExecution {
    /// Identity of the execution.
    pub id: Uuid,

    /// The executed source text.
    pub source: String,

    /// The language the source text is written in.
    pub language: Language,

    /// Data fed to the program's standard input.
    pub stdin: String,

    /// Wall time limit, in milliseconds.
    pub time_limit_ms: u64,

    /// Memory limit, in megabytes.
    pub memory_limit_mb: u64,

    /// The state of the execution.
    pub status: ExecutionStatus,

    /// The produced result, once the execution finished.
    pub result: Option<ExecutionResult>,

    /// Creation timestamp, in epoch milliseconds.
    pub created_at: u64,

    /// Last update timestamp, in epoch milliseconds.
    pub updated_at: u64,
}

impl CodeExecution {
    /// Create a new pending ad-hoc execution.
    pub fn new(
        source: String,
        language: Language,
        stdin: String,
        time_limit_ms: u64,
        memory_limit_mb: u64) -> Self {
        let now = now_millis();
        CodeExecution {
            id: Uuid::new_v4(),
            source,
            language,
            stdin,
            time_limit_ms,
            memory_limit_mb,
            status: ExecutionStatus::Pending,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach the produced result and move the execution to its terminal
    /// status.
    pub fn set_result(&mut self, result: ExecutionResult) {
        self.status = match result.termination {
            Termination::Normal if result.exit_code == 0 => ExecutionStatus::Completed,
            _ => ExecutionStatus::Failed,
        };
        self.result = Some(result);
        self.updated_at = now_millis();
    }
}

/// What an ad-hoc execution produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Truncated view of the program's standard output.
    pub stdout: String,

    /// Truncated view of the program's standard error.
    pub stderr: String,

    /// Exit code of the program.
    pub exit_code: i32,

    /// Wall time consumed, in milliseconds.
    pub wall_time_ms: u64,

    /// Peak memory consumption, in kilobytes.
    pub memory_used_kb: u64,

    /// How the program terminated.
    pub termination: Termination,
}
