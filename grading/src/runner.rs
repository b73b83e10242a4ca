//! This module implements the per-case runner: execute one program against
//! one grader case through the sandbox and classify what happened.
//!

use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::cases::CaseSpec;
use crate::languages::Language;
use crate::sandbox::{ExecutionReport, ExecutionRequest, Sandbox, Termination};
use crate::verdict::Verdict;

/// Maximum number of bytes of stdout and stderr kept in a case outcome.
/// Larger streams are truncated before they leave the runner.
pub const EXCERPT_LIMIT: usize = 64 * 1024;

/// The graded outcome of one case.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CaseOutcome {
    /// Identifier of the graded case.
    pub case_id: String,

    /// The classification of the case.
    pub verdict: Verdict,

    /// Points awarded: the full case points on acceptance, zero otherwise.
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

    /// Compile diagnostics, when the compile phase failed.
    pub compile_output: String,

    /// Free-form commentary attached by the runner, if any.
    pub feedback: Option<String>,
}

/// Runs single grader cases through a sandbox and classifies the results.
pub struct CaseRunner {
    /// The sandbox all executions are delegated to.
    sandbox: Arc<dyn Sandbox>,
}

impl CaseRunner {
    /// Create a new `CaseRunner` delegating to the given sandbox.
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        CaseRunner { sandbox }
    }

    /// Run the given source program against one grader case and classify
    /// the outcome.
    ///
    /// The runner never fails: a sandbox that cannot produce a report is
    /// classified as an internal error, which callers treat as a
    /// short-circuiting verdict.
    pub fn run(&self, source: &str, language: Language, case: &CaseSpec) -> CaseOutcome {
        let request = ExecutionRequest {
            source: String::from(source),
            language,
            stdin: case.input.clone(),
            time_limit_ms: case.time_limit_ms,
            memory_limit_mb: case.memory_limit_mb,
        };

        let report = match self.sandbox.execute(&request) {
            Ok(report) => report,
            Err(e) => {
                log::error!("sandbox failed on case {}: {}", case.case_id, e);
                return CaseOutcome {
                    case_id: case.case_id.clone(),
                    verdict: Verdict::InternalError,
                    points_awarded: 0,
                    execution_time_ms: 0,
                    memory_used_kb: 0,
                    output_excerpt: String::new(),
                    stderr_excerpt: String::new(),
                    exit_code: 0,
                    compile_output: String::new(),
                    feedback: Some(format!("{}", e)),
                };
            }
        };

        let verdict = classify(language, &report, &case.expected_output);
        let points_awarded = if verdict.is_accepted() { case.points } else { 0 };

        CaseOutcome {
            case_id: case.case_id.clone(),
            verdict,
            points_awarded,
            execution_time_ms: report.wall_time_ms,
            memory_used_kb: report.peak_memory_kb,
            output_excerpt: truncate_excerpt(&report.stdout),
            stderr_excerpt: truncate_excerpt(&report.stderr),
            exit_code: report.exit_code,
            compile_output: truncate_excerpt(&report.compile_output),
            feedback: None,
        }
    }
}

/// Classify a sandbox report against the expected output. The rules are
/// evaluated in order and the first match wins.
fn classify(language: Language, report: &ExecutionReport, expected_output: &str) -> Verdict {
    match report.termination {
        Termination::Internal => return Verdict::InternalError,
        _ => (),
    }

    if language.requires_compilation() && report.compile_failed() {
        return Verdict::CompilationError;
    }

    match report.termination {
        Termination::Timeout => return Verdict::TimeLimitExceeded,
        Termination::MemoryExceeded => return Verdict::MemoryLimitExceeded,
        Termination::Signal(..) => return Verdict::RuntimeError,
        _ => (),
    }

    if report.exit_code != 0 {
        return Verdict::RuntimeError;
    }

    if outputs_match(&report.stdout, expected_output) {
        Verdict::Accepted
    } else {
        Verdict::WrongAnswer
    }
}

/// Compare a program's output against the expected output after
/// normalization: trailing whitespace is trimmed from every line and one
/// trailing newline is dropped from each side, then the remainders are
/// compared byte for byte.
fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize_output(actual) == normalize_output(expected)
}

fn normalize_output(text: &str) -> String {
    let text = text.strip_suffix('\n').unwrap_or(text);
    let lines: Vec<&str> = text
        .split('\n')
        .map(|line| line.trim_end_matches(|c: char| c == ' ' || c == '\t' || c == '\r'))
        .collect();
    lines.join("\n")
}

/// Truncate a stream excerpt to `EXCERPT_LIMIT` bytes, cutting on a
/// character boundary.
pub fn truncate_excerpt(text: &str) -> String {
    if text.len() <= EXCERPT_LIMIT {
        return String::from(text);
    }

    let mut end = EXCERPT_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&text[..end])
}
