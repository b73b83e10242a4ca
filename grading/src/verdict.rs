//! This module defines the verdict enumeration and the rules that reduce a
//! sequence of per-case outcomes into the verdict of a whole submission.
//!

use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::runner::CaseOutcome;

/// The classification of a submission or of a single grader case.
///
/// Verdicts carry a total severity order; when a submission has several
/// case outcomes, the most severe one wins. `Pending` is only ever used at
/// the submission level, before any case has been graded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Verdict {
    /// Not judged yet.
    #[cfg_attr(feature = "serde", serde(rename = "PENDING"))]
    Pending,

    /// The output matched the expected output.
    #[cfg_attr(feature = "serde", serde(rename = "AC"))]
    Accepted,

    /// The output did not match the expected output.
    #[cfg_attr(feature = "serde", serde(rename = "WA"))]
    WrongAnswer,

    /// The program crashed or exited with a non-zero code.
    #[cfg_attr(feature = "serde", serde(rename = "RE"))]
    RuntimeError,

    /// The program exceeded the time limit.
    #[cfg_attr(feature = "serde", serde(rename = "TLE"))]
    TimeLimitExceeded,

    /// The program exceeded the memory limit.
    #[cfg_attr(feature = "serde", serde(rename = "MLE"))]
    MemoryLimitExceeded,

    /// The compile phase failed.
    #[cfg_attr(feature = "serde", serde(rename = "CE"))]
    CompilationError,

    /// The judge itself failed while grading.
    #[cfg_attr(feature = "serde", serde(rename = "IE"))]
    InternalError,
}

impl Verdict {
    /// Get the severity rank of this verdict. Higher ranks win when
    /// aggregating case outcomes. `Pending` has no rank in the order and
    /// sits below everything.
    pub fn severity(&self) -> u32 {
        use Verdict::*;
        match self {
            Pending => 0,
            Accepted => 1,
            WrongAnswer => 2,
            RuntimeError => 3,
            TimeLimitExceeded => 4,
            MemoryLimitExceeded => 5,
            CompilationError => 6,
            InternalError => 7,
        }
    }

    /// Determine whether this verdict is a terminal classification, as
    /// opposed to `Pending`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Verdict::Pending)
    }

    /// Determine whether this verdict halts further case execution for the
    /// same submission.
    pub fn short_circuits(&self) -> bool {
        matches!(self, Verdict::CompilationError | Verdict::InternalError)
    }

    /// Determine whether this verdict is `Verdict::Accepted`.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }

    /// Get the conventional short code of the verdict.
    pub fn code(&self) -> &'static str {
        use Verdict::*;
        match self {
            Pending => "PENDING",
            Accepted => "AC",
            WrongAnswer => "WA",
            RuntimeError => "RE",
            TimeLimitExceeded => "TLE",
            MemoryLimitExceeded => "MLE",
            CompilationError => "CE",
            InternalError => "IE",
        }
    }
}

impl Default for Verdict {
    fn default() -> Verdict {
        Verdict::Pending
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Verdict {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        use Verdict::*;
        match s {
            "PENDING" => Ok(Pending),
            "AC" => Ok(Accepted),
            "WA" => Ok(WrongAnswer),
            "RE" => Ok(RuntimeError),
            "TLE" => Ok(TimeLimitExceeded),
            "MLE" => Ok(MemoryLimitExceeded),
            "CE" => Ok(CompilationError),
            "IE" => Ok(InternalError),
            _ => Err(()),
        }
    }
}

/// The reduction of a sequence of case outcomes: the submission verdict and
/// the accumulated statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Aggregate {
    /// The most severe verdict over all graded cases, or `Accepted` when
    /// every case was accepted. `Pending` when no case has been graded.
    pub verdict: Verdict,

    /// Sum of the points awarded over all graded cases.
    pub total_points: u32,

    /// Maximum wall time over all graded cases, in milliseconds.
    pub max_execution_time_ms: u64,

    /// Maximum peak memory over all graded cases, in kilobytes.
    pub max_memory_kb: u64,
}

/// Reduce the given case outcomes, in case order, into a submission level
/// aggregate.
///
/// The outcomes may be a prefix of the full manifest when grading was
/// short-circuited; outcomes that would come after a short-circuiting
/// verdict cannot change the aggregated verdict since nothing outranks it
/// except another short-circuiting verdict of equal or higher severity.
pub fn aggregate(outcomes: &[CaseOutcome]) -> Aggregate {
    let mut agg = Aggregate {
        verdict: Verdict::Pending,
        total_points: 0,
        max_execution_time_ms: 0,
        max_memory_kb: 0,
    };

    for outcome in outcomes {
        if outcome.verdict.severity() > agg.verdict.severity() {
            agg.verdict = outcome.verdict;
        }
        agg.total_points += outcome.points_awarded;
        agg.max_execution_time_ms = agg.max_execution_time_ms.max(outcome.execution_time_ms);
        agg.max_memory_kb = agg.max_memory_kb.max(outcome.memory_used_kb);
    }

    agg
}
