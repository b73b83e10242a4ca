//! This module defines the case manifest entries the catalog hands to the
//! judge core. A manifest is read by value and treated as immutable for the
//! duration of a judge run.
//!

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The kind of a grader case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CaseKind {
    /// A sample case, visible to the submitter.
    Sample,

    /// A hidden case, used only for grading.
    Hidden,
}

impl Default for CaseKind {
    fn default() -> CaseKind {
        CaseKind::Hidden
    }
}

/// One grader case of a problem: an input, the expected output, the points
/// awarded on acceptance and the resource limits the sandbox must enforce.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CaseSpec {
    /// Identifier of the case, opaque to the core.
    pub case_id: String,

    /// The input fed to the program's standard input.
    pub input: String,

    /// The expected output on the program's standard output.
    pub expected_output: String,

    /// Points awarded when the case is accepted.
    pub points: u32,

    /// The kind of the case.
    #[cfg_attr(feature = "serde", serde(default))]
    pub kind: CaseKind,

    /// Wall time limit for the case, in milliseconds.
    pub time_limit_ms: u64,

    /// Memory limit for the case, in megabytes.
    pub memory_limit_mb: u64,
}

/// Compute the maximum number of points a submission can collect over the
/// given manifest.
pub fn total_points(cases: &[CaseSpec]) -> u32 {
    cases.iter().map(|c| c.points).sum()
}
