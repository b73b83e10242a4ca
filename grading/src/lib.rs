//! This crate implements the grading core of RippleJudge: the supported
//! language enumeration, the sandbox contract, the per-case runner and the
//! verdict aggregation rules.
//!
//! The crate performs no I/O of its own. Everything that touches the
//! operating system is hidden behind the [`Sandbox`] trait, which makes the
//! runner deterministic with respect to its inputs and directly testable.
//!

extern crate log;

#[cfg(feature = "serde")]
extern crate serde;

pub mod cases;
pub mod languages;
pub mod runner;
pub mod sandbox;
pub mod verdict;

pub use cases::{CaseKind, CaseSpec};
pub use languages::Language;
pub use runner::{truncate_excerpt, CaseOutcome, CaseRunner, EXCERPT_LIMIT};
pub use sandbox::{ExecutionReport, ExecutionRequest, Sandbox, Termination};
pub use verdict::{aggregate, Aggregate, Verdict};
