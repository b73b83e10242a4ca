//! This module defines the contract between the judge core and the external
//! sandbox executor.
//!
//! The sandbox is an opaque collaborator: it receives source code, an input
//! stream and resource limits, and reports how the program terminated. The
//! sandbox is the component responsible for actually enforcing the limits;
//! the core never double-checks them and only interprets the reported
//! termination cause.
//!

use crate::languages::Language;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

error_chain::error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    errors {
        // A transport-level failure: the sandbox could not be reached or
        // died before producing a report. The runner classifies this as an
        // internal error.
        Unavailable(message: String) {
            description("sandbox unavailable")
            display("sandbox unavailable: {}", message)
        }
    }
}

/// A request to execute one program against one input under limits.
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    /// The source code of the program.
    pub source: String,

    /// The language the source code is written in.
    pub language: Language,

    /// Data fed to the program's standard input.
    pub stdin: String,

    /// Wall time limit, in milliseconds.
    pub time_limit_ms: u64,

    /// Memory limit, in megabytes.
    pub memory_limit_mb: u64,
}

/// The cause of termination reported by the sandbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Termination {
    /// The program ran to completion on its own.
    Normal,

    /// The program was killed after exceeding the time limit.
    Timeout,

    /// The program was killed after exceeding the memory limit.
    MemoryExceeded,

    /// The program was killed by the given signal.
    Signal(i32),

    /// The sandbox itself failed while running the program.
    Internal,
}

/// The report produced by the sandbox for one execution.
#[derive(Clone, Debug)]
pub struct ExecutionReport {
    /// Everything the program wrote to its standard output.
    pub stdout: String,

    /// Everything the program wrote to its standard error.
    pub stderr: String,

    /// The exit code of the program. Meaningless unless `termination` is
    /// `Termination::Normal`.
    pub exit_code: i32,

    /// Wall clock time consumed, in milliseconds.
    pub wall_time_ms: u64,

    /// Peak memory consumption, in kilobytes.
    pub peak_memory_kb: u64,

    /// How the program terminated.
    pub termination: Termination,

    /// Diagnostics produced by the compile phase. Empty when the language
    /// has no compile phase or when compilation succeeded.
    pub compile_output: String,
}

impl ExecutionReport {
    /// Determine whether the compile phase of this execution failed.
    pub fn compile_failed(&self) -> bool {
        !self.compile_output.is_empty()
    }
}

/// The opaque executor the judge core delegates program execution to.
///
/// Implementations must enforce the limits given in the request and must
/// never let the judged program share the judge's own process.
pub trait Sandbox: Send + Sync {
    /// Execute the given request to completion and report the result.
    ///
    /// An `Err` return means the sandbox could not produce a report at all;
    /// a program that crashed, timed out or ran out of memory is an `Ok`
    /// report with the corresponding termination cause.
    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionReport>;
}
