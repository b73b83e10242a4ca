//! This module defines the enumeration of programming languages a submission
//! may be written in.
//!

use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A programming language supported by the judge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Language {
    /// Python 3.
    Python,

    /// JavaScript on a Node-style runtime.
    JavaScript,

    /// TypeScript. Transpilation is performed inside the sandbox, so the
    /// core treats it like an interpreted language.
    TypeScript,

    /// Java.
    Java,

    /// C++.
    Cpp,

    /// C.
    C,

    /// Go.
    Go,

    /// Rust.
    Rust,
}

impl Language {
    /// Get all supported languages, in a stable order.
    pub fn all() -> &'static [Language] {
        use Language::*;
        &[Python, JavaScript, TypeScript, Java, Cpp, C, Go, Rust]
    }

    /// Determine whether source code in this language goes through a compile
    /// phase before execution. Compile diagnostics can only be produced for
    /// languages for which this function returns `true`.
    pub fn requires_compilation(&self) -> bool {
        use Language::*;
        match self {
            Python | JavaScript | TypeScript => false,
            Java | Cpp | C | Go | Rust => true,
        }
    }

    /// Get the canonical lower-case name of the language.
    pub fn name(&self) -> &'static str {
        use Language::*;
        match self {
            Python => "python",
            JavaScript => "javascript",
            TypeScript => "typescript",
            Java => "java",
            Cpp => "cpp",
            C => "c",
            Go => "go",
            Rust => "rust",
        }
    }
}

impl Display for Language {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Language {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        use Language::*;
        match s.to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Python),
            "javascript" | "js" => Ok(JavaScript),
            "typescript" | "ts" => Ok(TypeScript),
            "java" => Ok(Java),
            "cpp" | "c++" | "cxx" => Ok(Cpp),
            "c" => Ok(C),
            "go" | "golang" => Ok(Go),
            "rust" | "rs" => Ok(Rust),
            _ => Err(()),
        }
    }
}
