//! This module defines the read contract against the problem catalog and a
//! directory-backed implementation of it.
//!
//! The catalog owns problems, case data and difficulty ratings; the judge
//! core only reads the tiny model it needs: whether a problem exists and is
//! active, its difficulty, and its ordered case manifest.
//!

use std::path::PathBuf;

use serde::Deserialize;
use uuid::Uuid;

use grading::{CaseKind, CaseSpec};

error_chain::error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    foreign_links {
        IoError(::std::io::Error);
        SerdeYamlError(::serde_yaml::Error);
    }

    errors {
        ProblemNotFound(problem_id: String) {
            description("problem not found in the catalog")
            display("problem not found in the catalog: {}", problem_id)
        }
    }
}

/// The difficulty rating of a problem, as far as the judge core cares: it
/// only feeds the priority computation at enqueue time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    VeryEasy,
    Easy,
    Normal,
    Hard,
}

impl Default for Difficulty {
    fn default() -> Difficulty {
        Difficulty::Normal
    }
}

/// The read contract the judge core consumes from the catalog domain.
pub trait ProblemCatalog: Send + Sync {
    /// Determine whether the given problem exists.
    fn problem_exists(&self, problem_id: Uuid) -> Result<bool>;

    /// Determine whether the given problem is active, i.e. accepts
    /// submissions.
    fn problem_is_active(&self, problem_id: Uuid) -> Result<bool>;

    /// Get the difficulty rating of the given problem.
    fn problem_difficulty(&self, problem_id: Uuid) -> Result<Difficulty>;

    /// Get the ordered case manifest of the given problem.
    fn get_cases(&self, problem_id: Uuid) -> Result<Vec<CaseSpec>>;
}

/// One case entry of a problem manifest file.
#[derive(Debug, Deserialize)]
struct CaseManifestEntry {
    id: String,
    input: String,
    expected_output: String,
    points: u32,
    #[serde(default)]
    kind: ManifestCaseKind,
    #[serde(default = "default_time_limit_ms")]
    time_limit_ms: u64,
    #[serde(default = "default_memory_limit_mb")]
    memory_limit_mb: u64,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ManifestCaseKind {
    Sample,
    Hidden,
}

impl Default for ManifestCaseKind {
    fn default() -> ManifestCaseKind {
        ManifestCaseKind::Hidden
    }
}

fn default_time_limit_ms() -> u64 {
    1000
}

fn default_memory_limit_mb() -> u64 {
    256
}

/// A problem manifest file.
#[derive(Debug, Deserialize)]
struct ProblemManifest {
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    difficulty: Difficulty,
    cases: Vec<CaseManifestEntry>,
}

fn default_active() -> bool {
    true
}

/// A catalog backed by a directory of YAML problem manifests, one file per
/// problem named `{problem_id}.yaml`.
pub struct YamlCatalog {
    /// The directory under which problem manifests are maintained.
    problem_dir: PathBuf,
}

impl YamlCatalog {
    /// Create a new `YamlCatalog` reading manifests from the given
    /// directory.
    pub fn new<P>(problem_dir: P) -> Self
        where P: Into<PathBuf> {
        YamlCatalog { problem_dir: problem_dir.into() }
    }

    /// Get the path of the manifest file for the given problem.
    fn manifest_path(&self, problem_id: Uuid) -> PathBuf {
        let mut path = self.problem_dir.clone();
        path.push(format!("{}.yaml", problem_id));
        path
    }

    /// Load and parse the manifest of the given problem.
    fn load_manifest(&self, problem_id: Uuid) -> Result<ProblemManifest> {
        let path = self.manifest_path(problem_id);
        if !path.is_file() {
            return Err(Error::from(ErrorKind::ProblemNotFound(problem_id.to_string())));
        }

        let content = std::fs::read_to_string(&path)?;
        let manifest: ProblemManifest = serde_yaml::from_str(&content)?;
        Ok(manifest)
    }
}

impl ProblemCatalog for YamlCatalog {
    fn problem_exists(&self, problem_id: Uuid) -> Result<bool> {
        Ok(self.manifest_path(problem_id).is_file())
    }

    fn problem_is_active(&self, problem_id: Uuid) -> Result<bool> {
        Ok(self.load_manifest(problem_id)?.active)
    }

    fn problem_difficulty(&self, problem_id: Uuid) -> Result<Difficulty> {
        Ok(self.load_manifest(problem_id)?.difficulty)
    }

    fn get_cases(&self, problem_id: Uuid) -> Result<Vec<CaseSpec>> {
        let manifest = self.load_manifest(problem_id)?;
        let cases = manifest.cases
            .into_iter()
            .map(|entry| CaseSpec {
                case_id: entry.id,
                input: entry.input,
                expected_output: entry.expected_output,
                points: entry.points,
                kind: match entry.kind {
                    ManifestCaseKind::Sample => CaseKind::Sample,
                    ManifestCaseKind::Hidden => CaseKind::Hidden,
                },
                time_limit_ms: entry.time_limit_ms,
                memory_limit_mb: entry.memory_limit_mb,
            })
            .collect();
        Ok(cases)
    }
}
