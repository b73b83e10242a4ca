//! This module implements the two entry points of the judge core: the
//! submission service (validate, persist, enqueue) and the ad-hoc execution
//! service (validate, run directly, record).
//!

use std::str::FromStr;
use std::sync::Arc;

use uuid::Uuid;

use grading::{truncate_excerpt, ExecutionRequest, Language, Sandbox};

use crate::catalog::{Difficulty, ProblemCatalog};
use crate::config::LimitsConfig;
use crate::entities::{CodeExecution, ExecutionResult, Metadata, QueueItem, Submission};
use crate::events::{EventBus, EventPayload};
use crate::storage::{ExecutionStore, QueueStore, SubmissionStore};
use crate::storage::submissions::ErrorKind as SubmissionsErrorKind;

error_chain::error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    links {
        CatalogError(crate::catalog::Error, crate::catalog::ErrorKind);
        ExecutionsError(crate::storage::executions::Error, crate::storage::executions::ErrorKind);
        QueueError(crate::storage::queue::Error, crate::storage::queue::ErrorKind);
        SubmissionsError(crate::storage::submissions::Error, crate::storage::submissions::ErrorKind);
    }

    errors {
        // The request is malformed; nothing was persisted.
        Validation(message: String) {
            description("request failed validation")
            display("request failed validation: {}", message)
        }

        NotFound(id: String) {
            description("entity not found")
            display("entity not found: {}", id)
        }

        // The operation does not apply to the entity's current state.
        Conflict(message: String) {
            description("operation conflicts with the current state")
            display("operation conflicts with the current state: {}", message)
        }
    }
}

/// The smallest priority a queue item can be enqueued at.
pub const MIN_PRIORITY: i32 = 0;

/// The largest priority a queue item can be enqueued at.
pub const MAX_PRIORITY: i32 = 10;

/// The priority floor applied to rejudged submissions.
pub const REJUDGE_PRIORITY: i32 = 5;

/// The role of the submitting principal, as far as scheduling cares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitterRole {
    User,
    Moderator,
    Admin,
}

/// Compute the queue priority of a submission at enqueue time.
pub(crate) fn compute_priority(role: SubmitterRole, difficulty: Difficulty, rejudge: bool) -> i32 {
    let mut priority = 1;

    priority += match role {
        SubmitterRole::Admin => 3,
        SubmitterRole::Moderator => 2,
        SubmitterRole::User => 0,
    };

    if difficulty == Difficulty::VeryEasy {
        priority += 1;
    }

    if rejudge {
        priority = priority.max(REJUDGE_PRIORITY);
    }

    priority.max(MIN_PRIORITY).min(MAX_PRIORITY)
}

/// Validate a source text against the configured size bound.
fn validate_source(source: &str, limits: &LimitsConfig) -> Result<()> {
    if source.is_empty() {
        return Err(Error::from(ErrorKind::Validation(String::from("source must not be empty"))));
    }
    if source.len() > limits.max_source_bytes {
        return Err(Error::from(ErrorKind::Validation(format!(
            "source exceeds {} bytes", limits.max_source_bytes))));
    }
    Ok(())
}

/// Parse a language name, rejecting anything outside the supported
/// enumeration.
fn validate_language(language: &str) -> Result<Language> {
    Language::from_str(language).map_err(|_| {
        let supported: Vec<&str> = Language::all().iter().map(|l| l.name()).collect();
        Error::from(ErrorKind::Validation(format!(
            "unsupported language `{}`, expected one of: {}",
            language,
            supported.join(", "))))
    })
}

/// Accepts submissions into the judge queue and exposes submission queries.
pub struct SubmissionService {
    /// The submission store.
    submissions: Arc<dyn SubmissionStore>,

    /// The queue store.
    queue: Arc<dyn QueueStore>,

    /// The problem catalog read model.
    catalog: Arc<dyn ProblemCatalog>,

    /// The domain event bus.
    bus: Arc<EventBus>,

    /// The configured validation limits.
    limits: LimitsConfig,
}

impl SubmissionService {
    /// Create a new `SubmissionService`.
    pub fn new(
        submissions: Arc<dyn SubmissionStore>,
        queue: Arc<dyn QueueStore>,
        catalog: Arc<dyn ProblemCatalog>,
        bus: Arc<EventBus>,
        limits: LimitsConfig) -> Self {
        SubmissionService { submissions, queue, catalog, bus, limits }
    }

    /// Accept a new submission: validate it, persist it, enqueue it at the
    /// computed priority and announce it on the bus.
    pub fn create(
        &self,
        user_id: Uuid,
        role: SubmitterRole,
        problem_id: Uuid,
        source: String,
        language: &str,
        metadata: Metadata) -> Result<Submission> {
        validate_source(&source, &self.limits)?;
        let language = validate_language(language)?;

        if !self.catalog.problem_exists(problem_id)? {
            return Err(Error::from(ErrorKind::Validation(format!(
                "problem {} does not exist", problem_id))));
        }
        if !self.catalog.problem_is_active(problem_id)? {
            return Err(Error::from(ErrorKind::Validation(format!(
                "problem {} is not accepting submissions", problem_id))));
        }

        let cases = self.catalog.get_cases(problem_id)?;
        if cases.is_empty() {
            return Err(Error::from(ErrorKind::Validation(format!(
                "problem {} has no grader cases", problem_id))));
        }
        let max_points = grading::cases::total_points(&cases);

        let difficulty = self.catalog.problem_difficulty(problem_id)?;
        let priority = compute_priority(role, difficulty, false);

        let submission = Submission::new(user_id, problem_id, source, language, max_points, metadata);
        self.submissions.create(&submission)?;
        self.queue.enqueue(&QueueItem::new(submission.id, priority))?;

        self.bus.publish(submission.id, EventPayload::SubmissionCreated {
            submission_id: submission.id,
            user_id,
            problem_id,
            language,
            rejudge: false,
        });

        log::info!("submission {} accepted for problem {} at priority {}",
            submission.id, problem_id, priority);
        Ok(submission)
    }

    /// Reset a terminal submission and enqueue it again at an elevated
    /// priority. Rejected with `Conflict` while the submission is still
    /// queued or being graded.
    pub fn rejudge(&self, submission_id: Uuid) -> Result<Submission> {
        let submission = self.submissions.find_by_id(submission_id)?
            .ok_or_else(|| Error::from(ErrorKind::NotFound(submission_id.to_string())))?;

        if self.queue.find_by_submission_live(submission_id)?.is_some() {
            return Err(Error::from(ErrorKind::Conflict(format!(
                "submission {} is already queued", submission_id))));
        }
        if !submission.is_finished() {
            return Err(Error::from(ErrorKind::Conflict(format!(
                "submission {} is not terminal", submission_id))));
        }

        match self.submissions.reset_for_rejudge(submission_id) {
            Ok(()) => (),
            Err(crate::storage::submissions::Error(SubmissionsErrorKind::NotTerminal(..), ..)) => {
                return Err(Error::from(ErrorKind::Conflict(format!(
                    "submission {} is not terminal", submission_id))));
            }
            Err(e) => return Err(Error::from(e)),
        }

        let difficulty = self.catalog.problem_difficulty(submission.problem_id)
            .unwrap_or(Difficulty::Normal);
        let priority = compute_priority(SubmitterRole::User, difficulty, true);
        self.queue.enqueue(&QueueItem::new(submission_id, priority))?;

        self.bus.publish(submission_id, EventPayload::SubmissionCreated {
            submission_id,
            user_id: submission.user_id,
            problem_id: submission.problem_id,
            language: submission.language,
            rejudge: true,
        });

        log::info!("submission {} queued for rejudge at priority {}", submission_id, priority);
        self.get(submission_id)
    }

    /// Load a submission.
    pub fn get(&self, submission_id: Uuid) -> Result<Submission> {
        self.submissions.find_by_id(submission_id)?
            .ok_or_else(|| Error::from(ErrorKind::NotFound(submission_id.to_string())))
    }

    /// List the submissions of a user, newest first.
    pub fn list_by_user(&self, user_id: Uuid, limit: usize) -> Result<Vec<Submission>> {
        Ok(self.submissions.find_by_user(user_id, limit)?)
    }

    /// List the submissions against a problem, newest first.
    pub fn list_by_problem(&self, problem_id: Uuid, limit: usize) -> Result<Vec<Submission>> {
        Ok(self.submissions.find_by_problem(problem_id, limit)?)
    }

    /// List the newest submissions.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<Submission>> {
        Ok(self.submissions.find_recent(limit)?)
    }
}

/// Runs one-shot executions that are not attached to a problem. The queue,
/// the grading aggregation and the submission stores are all bypassed.
pub struct ExecutionService {
    /// The execution record store.
    executions: Arc<dyn ExecutionStore>,

    /// The sandbox executions are delegated to.
    sandbox: Arc<dyn Sandbox>,

    /// The domain event bus.
    bus: Arc<EventBus>,

    /// The configured validation limits.
    limits: LimitsConfig,
}

impl ExecutionService {
    /// Create a new `ExecutionService`.
    pub fn new(
        executions: Arc<dyn ExecutionStore>,
        sandbox: Arc<dyn Sandbox>,
        bus: Arc<EventBus>,
        limits: LimitsConfig) -> Self {
        ExecutionService { executions, sandbox, bus, limits }
    }

    /// Validate a requested limit against its policy bounds, falling back
    /// to the default when the caller requested nothing.
    fn resolve_limit(
        requested: Option<u64>,
        default: u64,
        min: u64,
        max: u64,
        what: &str) -> Result<u64> {
        match requested {
            None => Ok(default),
            Some(value) if value >= min && value <= max => Ok(value),
            Some(value) => Err(Error::from(ErrorKind::Validation(format!(
                "{} {} is outside the allowed range {}..={}", what, value, min, max)))),
        }
    }

    /// Execute one ad-hoc request and record the result.
    pub fn execute(
        &self,
        source: String,
        language: &str,
        stdin: String,
        time_limit_ms: Option<u64>,
        memory_limit_mb: Option<u64>) -> Result<CodeExecution> {
        validate_source(&source, &self.limits)?;
        let language = validate_language(language)?;
        let time_limit_ms = Self::resolve_limit(
            time_limit_ms,
            self.limits.default_time_limit_ms,
            self.limits.min_time_limit_ms,
            self.limits.max_time_limit_ms,
            "time limit")?;
        let memory_limit_mb = Self::resolve_limit(
            memory_limit_mb,
            self.limits.default_memory_limit_mb,
            self.limits.min_memory_limit_mb,
            self.limits.max_memory_limit_mb,
            "memory limit")?;

        let mut execution = CodeExecution::new(source, language, stdin, time_limit_ms, memory_limit_mb);
        self.executions.save(&execution)?;
        self.bus.publish(execution.id, EventPayload::ExecutionStarted {
            execution_id: execution.id,
            language,
        });

        let request = ExecutionRequest {
            source: execution.source.clone(),
            language,
            stdin: execution.stdin.clone(),
            time_limit_ms,
            memory_limit_mb,
        };
        let result = match self.sandbox.execute(&request) {
            Ok(report) => ExecutionResult {
                stdout: truncate_excerpt(&report.stdout),
                stderr: truncate_excerpt(&report.stderr),
                exit_code: report.exit_code,
                wall_time_ms: report.wall_time_ms,
                memory_used_kb: report.peak_memory_kb,
                termination: report.termination,
            },
            Err(e) => {
                log::error!("ad-hoc execution {} failed: {}", execution.id, e);
                ExecutionResult {
                    stdout: String::new(),
                    stderr: format!("{}", e),
                    exit_code: 0,
                    wall_time_ms: 0,
                    memory_used_kb: 0,
                    termination: grading::Termination::Internal,
                }
            }
        };

        execution.set_result(result);
        self.executions.save(&execution)?;

        let (wall_time_ms, memory_used_kb) = match &execution.result {
            Some(result) => (result.wall_time_ms, result.memory_used_kb),
            None => (0, 0),
        };
        self.bus.publish(execution.id, EventPayload::ExecutionCompleted {
            execution_id: execution.id,
            status: execution.status.to_string(),
            wall_time_ms,
            memory_used_kb,
        });

        Ok(execution)
    }

    /// Load an execution record.
    pub fn get(&self, execution_id: Uuid) -> Result<CodeExecution> {
        self.executions.find_by_id(execution_id)?
            .ok_or_else(|| Error::from(ErrorKind::NotFound(execution_id.to_string())))
    }

    /// List the newest execution records.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<CodeExecution>> {
        Ok(self.executions.find_recent(limit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use grading::{CaseKind, CaseSpec, ExecutionReport, Termination, Verdict};

    use crate::db::SqliteConnection;
    use crate::entities::ExecutionStatus;
    use crate::storage::AppStorage;

    /// A catalog with one fixed problem.
    struct FixtureCatalog {
        problem_id: Uuid,
        active: bool,
        difficulty: Difficulty,
        cases: Vec<CaseSpec>,
    }

    impl FixtureCatalog {
        fn with_cases(problem_id: Uuid, cases: Vec<CaseSpec>) -> Self {
            FixtureCatalog {
                problem_id,
                active: true,
                difficulty: Difficulty::Normal,
                cases,
            }
        }
    }

    impl ProblemCatalog for FixtureCatalog {
        fn problem_exists(&self, problem_id: Uuid) -> crate::catalog::Result<bool> {
            Ok(problem_id == self.problem_id)
        }

        fn problem_is_active(&self, problem_id: Uuid) -> crate::catalog::Result<bool> {
            Ok(problem_id == self.problem_id && self.active)
        }

        fn problem_difficulty(&self, _problem_id: Uuid) -> crate::catalog::Result<Difficulty> {
            Ok(self.difficulty)
        }

        fn get_cases(&self, _problem_id: Uuid) -> crate::catalog::Result<Vec<CaseSpec>> {
            Ok(self.cases.clone())
        }
    }

    fn case(id: &str, points: u32) -> CaseSpec {
        CaseSpec {
            case_id: id.into(),
            input: String::from("1 2"),
            expected_output: String::from("3"),
            points,
            kind: CaseKind::Hidden,
            time_limit_ms: 1000,
            memory_limit_mb: 256,
        }
    }

    struct Fixture {
        storage: AppStorage,
        service: SubmissionService,
        problem_id: Uuid,
        events: Arc<Mutex<Vec<String>>>,
    }

    fn fixture_with_catalog(catalog: FixtureCatalog) -> Fixture {
        let problem_id = catalog.problem_id;
        let db = Arc::new(SqliteConnection::in_memory().unwrap());
        let storage = AppStorage::new(db).unwrap();
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        bus.subscribe(Box::new(move |event| {
            sink.lock().unwrap().push(String::from(event.payload.kind()));
        }));

        let service = SubmissionService::new(
            storage.submissions(),
            storage.queue(),
            Arc::new(catalog),
            bus,
            LimitsConfig::default());
        Fixture { storage, service, problem_id, events }
    }

    fn fixture() -> Fixture {
        let problem_id = Uuid::new_v4();
        fixture_with_catalog(FixtureCatalog::with_cases(
            problem_id,
            vec![case("c1", 10), case("c2", 10)]))
    }

    mod priority {
        use super::*;

        #[test]
        fn base_priority() {
            assert_eq!(1, compute_priority(SubmitterRole::User, Difficulty::Normal, false));
        }

        #[test]
        fn role_elevation() {
            assert_eq!(3, compute_priority(SubmitterRole::Moderator, Difficulty::Normal, false));
            assert_eq!(4, compute_priority(SubmitterRole::Admin, Difficulty::Normal, false));
        }

        #[test]
        fn very_easy_elevation() {
            assert_eq!(2, compute_priority(SubmitterRole::User, Difficulty::VeryEasy, false));
            assert_eq!(5, compute_priority(SubmitterRole::Admin, Difficulty::VeryEasy, false));
        }

        #[test]
        fn rejudge_floor() {
            assert_eq!(5, compute_priority(SubmitterRole::User, Difficulty::Normal, true));
            assert_eq!(5, compute_priority(SubmitterRole::Admin, Difficulty::VeryEasy, true));
        }

        #[test]
        fn clamped_to_range() {
            for role in [SubmitterRole::User, SubmitterRole::Moderator, SubmitterRole::Admin].iter() {
                for rejudge in [false, true].iter() {
                    let p = compute_priority(*role, Difficulty::VeryEasy, *rejudge);
                    assert!(p >= MIN_PRIORITY && p <= MAX_PRIORITY);
                }
            }
        }
    }

    mod create {
        use super::*;

        #[test]
        fn happy_path_persists_and_enqueues() {
            let f = fixture();
            let user_id = Uuid::new_v4();
            let submission = f.service.create(
                user_id,
                SubmitterRole::User,
                f.problem_id,
                String::from("print(3)"),
                "python",
                Metadata::new()).unwrap();

            assert_eq!(20, submission.max_points);
            assert_eq!(ExecutionStatus::Pending, submission.status);
            assert_eq!(Verdict::Pending, submission.result);

            let stored = f.storage.submissions().find_by_id(submission.id).unwrap().unwrap();
            assert_eq!(submission.id, stored.id);

            let item = f.storage.queue().find_by_submission_live(submission.id).unwrap().unwrap();
            assert_eq!(1, item.priority);

            assert_eq!(vec![String::from("submission.created")], *f.events.lock().unwrap());
        }

        #[test]
        fn empty_source_rejected() {
            let f = fixture();
            let result = f.service.create(
                Uuid::new_v4(),
                SubmitterRole::User,
                f.problem_id,
                String::new(),
                "python",
                Metadata::new());
            assert_validation(result);
        }

        #[test]
        fn oversized_source_rejected() {
            let f = fixture();
            let result = f.service.create(
                Uuid::new_v4(),
                SubmitterRole::User,
                f.problem_id,
                "x".repeat(100_001),
                "python",
                Metadata::new());
            assert_validation(result);
        }

        #[test]
        fn unknown_language_rejected() {
            let f = fixture();
            let result = f.service.create(
                Uuid::new_v4(),
                SubmitterRole::User,
                f.problem_id,
                String::from("x"),
                "cobol",
                Metadata::new());
            assert_validation(result);
        }

        #[test]
        fn unknown_problem_rejected() {
            let f = fixture();
            let result = f.service.create(
                Uuid::new_v4(),
                SubmitterRole::User,
                Uuid::new_v4(),
                String::from("x"),
                "python",
                Metadata::new());
            assert_validation(result);
        }

        #[test]
        fn inactive_problem_rejected() {
            let problem_id = Uuid::new_v4();
            let mut catalog = FixtureCatalog::with_cases(problem_id, vec![case("c1", 10)]);
            catalog.active = false;
            let f = fixture_with_catalog(catalog);

            let result = f.service.create(
                Uuid::new_v4(),
                SubmitterRole::User,
                problem_id,
                String::from("x"),
                "python",
                Metadata::new());
            assert_validation(result);

            // Nothing was persisted on the rejected path.
            assert!(f.storage.submissions().find_recent(10).unwrap().is_empty());
        }

        fn assert_validation<T>(result: Result<T>) {
            match result {
                Err(Error(ErrorKind::Validation(..), ..)) => (),
                Err(e) => panic!("expected a validation error, got: {}", e),
                Ok(..) => panic!("expected a validation error, got success"),
            }
        }
    }

    mod rejudge {
        use super::*;

        fn judged_submission(f: &Fixture) -> Uuid {
            let submission = f.service.create(
                Uuid::new_v4(),
                SubmitterRole::User,
                f.problem_id,
                String::from("print(3)"),
                "python",
                Metadata::new()).unwrap();

            // Drive the queue item and the submission to their terminal
            // states by hand.
            let queue = f.storage.queue();
            let item = queue.claim_next("w1").unwrap().unwrap();
            queue.complete(item.id, "w1").unwrap();

            let submissions = f.storage.submissions();
            submissions.mark_running(submission.id).unwrap();
            let mut sub = submissions.find_by_id(submission.id).unwrap().unwrap();
            sub.status = ExecutionStatus::Completed;
            sub.result = Verdict::Accepted;
            sub.total_points = 20;
            sub.judged_at = Some(crate::utils::now_millis());
            submissions.finalize(&sub).unwrap();

            submission.id
        }

        #[test]
        fn rejudge_resets_and_enqueues_at_elevated_priority() {
            let f = fixture();
            let id = judged_submission(&f);

            let rejudged = f.service.rejudge(id).unwrap();
            assert_eq!(ExecutionStatus::Pending, rejudged.status);
            assert_eq!(Verdict::Pending, rejudged.result);
            assert_eq!(0, rejudged.total_points);
            assert!(rejudged.judged_at.is_none());
            assert!(rejudged.case_results.is_empty());

            let item = f.storage.queue().find_by_submission_live(id).unwrap().unwrap();
            assert!(item.priority >= REJUDGE_PRIORITY);

            let kinds = f.events.lock().unwrap().clone();
            assert_eq!(2, kinds.iter().filter(|k| *k == "submission.created").count());
        }

        #[test]
        fn rejudge_rejected_while_queued() {
            let f = fixture();
            let submission = f.service.create(
                Uuid::new_v4(),
                SubmitterRole::User,
                f.problem_id,
                String::from("print(3)"),
                "python",
                Metadata::new()).unwrap();

            match f.service.rejudge(submission.id) {
                Err(Error(ErrorKind::Conflict(..), ..)) => (),
                other => panic!("unexpected result: {:?}", other.map(|_| ())),
            }
        }

        #[test]
        fn rejudge_of_unknown_submission() {
            let f = fixture();
            match f.service.rejudge(Uuid::new_v4()) {
                Err(Error(ErrorKind::NotFound(..), ..)) => (),
                other => panic!("unexpected result: {:?}", other.map(|_| ())),
            }
        }

        #[test]
        fn second_rejudge_is_rejected_until_judged_again() {
            let f = fixture();
            let id = judged_submission(&f);

            f.service.rejudge(id).unwrap();
            match f.service.rejudge(id) {
                Err(Error(ErrorKind::Conflict(..), ..)) => (),
                other => panic!("unexpected result: {:?}", other.map(|_| ())),
            }
        }
    }

    mod adhoc {
        use super::*;

        /// A sandbox that echoes its stdin back as stdout.
        struct EchoSandbox;

        impl Sandbox for EchoSandbox {
            fn execute(&self, request: &ExecutionRequest)
                -> grading::sandbox::Result<ExecutionReport> {
                Ok(ExecutionReport {
                    stdout: request.stdin.clone(),
                    stderr: String::new(),
                    exit_code: 0,
                    wall_time_ms: 5,
                    peak_memory_kb: 128,
                    termination: Termination::Normal,
                    compile_output: String::new(),
                })
            }
        }

        fn service() -> (ExecutionService, AppStorage, Arc<Mutex<Vec<String>>>) {
            let db = Arc::new(SqliteConnection::in_memory().unwrap());
            let storage = AppStorage::new(db).unwrap();
            let bus = Arc::new(EventBus::new());
            let events = Arc::new(Mutex::new(Vec::new()));
            let sink = events.clone();
            bus.subscribe(Box::new(move |event| {
                sink.lock().unwrap().push(String::from(event.payload.kind()));
            }));

            let service = ExecutionService::new(
                storage.executions(),
                Arc::new(EchoSandbox),
                bus,
                LimitsConfig::default());
            (service, storage, events)
        }

        #[test]
        fn execute_records_result_and_events() {
            let (service, storage, events) = service();
            let execution = service.execute(
                String::from("cat"),
                "python",
                String::from("hello"),
                None,
                None).unwrap();

            assert_eq!(ExecutionStatus::Completed, execution.status);
            assert_eq!(2000, execution.time_limit_ms);
            assert_eq!(256, execution.memory_limit_mb);
            assert_eq!("hello", execution.result.as_ref().unwrap().stdout);

            let stored = storage.executions().find_by_id(execution.id).unwrap().unwrap();
            assert_eq!(ExecutionStatus::Completed, stored.status);

            assert_eq!(
                vec![String::from("execution.started"), String::from("execution.completed")],
                *events.lock().unwrap());
        }

        #[test]
        fn limits_outside_policy_are_rejected() {
            let (service, ..) = service();
            assert!(service.execute(
                String::from("x"), "python", String::new(), Some(50), None).is_err());
            assert!(service.execute(
                String::from("x"), "python", String::new(), Some(60_000), None).is_err());
            assert!(service.execute(
                String::from("x"), "python", String::new(), None, Some(8)).is_err());
            assert!(service.execute(
                String::from("x"), "python", String::new(), None, Some(2048)).is_err());
        }

        #[test]
        fn limits_inside_policy_are_kept() {
            let (service, ..) = service();
            let execution = service.execute(
                String::from("x"),
                "python",
                String::new(),
                Some(500),
                Some(64)).unwrap();
            assert_eq!(500, execution.time_limit_ms);
            assert_eq!(64, execution.memory_limit_mb);
        }
    }
}
