//! This module implements the dispatcher: a pool of worker threads that
//! claim queue items, grade the referenced submissions case by case and
//! write the results back.
//!
//! Each worker processes at most one submission at a time, so a pool of N
//! workers yields at most N RUNNING queue items. All coordination between
//! workers goes through the queue store; the workers themselves share no
//! mutable state beyond the stop flag and the busy counter.
//!

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rand::distributions::Alphanumeric;
use rand::Rng;

use grading::{CaseRunner, Verdict};

use crate::catalog::ProblemCatalog;
use crate::entities::{CaseResult, ExecutionStatus, QueueItem};
use crate::events::{EventBus, EventPayload};
use crate::storage::queue::ErrorKind as QueueErrorKind;
use crate::storage::{QueueStore, SubmissionStore};

error_chain::error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    links {
        CatalogError(crate::catalog::Error, crate::catalog::ErrorKind);
        QueueError(crate::storage::queue::Error, crate::storage::queue::ErrorKind);
        SubmissionsError(crate::storage::submissions::Error, crate::storage::submissions::ErrorKind);
    }

    errors {
        InvalidNumberOfWorkers {
            description("invalid number of workers.")
        }

        SubmissionMissing(id: String) {
            description("the queued submission does not exist")
            display("the queued submission does not exist: {}", id)
        }

        EmptyManifest(problem_id: String) {
            description("the problem has no grader cases")
            display("the problem has no grader cases: {}", problem_id)
        }
    }
}

/// The largest number of workers a single pool will spawn.
const MAX_WORKERS: u32 = 64;

/// Number of attempts a store write is given before the failure is treated
/// as irrecoverable.
const STORE_ATTEMPTS: u32 = 3;

/// Base backoff between store write attempts.
const STORE_BACKOFF: Duration = Duration::from_millis(50);

/// Everything a worker needs to grade submissions. Built once by the
/// composition root and shared by the whole pool.
pub struct DispatchContext {
    /// The submission store.
    pub submissions: Arc<dyn SubmissionStore>,

    /// The queue store.
    pub queue: Arc<dyn QueueStore>,

    /// The problem catalog read model.
    pub catalog: Arc<dyn ProblemCatalog>,

    /// The per-case runner.
    pub runner: CaseRunner,

    /// The domain event bus.
    pub bus: Arc<EventBus>,

    /// The time a worker sleeps when the queue is empty.
    pub poll_interval: Duration,
}

/// Retry a store write a bounded number of times with a linear backoff
/// before giving up. Transient store hiccups are absorbed here; everything
/// that survives is escalated through the queue's retry path.
fn with_store_retries<T, F>(what: &str, mut op: F) -> Result<T>
    where F: FnMut() -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < STORE_ATTEMPTS => {
                log::warn!("{} failed (attempt {}/{}): {}", what, attempt, STORE_ATTEMPTS, e);
                std::thread::sleep(STORE_BACKOFF * attempt);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Grade one claimed queue item to completion. Returns `Err` only for
/// irrecoverable failures; user-facing verdicts, including internal-error
/// verdicts reported by the sandbox, complete normally.
fn process_item(worker_id: &str, context: &DispatchContext, item: &QueueItem) -> Result<()> {
    let mut submission = context.submissions.find_by_id(item.submission_id)?
        .ok_or_else(|| Error::from(ErrorKind::SubmissionMissing(item.submission_id.to_string())))?;

    with_store_retries("marking the submission running", || {
        Ok(context.submissions.mark_running(submission.id)?)
    })?;
    context.bus.publish(submission.id, EventPayload::JudgeStarted {
        submission_id: submission.id,
        worker_id: String::from(worker_id),
    });

    let cases = context.catalog.get_cases(submission.problem_id)?;
    if cases.is_empty() {
        return Err(Error::from(ErrorKind::EmptyManifest(submission.problem_id.to_string())));
    }

    let mut outcomes = Vec::with_capacity(cases.len());
    for case in &cases {
        let outcome = context.runner.run(&submission.source, submission.language, case);
        log::debug!("worker {} graded case {} of submission {}: {}",
            worker_id, case.case_id, submission.id, outcome.verdict);

        let verdict = outcome.verdict;
        outcomes.push(outcome);
        if verdict.short_circuits() {
            log::info!("worker {} short-circuits submission {} after case {} ({})",
                worker_id, submission.id, case.case_id, verdict);
            break;
        }
    }

    let aggregate = grading::aggregate(&outcomes);
    submission.compile_error = outcomes.iter()
        .find(|o| o.verdict == Verdict::CompilationError)
        .map(|o| o.compile_output.clone())
        .unwrap_or_default();
    for outcome in outcomes {
        let case_result = CaseResult::from_outcome(submission.id, outcome);
        submission.add_case_result(case_result);
    }
    submission.status = ExecutionStatus::Completed;
    submission.result = aggregate.verdict;
    submission.judged_at = Some(crate::utils::now_millis());

    with_store_retries("finalizing the submission", || {
        Ok(context.submissions.finalize(&submission)?)
    })?;
    with_store_retries("completing the queue item", || {
        Ok(context.queue.complete(item.id, worker_id)?)
    })?;

    context.bus.publish(submission.id, EventPayload::JudgeCompleted {
        submission_id: submission.id,
        result: submission.result,
        total_points: submission.total_points,
        max_points: submission.max_points,
        execution_time_ms: submission.execution_time_ms,
        memory_usage_kb: submission.memory_usage_kb,
    });

    log::info!("worker {} judged submission {}: {} ({}/{} points)",
        worker_id, submission.id, submission.result,
        submission.total_points, submission.max_points);
    Ok(())
}

/// Map an irrecoverable worker failure onto the error taxonomy reported in
/// `judge.error` events.
fn error_kind_name(error: &Error) -> &'static str {
    match error.kind() {
        ErrorKind::SubmissionMissing(..) => "NOT_FOUND",
        ErrorKind::EmptyManifest(..) => "MANIFEST_UNAVAILABLE",
        ErrorKind::CatalogError(..) => "MANIFEST_UNAVAILABLE",
        _ => "TRANSIENT_STORE",
    }
}

/// Handle an irrecoverable failure of `process_item`: either return the
/// item to the queue for another attempt, or exhaust it and finalize the
/// submission as failed.
fn handle_failure(worker_id: &str, context: &DispatchContext, item: &QueueItem, error: Error) {
    if let ErrorKind::QueueError(QueueErrorKind::LeaseMismatch(..)) = error.kind() {
        // The lease was taken away (shutdown release or stale reclamation)
        // while this worker was still grading; the work will be redone
        // elsewhere and there is nothing to record here.
        log::warn!("worker {} lost the lease on queue item {}: {}", worker_id, item.id, error);
        return;
    }

    log::error!("worker {} failed to process submission {}: {}",
        worker_id, item.submission_id, error);

    if item.can_retry() {
        match context.queue.increment_retry(item.id) {
            Ok(count) => {
                if let Err(e) = context.submissions.mark_pending(item.submission_id) {
                    log::error!("failed to return submission {} to PENDING: {}",
                        item.submission_id, e);
                }
                log::info!("queue item {} returned to the queue (retry {}/{})",
                    item.id, count, item.max_retries);
                return;
            }
            Err(e) => {
                log::error!("failed to bump the retry counter of queue item {}: {}", item.id, e);
            }
        }
    }

    // Retries are exhausted (or the bump itself failed): fail the item and
    // the submission.
    let message = format!("{}", error);
    if let Err(e) = context.queue.fail(item.id, worker_id, &message) {
        log::error!("failed to mark queue item {} as failed: {}", item.id, e);
    }
    if let Err(e) = context.submissions.finalize_failed(item.submission_id) {
        log::error!("failed to finalize submission {} as failed: {}", item.submission_id, e);
    }

    let error_kind = if item.can_retry() {
        error_kind_name(&error)
    } else {
        "RETRIES_EXHAUSTED"
    };
    context.bus.publish(item.submission_id, EventPayload::JudgeError {
        submission_id: item.submission_id,
        error_kind: String::from(error_kind),
        message,
    });
}

/// The entry point of a worker thread.
fn worker_entry(
    worker_id: String,
    context: Arc<DispatchContext>,
    stop: Arc<AtomicBool>,
    busy: Arc<AtomicUsize>) {
    log::info!("worker {} has started", worker_id);

    // Recover anything a previous incarnation of this worker id left
    // RUNNING.
    if let Err(e) = context.queue.release_worker(&worker_id) {
        log::error!("worker {} failed to release its previous items: {}", worker_id, e);
    }

    while !stop.load(Ordering::SeqCst) {
        let item = match context.queue.claim_next(&worker_id) {
            Ok(Some(item)) => item,
            Ok(None) => {
                std::thread::sleep(context.poll_interval);
                continue;
            }
            Err(e) => {
                log::error!("worker {} failed to poll the queue: {}", worker_id, e);
                std::thread::sleep(context.poll_interval);
                continue;
            }
        };

        if stop.load(Ordering::SeqCst) {
            // Claimed during shutdown; hand the item straight back.
            if let Err(e) = context.queue.release_worker(&worker_id) {
                log::error!("worker {} failed to release item {}: {}", worker_id, item.id, e);
            }
            break;
        }

        busy.fetch_add(1, Ordering::SeqCst);
        let outcome = process_item(&worker_id, &context, &item);
        if let Err(e) = outcome {
            handle_failure(&worker_id, &context, &item, e);
        }
        busy.fetch_sub(1, Ordering::SeqCst);
    }

    log::info!("worker {} has stopped", worker_id);
}

/// A running pool of judge workers.
pub struct WorkerPool {
    /// The shared worker context.
    context: Arc<DispatchContext>,

    /// Join handles of the worker threads.
    handles: Vec<JoinHandle<()>>,

    /// Identities of the spawned workers.
    worker_ids: Vec<String>,

    /// Cooperative stop flag observed by every worker.
    stop: Arc<AtomicBool>,

    /// Number of workers currently grading a submission.
    busy: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawn a pool of `workers` worker threads over the given context.
    pub fn start(context: Arc<DispatchContext>, workers: u32) -> Result<WorkerPool> {
        if workers == 0 {
            log::error!("Number of workers cannot be 0.");
            return Err(Error::from(ErrorKind::InvalidNumberOfWorkers));
        }

        let num_workers = if workers > MAX_WORKERS {
            log::warn!("Number of workers exceeds maximum limit. Fallback to {} workers.",
                MAX_WORKERS);
            MAX_WORKERS
        } else {
            workers
        };

        let stop = Arc::new(AtomicBool::new(false));
        let busy = Arc::new(AtomicUsize::new(0));

        log::info!("Spawning {} worker threads", num_workers);
        let mut handles = Vec::with_capacity(num_workers as usize);
        let mut worker_ids = Vec::with_capacity(num_workers as usize);
        for index in 1..=num_workers {
            let worker_id = WorkerPool::make_worker_id(index);
            worker_ids.push(worker_id.clone());

            let context = context.clone();
            let stop = stop.clone();
            let busy = busy.clone();
            handles.push(std::thread::spawn(move || {
                worker_entry(worker_id, context, stop, busy)
            }));
        }

        Ok(WorkerPool { context, handles, worker_ids, stop, busy })
    }

    /// Build a worker identity: stable index plus a random suffix so that
    /// two pool generations never collide on lease ownership.
    fn make_worker_id(index: u32) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .collect();
        format!("judge-{}-{}", index, suffix)
    }

    /// Get the identities of the workers in this pool.
    pub fn worker_ids(&self) -> &[String] {
        &self.worker_ids
    }

    /// Stop the pool cooperatively: in-flight submissions get the given
    /// grace period to finish, then any queue items still leased to this
    /// pool's workers are released so another pool can retry them. Returns
    /// the number of released items.
    pub fn shutdown(self, grace: Duration) -> Result<u64> {
        log::info!("stopping the worker pool");
        self.stop.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + grace;
        while self.busy.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        let mut released = 0;
        for worker_id in &self.worker_ids {
            released += self.context.queue.release_worker(worker_id)?;
        }
        if released > 0 {
            log::warn!("released {} in-flight queue items after the shutdown grace period",
                released);
        }

        // Workers that already noticed the stop flag exit within one poll
        // interval; a worker stuck inside the sandbox is left to run out on
        // its own, its lease having been taken away above.
        if self.busy.load(Ordering::SeqCst) == 0 {
            for handle in self.handles {
                let _ = handle.join();
            }
        }

        log::info!("worker pool stopped");
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use uuid::Uuid;

    use grading::{CaseKind, CaseSpec, ExecutionReport, ExecutionRequest, Sandbox, Termination};

    use crate::catalog::Difficulty;
    use crate::config::LimitsConfig;
    use crate::db::SqliteConnection;
    use crate::entities::Metadata;
    use crate::storage::AppStorage;
    use crate::submit::{SubmissionService, SubmitterRole};

    /// A sandbox scripted by magic source texts, so the tests can stage
    /// every termination cause without running real programs.
    struct ScriptedSandbox;

    impl Sandbox for ScriptedSandbox {
        fn execute(&self, request: &ExecutionRequest)
            -> grading::sandbox::Result<ExecutionReport> {
            let mut report = ExecutionReport {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
                wall_time_ms: 10,
                peak_memory_kb: 1024,
                termination: Termination::Normal,
                compile_output: String::new(),
            };

            match request.source.as_str() {
                // Reads whitespace separated integers and prints their sum.
                "sum" => {
                    let total: i64 = request.stdin
                        .split_whitespace()
                        .filter_map(|t| t.parse::<i64>().ok())
                        .sum();
                    report.stdout = format!("{}\n", total);
                }
                "always-three" => report.stdout = String::from("3\n"),
                "sleep-forever" => {
                    report.termination = Termination::Timeout;
                    report.wall_time_ms = request.time_limit_ms;
                }
                "hog-memory" => {
                    report.termination = Termination::MemoryExceeded;
                    report.peak_memory_kb = request.memory_limit_mb * 1024;
                }
                "broken-syntax" => {
                    report.compile_output =
                        String::from("main.rs:1:1: error: expected expression");
                }
                "crash" => {
                    report.exit_code = 1;
                    report.stderr = String::from("panicked at 'boom'");
                }
                _ => report.termination = Termination::Internal,
            }

            Ok(report)
        }
    }

    struct FixtureCatalog {
        problem_id: Uuid,
        cases: Vec<CaseSpec>,
    }

    impl crate::catalog::ProblemCatalog for FixtureCatalog {
        fn problem_exists(&self, problem_id: Uuid) -> crate::catalog::Result<bool> {
            Ok(problem_id == self.problem_id)
        }

        fn problem_is_active(&self, _problem_id: Uuid) -> crate::catalog::Result<bool> {
            Ok(true)
        }

        fn problem_difficulty(&self, _problem_id: Uuid) -> crate::catalog::Result<Difficulty> {
            Ok(Difficulty::Normal)
        }

        fn get_cases(&self, _problem_id: Uuid) -> crate::catalog::Result<Vec<CaseSpec>> {
            Ok(self.cases.clone())
        }
    }

    fn case(id: &str, input: &str, expected: &str, points: u32, time_limit_ms: u64) -> CaseSpec {
        CaseSpec {
            case_id: id.into(),
            input: input.into(),
            expected_output: expected.into(),
            points,
            kind: CaseKind::Hidden,
            time_limit_ms,
            memory_limit_mb: 256,
        }
    }

    fn two_sum_cases() -> Vec<CaseSpec> {
        vec![
            case("c1", "1 2", "3", 10, 1000),
            case("c2", "5 5", "10", 10, 1000),
        ]
    }

    struct Fixture {
        storage: AppStorage,
        service: SubmissionService,
        context: Arc<DispatchContext>,
        problem_id: Uuid,
        events: Arc<Mutex<Vec<String>>>,
    }

    fn fixture(cases: Vec<CaseSpec>) -> Fixture {
        let problem_id = Uuid::new_v4();
        let db = Arc::new(SqliteConnection::in_memory().unwrap());
        let storage = AppStorage::new(db).unwrap();
        let catalog = Arc::new(FixtureCatalog { problem_id, cases });
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        bus.subscribe(Box::new(move |event| {
            sink.lock().unwrap().push(String::from(event.payload.kind()));
        }));

        let service = SubmissionService::new(
            storage.submissions(),
            storage.queue(),
            catalog.clone(),
            bus.clone(),
            LimitsConfig::default());
        let context = Arc::new(DispatchContext {
            submissions: storage.submissions(),
            queue: storage.queue(),
            catalog,
            runner: CaseRunner::new(Arc::new(ScriptedSandbox)),
            bus,
            poll_interval: Duration::from_millis(10),
        });

        Fixture { storage, service, context, problem_id, events }
    }

    fn submit(f: &Fixture, source: &str, language: &str) -> Uuid {
        f.service.create(
            Uuid::new_v4(),
            SubmitterRole::User,
            f.problem_id,
            String::from(source),
            language,
            Metadata::new()).unwrap().id
    }

    /// Claim the next item and grade it synchronously.
    fn grade_next(f: &Fixture, worker_id: &str) {
        let item = f.context.queue.claim_next(worker_id).unwrap().unwrap();
        let outcome = process_item(worker_id, &f.context, &item);
        if let Err(e) = outcome {
            handle_failure(worker_id, &f.context, &item, e);
        }
    }

    fn wait_until<F>(timeout: Duration, mut check: F) -> bool
        where F: FnMut() -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn accepted_submission_through_a_real_pool() {
        let f = fixture(two_sum_cases());
        let id = submit(&f, "sum", "python");

        let pool = WorkerPool::start(f.context.clone(), 1).unwrap();
        let submissions = f.storage.submissions();
        assert!(wait_until(Duration::from_secs(5), || {
            submissions.find_by_id(id).unwrap().unwrap().is_finished()
        }));
        pool.shutdown(Duration::from_secs(1)).unwrap();

        let sub = submissions.find_by_id(id).unwrap().unwrap();
        assert_eq!(ExecutionStatus::Completed, sub.status);
        assert_eq!(Verdict::Accepted, sub.result);
        assert_eq!(20, sub.total_points);
        assert_eq!(2, sub.case_results.len());
        assert!(sub.case_results.iter().all(|r| r.verdict == Verdict::Accepted));

        let kinds = f.events.lock().unwrap().clone();
        assert_eq!(
            vec![
                String::from("submission.created"),
                String::from("judge.started"),
                String::from("judge.completed"),
            ],
            kinds);
    }

    #[test]
    fn pool_drains_many_submissions_without_duplication() {
        let f = fixture(two_sum_cases());
        let mut ids = Vec::new();
        for _ in 0..6 {
            ids.push(submit(&f, "sum", "python"));
        }

        let pool = WorkerPool::start(f.context.clone(), 3).unwrap();
        let submissions = f.storage.submissions();
        assert!(wait_until(Duration::from_secs(10), || {
            ids.iter().all(|id| submissions.find_by_id(*id).unwrap().unwrap().is_finished())
        }));
        pool.shutdown(Duration::from_secs(1)).unwrap();

        for id in &ids {
            let sub = submissions.find_by_id(*id).unwrap().unwrap();
            assert_eq!(Verdict::Accepted, sub.result);
            // Exactly one grading pass happened: one result row per case.
            assert_eq!(2, sub.case_results.len());
        }
        assert_eq!(
            6,
            f.storage.queue().count_by_status(ExecutionStatus::Completed).unwrap());
    }

    #[test]
    fn wrong_answer_on_second_case() {
        let f = fixture(two_sum_cases());
        let id = submit(&f, "always-three", "python");
        grade_next(&f, "w1");

        let sub = f.storage.submissions().find_by_id(id).unwrap().unwrap();
        assert_eq!(Verdict::WrongAnswer, sub.result);
        assert_eq!(10, sub.total_points);
        assert_eq!(2, sub.case_results.len());
        assert_eq!(Verdict::Accepted, sub.case_results[0].verdict);
        assert_eq!(10, sub.case_results[0].points_awarded);
        assert_eq!(Verdict::WrongAnswer, sub.case_results[1].verdict);
        assert_eq!(0, sub.case_results[1].points_awarded);
    }

    #[test]
    fn compilation_error_short_circuits() {
        let f = fixture(two_sum_cases());
        let id = submit(&f, "broken-syntax", "rust");
        grade_next(&f, "w1");

        let sub = f.storage.submissions().find_by_id(id).unwrap().unwrap();
        assert_eq!(Verdict::CompilationError, sub.result);
        assert_eq!(0, sub.total_points);
        assert_eq!(1, sub.case_results.len());
        assert!(sub.compile_error.contains("expected expression"));
    }

    #[test]
    fn time_limit_exceeded() {
        let f = fixture(vec![case("c1", "", "3", 10, 200)]);
        let id = submit(&f, "sleep-forever", "python");
        grade_next(&f, "w1");

        let sub = f.storage.submissions().find_by_id(id).unwrap().unwrap();
        assert_eq!(Verdict::TimeLimitExceeded, sub.result);
        assert!(sub.execution_time_ms >= 200);
        assert_eq!(Verdict::TimeLimitExceeded, sub.case_results[0].verdict);
    }

    #[test]
    fn memory_limit_exceeded() {
        let f = fixture(vec![case("c1", "", "3", 10, 1000)]);
        let id = submit(&f, "hog-memory", "python");
        grade_next(&f, "w1");

        let sub = f.storage.submissions().find_by_id(id).unwrap().unwrap();
        assert_eq!(Verdict::MemoryLimitExceeded, sub.result);
        assert_eq!(256 * 1024, sub.memory_usage_kb);
    }

    #[test]
    fn internal_sandbox_error_still_completes_with_internal_verdict() {
        let f = fixture(two_sum_cases());
        let id = submit(&f, "unknown-program", "python");
        grade_next(&f, "w1");

        let sub = f.storage.submissions().find_by_id(id).unwrap().unwrap();
        assert_eq!(ExecutionStatus::Completed, sub.status);
        assert_eq!(Verdict::InternalError, sub.result);
        // Grading short-circuited on the first internal error.
        assert_eq!(1, sub.case_results.len());
    }

    #[test]
    fn missing_submission_retries_then_fails() {
        let f = fixture(two_sum_cases());

        // Enqueue an item whose submission does not exist.
        let mut item = QueueItem::new(Uuid::new_v4(), 1);
        item.max_retries = 1;
        f.storage.queue().enqueue(&item).unwrap();

        // First attempt: the failure is retryable, the item goes back to
        // the queue.
        grade_next(&f, "w1");
        let retried = f.storage.queue().find_by_id(item.id).unwrap().unwrap();
        assert_eq!(ExecutionStatus::Pending, retried.status);
        assert_eq!(1, retried.retry_count);

        // Second attempt: the budget is spent, the item fails for good.
        grade_next(&f, "w1");
        let failed = f.storage.queue().find_by_id(item.id).unwrap().unwrap();
        assert_eq!(ExecutionStatus::Failed, failed.status);
        assert!(failed.retry_count <= failed.max_retries);

        let kinds = f.events.lock().unwrap().clone();
        assert!(kinds.contains(&String::from("judge.error")));
    }

    #[test]
    fn worker_pool_rejects_zero_workers() {
        let f = fixture(two_sum_cases());
        assert!(WorkerPool::start(f.context.clone(), 0).is_err());
    }
}
