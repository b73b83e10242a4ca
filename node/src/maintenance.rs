//! This module implements the maintenance daemon: a periodic sweep that
//! reclaims queue items abandoned by crashed workers, bounds their retries,
//! purges finished artifacts past their retention windows and reports the
//! health of the queue.
//!

use std::sync::Arc;
use std::time::Duration;

use crate::entities::ExecutionStatus;
use crate::events::{EventBus, EventPayload};
use crate::storage::{ExecutionStore, QueueStore, SubmissionStore};
use crate::utils::now_millis;

error_chain::error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    links {
        ExecutionsError(crate::storage::executions::Error, crate::storage::executions::ErrorKind);
        QueueError(crate::storage::queue::Error, crate::storage::queue::ErrorKind);
        SubmissionsError(crate::storage::submissions::Error, crate::storage::submissions::ErrorKind);
    }
}

/// Provide options for the maintenance daemon.
pub struct MaintenanceOptions {
    /// The submission store.
    pub submissions: Arc<dyn SubmissionStore>,

    /// The queue store.
    pub queue: Arc<dyn QueueStore>,

    /// The ad-hoc execution store.
    pub executions: Arc<dyn ExecutionStore>,

    /// The domain event bus.
    pub bus: Arc<EventBus>,

    /// The interval between two maintenance passes.
    pub sweep_interval: Duration,

    /// The age after which a RUNNING queue item counts as abandoned.
    pub stale_threshold: Duration,

    /// The retention window for COMPLETED queue items.
    pub queue_retention: Duration,

    /// The retention window for ad-hoc execution records.
    pub execution_retention: Duration,
}

/// The structured snapshot produced by one maintenance pass.
#[derive(Clone, Debug, Default)]
pub struct HealthReport {
    /// Number of PENDING queue items.
    pub pending: u64,

    /// Number of RUNNING queue items.
    pub running: u64,

    /// Number of COMPLETED queue items still retained.
    pub completed: u64,

    /// Number of FAILED queue items.
    pub failed: u64,

    /// Age of the oldest PENDING item, if any.
    pub oldest_pending_age_ms: Option<u64>,

    /// Items returned to the queue by this pass.
    pub reclaimed: u64,

    /// Items failed for good by this pass after exhausting their retries.
    pub abandoned: u64,

    /// COMPLETED queue items deleted by this pass.
    pub purged_queue_items: u64,

    /// Ad-hoc execution records deleted by this pass.
    pub purged_executions: u64,
}

/// Run one maintenance pass: reclaim stale leases, bound retries, purge
/// expired artifacts and snapshot the queue.
pub fn run_pass(options: &MaintenanceOptions) -> Result<HealthReport> {
    let now = now_millis();
    let mut report = HealthReport::default();

    // Stale lease reclamation. A RUNNING item whose lease is older than the
    // threshold belongs to a worker that is gone; this is the only recovery
    // path for workers that crashed mid-run.
    let stale_cutoff = now.saturating_sub(options.stale_threshold.as_millis() as u64);
    for item in options.queue.find_stale(stale_cutoff)? {
        let worker = item.worker_id.clone().unwrap_or_default();
        if item.can_retry() {
            options.queue.increment_retry(item.id)?;
            options.submissions.mark_pending(item.submission_id)?;
            report.reclaimed += 1;
            log::warn!("reclaimed queue item {} abandoned by worker {} (retry {}/{})",
                item.id, worker, item.retry_count + 1, item.max_retries);
        } else {
            let message = format!("abandoned by worker {} with no retries left", worker);
            options.queue.mark_failed(item.id, &message)?;
            options.submissions.finalize_failed(item.submission_id)?;
            options.bus.publish(item.submission_id, EventPayload::JudgeError {
                submission_id: item.submission_id,
                error_kind: String::from("RETRIES_EXHAUSTED"),
                message,
            });
            report.abandoned += 1;
            log::error!("queue item {} abandoned by worker {} exhausted its retries",
                item.id, worker);
        }
    }

    // Purge artifacts past their retention windows.
    let queue_cutoff = now.saturating_sub(options.queue_retention.as_millis() as u64);
    report.purged_queue_items = options.queue.purge_completed_before(queue_cutoff)?;
    let execution_cutoff = now.saturating_sub(options.execution_retention.as_millis() as u64);
    report.purged_executions = options.executions.purge_older_than(execution_cutoff)?;

    // Health snapshot.
    report.pending = options.queue.count_by_status(ExecutionStatus::Pending)?;
    report.running = options.queue.count_by_status(ExecutionStatus::Running)?;
    report.completed = options.queue.count_by_status(ExecutionStatus::Completed)?;
    report.failed = options.queue.count_by_status(ExecutionStatus::Failed)?;
    report.oldest_pending_age_ms = options.queue.oldest_pending_age_ms(now)?;

    log::info!(
        "maintenance pass: {} pending, {} running, {} completed, {} failed, \
         oldest pending {:?} ms, reclaimed {}, abandoned {}, purged {}+{}",
        report.pending, report.running, report.completed, report.failed,
        report.oldest_pending_age_ms, report.reclaimed, report.abandoned,
        report.purged_queue_items, report.purged_executions);

    Ok(report)
}

/// This function is the entry point of the maintenance daemon thread.
fn maintenance_daemon_entry(options: MaintenanceOptions) {
    loop {
        std::thread::sleep(options.sweep_interval);

        match run_pass(&options) {
            Ok(..) => (),
            Err(e) => log::error!("maintenance pass failed: {}", e),
        };
    }
}

/// Start the maintenance daemon thread.
pub fn start_daemon(options: MaintenanceOptions) {
    std::thread::spawn(move || maintenance_daemon_entry(options));
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use uuid::Uuid;

    use grading::Language;

    use crate::db::SqliteConnection;
    use crate::entities::{CodeExecution, Metadata, QueueItem, Submission};
    use crate::storage::AppStorage;

    struct Fixture {
        storage: AppStorage,
        options: MaintenanceOptions,
        events: Arc<Mutex<Vec<String>>>,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(SqliteConnection::in_memory().unwrap());
        let storage = AppStorage::new(db).unwrap();
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        bus.subscribe(Box::new(move |event| {
            sink.lock().unwrap().push(String::from(event.payload.kind()));
        }));

        let options = MaintenanceOptions {
            submissions: storage.submissions(),
            queue: storage.queue(),
            executions: storage.executions(),
            bus,
            sweep_interval: Duration::from_millis(50),
            stale_threshold: Duration::from_millis(0),
            queue_retention: Duration::from_millis(0),
            execution_retention: Duration::from_millis(0),
        };
        Fixture { storage, options, events }
    }

    fn submission(storage: &AppStorage) -> Submission {
        let sub = Submission::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            String::from("print(1)"),
            Language::Python,
            10,
            Metadata::new());
        storage.submissions().create(&sub).unwrap();
        sub
    }

    /// Enqueue and claim an item so that it is RUNNING with a lease held by
    /// `worker_id`.
    fn running_item(storage: &AppStorage, submission_id: Uuid, worker_id: &str) -> QueueItem {
        storage.queue().enqueue(&QueueItem::new(submission_id, 1)).unwrap();
        storage.queue().claim_next(worker_id).unwrap().unwrap()
    }

    #[test]
    fn stale_items_are_reclaimed_with_a_retry_bump() {
        let f = fixture();

        // Simulate a crashed worker holding two leases: the items stay
        // RUNNING and nobody will ever complete them.
        let sub1 = submission(&f.storage);
        let sub2 = submission(&f.storage);
        let item1 = running_item(&f.storage, sub1.id, "dead-worker");
        let item2 = running_item(&f.storage, sub2.id, "dead-worker");
        f.storage.submissions().mark_running(sub1.id).unwrap();
        f.storage.submissions().mark_running(sub2.id).unwrap();

        // stale_threshold is zero, so both leases are already stale.
        std::thread::sleep(Duration::from_millis(5));
        let report = run_pass(&f.options).unwrap();
        assert_eq!(2, report.reclaimed);
        assert_eq!(0, report.abandoned);

        for item_id in [item1.id, item2.id].iter() {
            let item = f.storage.queue().find_by_id(*item_id).unwrap().unwrap();
            assert_eq!(ExecutionStatus::Pending, item.status);
            assert_eq!(1, item.retry_count);
            assert!(item.worker_id.is_none());
        }
        for sub_id in [sub1.id, sub2.id].iter() {
            let sub = f.storage.submissions().find_by_id(*sub_id).unwrap().unwrap();
            assert_eq!(ExecutionStatus::Pending, sub.status);
        }

        // The reclaimed items are claimable again by a healthy worker.
        assert!(f.storage.queue().claim_next("w2").unwrap().is_some());
    }

    #[test]
    fn exhausted_stale_items_fail_for_good() {
        let f = fixture();
        let sub = submission(&f.storage);

        let mut item = QueueItem::new(sub.id, 1);
        item.max_retries = 0;
        f.storage.queue().enqueue(&item).unwrap();
        f.storage.queue().claim_next("dead-worker").unwrap().unwrap();
        f.storage.submissions().mark_running(sub.id).unwrap();

        std::thread::sleep(Duration::from_millis(5));
        let report = run_pass(&f.options).unwrap();
        assert_eq!(0, report.reclaimed);
        assert_eq!(1, report.abandoned);

        let item = f.storage.queue().find_by_id(item.id).unwrap().unwrap();
        assert_eq!(ExecutionStatus::Failed, item.status);

        let sub = f.storage.submissions().find_by_id(sub.id).unwrap().unwrap();
        assert_eq!(ExecutionStatus::Failed, sub.status);
        assert_eq!(grading::Verdict::InternalError, sub.result);
        assert!(sub.judged_at.is_some());

        assert!(f.events.lock().unwrap().contains(&String::from("judge.error")));
    }

    #[test]
    fn purge_removes_expired_artifacts() {
        let f = fixture();

        // A completed queue item and an old ad-hoc execution record.
        let sub = submission(&f.storage);
        let item = running_item(&f.storage, sub.id, "w1");
        f.storage.queue().complete(item.id, "w1").unwrap();

        let execution = CodeExecution::new(
            String::from("print(1)"),
            Language::Python,
            String::new(),
            2000,
            256);
        f.storage.executions().save(&execution).unwrap();

        std::thread::sleep(Duration::from_millis(5));
        let report = run_pass(&f.options).unwrap();
        assert_eq!(1, report.purged_queue_items);
        assert_eq!(1, report.purged_executions);
        assert!(f.storage.queue().find_by_id(item.id).unwrap().is_none());
    }

    #[test]
    fn healthy_queue_reports_counts() {
        let f = fixture();
        let sub = submission(&f.storage);
        f.storage.queue().enqueue(&QueueItem::new(sub.id, 1)).unwrap();

        let mut options = fixture().options;
        // Use the populated fixture's stores with lenient windows so that
        // nothing is reclaimed or purged.
        options.submissions = f.storage.submissions();
        options.queue = f.storage.queue();
        options.executions = f.storage.executions();
        options.stale_threshold = Duration::from_secs(3600);
        options.queue_retention = Duration::from_secs(3600);
        options.execution_retention = Duration::from_secs(3600);

        let report = run_pass(&options).unwrap();
        assert_eq!(1, report.pending);
        assert_eq!(0, report.running);
        assert_eq!(0, report.reclaimed);
        assert!(report.oldest_pending_age_ms.is_some());
    }

    #[test]
    fn daemon_runs_passes_in_the_background() {
        let f = fixture();
        let sub = submission(&f.storage);
        running_item(&f.storage, sub.id, "dead-worker");
        f.storage.submissions().mark_running(sub.id).unwrap();

        let queue = f.storage.queue();
        start_daemon(f.options);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut reclaimed = false;
        while std::time::Instant::now() < deadline {
            let item = queue.count_by_status(ExecutionStatus::Pending).unwrap();
            if item == 1 {
                reclaimed = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(reclaimed);
    }
}
