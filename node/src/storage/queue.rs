//! This module implements the queue store: persistence for scheduler work
//! items with atomic claim handoff, owner-checked completion, lease release
//! and bounded retry bookkeeping.
//!
//! Atomicity note: every multi-statement operation below runs inside one
//! `SqliteConnection::execute` closure, and the connection mutex is held
//! for the whole closure. Two workers calling `claim_next` concurrently
//! therefore serialize on the connection and can never observe the same
//! PENDING item.
//!

use std::sync::Arc;

use sqlite::Value;
use uuid::Uuid;

use crate::db::SqliteConnection;
use crate::entities::{ExecutionStatus, Metadata, QueueItem};
use crate::utils::now_millis;

use super::{int_value, opt_int_value, opt_text_value, opt_text, opt_u64, parse_req, req_text, req_u64, req_uuid, rows_changed, text_value};

error_chain::error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    links {
        DbError(crate::db::Error, crate::db::ErrorKind);
    }

    foreign_links {
        SqliteError(::sqlite::Error);
        SerdeJsonError(::serde_json::Error);
    }

    errors {
        ItemNotFound(id: String) {
            description("queue item not found")
            display("queue item not found: {}", id)
        }

        DuplicateLiveItem(submission_id: String) {
            description("a live queue item already exists for the submission")
            display("a live queue item already exists for submission {}", submission_id)
        }

        LeaseMismatch(id: String, worker_id: String) {
            description("queue item is not leased to the worker")
            display("queue item {} is not leased to worker {}", id, worker_id)
        }

        RetriesExhausted(id: String) {
            description("queue item has no retries left")
            display("queue item {} has no retries left", id)
        }

        CorruptRow(table: String) {
            description("row does not match the expected shape")
            display("corrupt row in table `{}`", table)
        }
    }
}

/// The persistence contract for scheduler work items.
pub trait QueueStore: Send + Sync {
    /// Persist a new pending queue item. At most one live (PENDING or
    /// RUNNING) item may exist per submission; a second enqueue fails with
    /// `DuplicateLiveItem`.
    fn enqueue(&self, item: &QueueItem) -> Result<()>;

    /// Load a queue item.
    fn find_by_id(&self, id: Uuid) -> Result<Option<QueueItem>>;

    /// Find the live queue item of a submission, if any.
    fn find_by_submission_live(&self, submission_id: Uuid) -> Result<Option<QueueItem>>;

    /// Atomically claim the best PENDING item for the given worker: the
    /// highest priority wins, ties break on the oldest `created_at`. The
    /// claimed item moves to RUNNING with the worker's id and lease
    /// timestamps set. Returns `None` when the queue has no PENDING item.
    fn claim_next(&self, worker_id: &str) -> Result<Option<QueueItem>>;

    /// Move a RUNNING item owned by the given worker to COMPLETED.
    fn complete(&self, id: Uuid, worker_id: &str) -> Result<()>;

    /// Move a RUNNING item owned by the given worker to FAILED with the
    /// given error message.
    fn fail(&self, id: Uuid, worker_id: &str, message: &str) -> Result<()>;

    /// Move an item to FAILED regardless of lease ownership. Used by the
    /// maintenance path when the owning worker is gone.
    fn mark_failed(&self, id: Uuid, message: &str) -> Result<()>;

    /// Return all RUNNING items owned by the given worker to PENDING,
    /// clearing their leases. Returns the number of released items.
    fn release_worker(&self, worker_id: &str) -> Result<u64>;

    /// Bump the retry counter of an item and return it to PENDING with a
    /// cleared lease. Fails with `RetriesExhausted` when the budget is
    /// already spent. Returns the new retry count.
    fn increment_retry(&self, id: Uuid) -> Result<u32>;

    /// Find RUNNING items whose lease started before the given cutoff.
    fn find_stale(&self, started_before: u64) -> Result<Vec<QueueItem>>;

    /// Delete COMPLETED items finished before the given cutoff. Returns the
    /// number of deleted items.
    fn purge_completed_before(&self, completed_before: u64) -> Result<u64>;

    /// Count items in the given status.
    fn count_by_status(&self, status: ExecutionStatus) -> Result<u64>;

    /// Get the age of the oldest PENDING item relative to `now`, if any.
    fn oldest_pending_age_ms(&self, now: u64) -> Result<Option<u64>>;
}

/// The sqlite-backed queue store.
pub struct SqliteQueueStore {
    /// Connection to the sqlite database.
    db: Arc<SqliteConnection>,
}

const QUEUE_COLUMNS: &str = r#"
    id, submission_id, priority, retry_count, max_retries, status,
    worker_id, metadata, created_at, updated_at, assigned_at, started_at,
    completed_at, error_message
"#;

impl SqliteQueueStore {
    /// Create a new `SqliteQueueStore`, creating its table when it does not
    /// exist yet.
    pub fn new(db: Arc<SqliteConnection>) -> Result<Self> {
        db.ensure_table("queue_items", r#"
            CREATE TABLE queue_items(
                id              TEXT PRIMARY KEY,
                submission_id   TEXT NOT NULL,
                priority        INTEGER NOT NULL,
                retry_count     INTEGER NOT NULL,
                max_retries     INTEGER NOT NULL,
                status          TEXT NOT NULL,
                worker_id       TEXT,
                metadata        TEXT NOT NULL,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL,
                assigned_at     INTEGER,
                started_at      INTEGER,
                completed_at    INTEGER,
                error_message   TEXT
            );
        "#)?;

        Ok(SqliteQueueStore { db })
    }

    /// Load one item by id. Must run inside a closure that already holds
    /// the connection.
    fn load(conn: &sqlite::Connection, id: Uuid) -> Result<Option<QueueItem>> {
        let stmt = format!("SELECT {} FROM queue_items WHERE id = ?", QUEUE_COLUMNS);
        let mut cursor = conn.prepare(&stmt)?.cursor();
        cursor.bind(&[text_value(id.to_string())])?;

        match cursor.next()? {
            Some(row) => {
                let item = item_from_row(row)
                    .ok_or_else(|| Error::from(ErrorKind::CorruptRow(String::from("queue_items"))))?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// Apply an owner-checked terminal transition to a RUNNING item.
    fn finish(&self, id: Uuid, worker_id: &str, status: ExecutionStatus, message: Option<&str>)
        -> Result<()> {
        let changed = self.db.execute(|conn| -> Result<i64> {
            let mut cursor = conn.prepare(r#"
                UPDATE queue_items SET
                    status = ?, completed_at = ?, updated_at = ?, error_message = ?
                WHERE id = ? AND status = 'RUNNING' AND worker_id = ?
            "#)?.cursor();
            let now = now_millis();
            cursor.bind(&[
                text_value(status.to_string()),
                int_value(now),
                int_value(now),
                opt_text_value(message),
                text_value(id.to_string()),
                text_value(worker_id),
            ])?;
            cursor.next()?;
            Ok(rows_changed(conn)?)
        })?;

        if changed == 0 {
            return Err(Error::from(ErrorKind::LeaseMismatch(
                id.to_string(), String::from(worker_id))));
        }
        Ok(())
    }
}

impl QueueStore for SqliteQueueStore {
    fn enqueue(&self, item: &QueueItem) -> Result<()> {
        let metadata = serde_json::to_string(&item.metadata)?;
        self.db.execute(|conn| -> Result<()> {
            let mut cursor = conn.prepare(r#"
                SELECT COUNT(*) FROM queue_items
                WHERE submission_id = ? AND status IN ('PENDING', 'RUNNING')
            "#)?.cursor();
            cursor.bind(&[text_value(item.submission_id.to_string())])?;
            let live = match cursor.next()? {
                Some(row) => req_u64(row, 0).unwrap_or(0),
                None => 0,
            };
            if live > 0 {
                return Err(Error::from(ErrorKind::DuplicateLiveItem(
                    item.submission_id.to_string())));
            }

            let mut cursor = conn.prepare(r#"
                INSERT INTO queue_items(
                    id, submission_id, priority, retry_count, max_retries,
                    status, worker_id, metadata, created_at, updated_at,
                    assigned_at, started_at, completed_at, error_message
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#)?.cursor();
            cursor.bind(&[
                text_value(item.id.to_string()),
                text_value(item.submission_id.to_string()),
                Value::Integer(i64::from(item.priority)),
                int_value(u64::from(item.retry_count)),
                int_value(u64::from(item.max_retries)),
                text_value(item.status.to_string()),
                opt_text_value(item.worker_id.as_deref()),
                text_value(metadata),
                int_value(item.created_at),
                int_value(item.updated_at),
                opt_int_value(item.assigned_at),
                opt_int_value(item.started_at),
                opt_int_value(item.completed_at),
                opt_text_value(item.error_message.as_deref()),
            ])?;
            cursor.next()?;
            Ok(())
        })?;

        log::debug!("queue item {} enqueued at priority {}", item.id, item.priority);
        Ok(())
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<QueueItem>> {
        self.db.execute(|conn| Self::load(conn, id))
    }

    fn find_by_submission_live(&self, submission_id: Uuid) -> Result<Option<QueueItem>> {
        self.db.execute(|conn| -> Result<Option<QueueItem>> {
            let stmt = format!(r#"
                SELECT {} FROM queue_items
                WHERE submission_id = ? AND status IN ('PENDING', 'RUNNING')
            "#, QUEUE_COLUMNS);
            let mut cursor = conn.prepare(&stmt)?.cursor();
            cursor.bind(&[text_value(submission_id.to_string())])?;

            match cursor.next()? {
                Some(row) => {
                    let item = item_from_row(row)
                        .ok_or_else(|| Error::from(ErrorKind::CorruptRow(String::from("queue_items"))))?;
                    Ok(Some(item))
                }
                None => Ok(None),
            }
        })
    }

    fn claim_next(&self, worker_id: &str) -> Result<Option<QueueItem>> {
        self.db.execute(|conn| -> Result<Option<QueueItem>> {
            let mut cursor = conn.prepare(r#"
                SELECT id FROM queue_items WHERE status = 'PENDING'
                ORDER BY priority DESC, created_at ASC, rowid ASC
                LIMIT 1
            "#)?.cursor();
            let id = match cursor.next()? {
                Some(row) => req_uuid(row, 0)
                    .ok_or_else(|| Error::from(ErrorKind::CorruptRow(String::from("queue_items"))))?,
                None => return Ok(None),
            };

            let mut cursor = conn.prepare(r#"
                UPDATE queue_items SET
                    status = 'RUNNING', worker_id = ?, assigned_at = ?,
                    started_at = ?, updated_at = ?
                WHERE id = ? AND status = 'PENDING'
            "#)?.cursor();
            let now = now_millis();
            cursor.bind(&[
                text_value(worker_id),
                int_value(now),
                int_value(now),
                int_value(now),
                text_value(id.to_string()),
            ])?;
            cursor.next()?;
            if rows_changed(conn)? == 0 {
                // Cannot happen while the connection lock is held, but keep
                // the compare-and-swap semantics anyway.
                return Ok(None);
            }

            Self::load(conn, id)
        })
    }

    fn complete(&self, id: Uuid, worker_id: &str) -> Result<()> {
        self.finish(id, worker_id, ExecutionStatus::Completed, None)
    }

    fn fail(&self, id: Uuid, worker_id: &str, message: &str) -> Result<()> {
        self.finish(id, worker_id, ExecutionStatus::Failed, Some(message))
    }

    fn mark_failed(&self, id: Uuid, message: &str) -> Result<()> {
        let changed = self.db.execute(|conn| -> Result<i64> {
            let mut cursor = conn.prepare(r#"
                UPDATE queue_items SET
                    status = 'FAILED', worker_id = NULL, completed_at = ?,
                    updated_at = ?, error_message = ?
                WHERE id = ? AND status IN ('PENDING', 'RUNNING')
            "#)?.cursor();
            let now = now_millis();
            cursor.bind(&[
                int_value(now),
                int_value(now),
                text_value(message),
                text_value(id.to_string()),
            ])?;
            cursor.next()?;
            Ok(rows_changed(conn)?)
        })?;

        if changed == 0 {
            return Err(Error::from(ErrorKind::ItemNotFound(id.to_string())));
        }
        Ok(())
    }

    fn release_worker(&self, worker_id: &str) -> Result<u64> {
        let released = self.db.execute(|conn| -> Result<i64> {
            let mut cursor = conn.prepare(r#"
                UPDATE queue_items SET
                    status = 'PENDING', worker_id = NULL, assigned_at = NULL,
                    started_at = NULL, updated_at = ?
                WHERE worker_id = ? AND status = 'RUNNING'
            "#)?.cursor();
            cursor.bind(&[int_value(now_millis()), text_value(worker_id)])?;
            cursor.next()?;
            Ok(rows_changed(conn)?)
        })?;

        if released > 0 {
            log::info!("released {} queue items held by worker {}", released, worker_id);
        }
        Ok(released as u64)
    }

    fn increment_retry(&self, id: Uuid) -> Result<u32> {
        self.db.execute(|conn| -> Result<u32> {
            let item = Self::load(conn, id)?
                .ok_or_else(|| Error::from(ErrorKind::ItemNotFound(id.to_string())))?;
            if !item.can_retry() {
                return Err(Error::from(ErrorKind::RetriesExhausted(id.to_string())));
            }

            let mut cursor = conn.prepare(r#"
                UPDATE queue_items SET
                    retry_count = retry_count + 1, status = 'PENDING',
                    worker_id = NULL, assigned_at = NULL, started_at = NULL,
                    error_message = NULL, updated_at = ?
                WHERE id = ?
            "#)?.cursor();
            cursor.bind(&[int_value(now_millis()), text_value(id.to_string())])?;
            cursor.next()?;

            Ok(item.retry_count + 1)
        })
    }

    fn find_stale(&self, started_before: u64) -> Result<Vec<QueueItem>> {
        self.db.execute(|conn| -> Result<Vec<QueueItem>> {
            let stmt = format!(r#"
                SELECT {} FROM queue_items
                WHERE status = 'RUNNING' AND started_at < ?
                ORDER BY started_at ASC
            "#, QUEUE_COLUMNS);
            let mut cursor = conn.prepare(&stmt)?.cursor();
            cursor.bind(&[int_value(started_before)])?;

            let mut items = Vec::new();
            while let Some(row) = cursor.next()? {
                let item = item_from_row(row)
                    .ok_or_else(|| Error::from(ErrorKind::CorruptRow(String::from("queue_items"))))?;
                items.push(item);
            }
            Ok(items)
        })
    }

    fn purge_completed_before(&self, completed_before: u64) -> Result<u64> {
        let purged = self.db.execute(|conn| -> Result<i64> {
            let mut cursor = conn.prepare(r#"
                DELETE FROM queue_items
                WHERE status = 'COMPLETED' AND completed_at < ?
            "#)?.cursor();
            cursor.bind(&[int_value(completed_before)])?;
            cursor.next()?;
            Ok(rows_changed(conn)?)
        })?;
        Ok(purged as u64)
    }

    fn count_by_status(&self, status: ExecutionStatus) -> Result<u64> {
        self.db.execute(|conn| -> Result<u64> {
            let mut cursor = conn.prepare("SELECT COUNT(*) FROM queue_items WHERE status = ?")?
                .cursor();
            cursor.bind(&[text_value(status.to_string())])?;
            match cursor.next()? {
                Some(row) => Ok(req_u64(row, 0).unwrap_or(0)),
                None => Ok(0),
            }
        })
    }

    fn oldest_pending_age_ms(&self, now: u64) -> Result<Option<u64>> {
        self.db.execute(|conn| -> Result<Option<u64>> {
            let mut cursor = conn.prepare(
                "SELECT MIN(created_at) FROM queue_items WHERE status = 'PENDING'")?
                .cursor();
            match cursor.next()? {
                Some(row) => Ok(opt_u64(row, 0).map(|oldest| now.saturating_sub(oldest))),
                None => Ok(None),
            }
        })
    }
}

/// Deserialize a queue item from a database row selected with
/// `QUEUE_COLUMNS`.
fn item_from_row(row: &[Value]) -> Option<QueueItem> {
    let metadata: Metadata = match req_text(row, 7) {
        Some(text) => serde_json::from_str(&text).ok()?,
        None => return None,
    };

    Some(QueueItem {
        id: req_uuid(row, 0)?,
        submission_id: req_uuid(row, 1)?,
        priority: super::req_i64(row, 2)? as i32,
        retry_count: req_u64(row, 3)? as u32,
        max_retries: req_u64(row, 4)? as u32,
        status: parse_req(row, 5)?,
        worker_id: opt_text(row, 6),
        metadata,
        created_at: req_u64(row, 8)?,
        updated_at: req_u64(row, 9)?,
        assigned_at: opt_u64(row, 10),
        started_at: opt_u64(row, 11),
        completed_at: opt_u64(row, 12),
        error_message: opt_text(row, 13),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteQueueStore {
        let db = Arc::new(SqliteConnection::in_memory().unwrap());
        SqliteQueueStore::new(db).unwrap()
    }

    fn item_at(priority: i32, created_at: u64) -> QueueItem {
        let mut item = QueueItem::new(Uuid::new_v4(), priority);
        item.created_at = created_at;
        item
    }

    #[test]
    fn enqueue_and_find_round_trip() {
        let store = store();
        let item = QueueItem::new(Uuid::new_v4(), 3);
        store.enqueue(&item).unwrap();

        let loaded = store.find_by_id(item.id).unwrap().unwrap();
        assert_eq!(item.id, loaded.id);
        assert_eq!(item.submission_id, loaded.submission_id);
        assert_eq!(3, loaded.priority);
        assert_eq!(ExecutionStatus::Pending, loaded.status);
        assert!(loaded.worker_id.is_none());
        assert!(loaded.assigned_at.is_none());
        assert!(loaded.started_at.is_none());
    }

    #[test]
    fn enqueue_rejects_second_live_item() {
        let store = store();
        let submission_id = Uuid::new_v4();
        store.enqueue(&QueueItem::new(submission_id, 1)).unwrap();

        match store.enqueue(&QueueItem::new(submission_id, 1)) {
            Err(Error(ErrorKind::DuplicateLiveItem(..), ..)) => (),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn enqueue_allows_new_item_after_terminal() {
        let store = store();
        let submission_id = Uuid::new_v4();
        store.enqueue(&QueueItem::new(submission_id, 1)).unwrap();

        let claimed = store.claim_next("w1").unwrap().unwrap();
        store.complete(claimed.id, "w1").unwrap();

        store.enqueue(&QueueItem::new(submission_id, 5)).unwrap();
    }

    #[test]
    fn claim_order_priority_then_age() {
        let store = store();
        let a = item_at(1, 1000);
        let b = item_at(5, 1001);
        let c = item_at(5, 1002);
        store.enqueue(&a).unwrap();
        store.enqueue(&b).unwrap();
        store.enqueue(&c).unwrap();

        assert_eq!(b.id, store.claim_next("w1").unwrap().unwrap().id);
        assert_eq!(c.id, store.claim_next("w1").unwrap().unwrap().id);
        assert_eq!(a.id, store.claim_next("w1").unwrap().unwrap().id);
        assert!(store.claim_next("w1").unwrap().is_none());
    }

    #[test]
    fn claim_sets_lease_fields() {
        let store = store();
        store.enqueue(&QueueItem::new(Uuid::new_v4(), 1)).unwrap();

        let claimed = store.claim_next("w7").unwrap().unwrap();
        assert_eq!(ExecutionStatus::Running, claimed.status);
        assert_eq!(Some(String::from("w7")), claimed.worker_id);
        assert!(claimed.assigned_at.is_some());
        assert!(claimed.started_at.is_some());
    }

    #[test]
    fn concurrent_claims_never_share_an_item() {
        let store = Arc::new(store());
        for _ in 0..8 {
            store.enqueue(&QueueItem::new(Uuid::new_v4(), 1)).unwrap();
        }

        let mut handles = Vec::new();
        for worker in 0..4 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                let worker_id = format!("w{}", worker);
                let mut claimed = Vec::new();
                while let Some(item) = store.claim_next(&worker_id).unwrap() {
                    claimed.push(item.id);
                }
                claimed
            }));
        }

        let mut all: Vec<Uuid> = handles.into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(8, total);
        assert_eq!(8, all.len());
    }

    #[test]
    fn complete_requires_matching_lease() {
        let store = store();
        store.enqueue(&QueueItem::new(Uuid::new_v4(), 1)).unwrap();
        let claimed = store.claim_next("w1").unwrap().unwrap();

        match store.complete(claimed.id, "w2") {
            Err(Error(ErrorKind::LeaseMismatch(..), ..)) => (),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }

        store.complete(claimed.id, "w1").unwrap();
        let finished = store.find_by_id(claimed.id).unwrap().unwrap();
        assert_eq!(ExecutionStatus::Completed, finished.status);
        assert!(finished.completed_at.is_some());
    }

    #[test]
    fn fail_records_message() {
        let store = store();
        store.enqueue(&QueueItem::new(Uuid::new_v4(), 1)).unwrap();
        let claimed = store.claim_next("w1").unwrap().unwrap();

        store.fail(claimed.id, "w1", "sandbox unavailable").unwrap();
        let failed = store.find_by_id(claimed.id).unwrap().unwrap();
        assert_eq!(ExecutionStatus::Failed, failed.status);
        assert_eq!(Some(String::from("sandbox unavailable")), failed.error_message);
    }

    #[test]
    fn release_worker_returns_items_to_pending() {
        let store = store();
        for _ in 0..3 {
            store.enqueue(&QueueItem::new(Uuid::new_v4(), 1)).unwrap();
        }
        store.claim_next("w1").unwrap().unwrap();
        store.claim_next("w1").unwrap().unwrap();
        store.claim_next("w2").unwrap().unwrap();

        assert_eq!(2, store.release_worker("w1").unwrap());
        assert_eq!(2, store.count_by_status(ExecutionStatus::Pending).unwrap());
        assert_eq!(1, store.count_by_status(ExecutionStatus::Running).unwrap());

        // Released items carry no stale lease fields.
        for item in store.find_stale(u64::max_value()).unwrap() {
            assert_eq!(Some(String::from("w2")), item.worker_id);
        }
    }

    #[test]
    fn increment_retry_bumps_and_releases() {
        let store = store();
        store.enqueue(&QueueItem::new(Uuid::new_v4(), 1)).unwrap();
        let claimed = store.claim_next("w1").unwrap().unwrap();

        assert_eq!(1, store.increment_retry(claimed.id).unwrap());
        let item = store.find_by_id(claimed.id).unwrap().unwrap();
        assert_eq!(ExecutionStatus::Pending, item.status);
        assert_eq!(1, item.retry_count);
        assert!(item.worker_id.is_none());
        assert!(item.started_at.is_none());
        assert!(item.retry_count <= item.max_retries);
    }

    #[test]
    fn increment_retry_respects_budget() {
        let store = store();
        let mut item = QueueItem::new(Uuid::new_v4(), 1);
        item.max_retries = 1;
        store.enqueue(&item).unwrap();

        store.claim_next("w1").unwrap().unwrap();
        assert_eq!(1, store.increment_retry(item.id).unwrap());

        store.claim_next("w1").unwrap().unwrap();
        match store.increment_retry(item.id) {
            Err(Error(ErrorKind::RetriesExhausted(..), ..)) => (),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn stale_detection_and_purge() {
        let store = store();
        store.enqueue(&QueueItem::new(Uuid::new_v4(), 1)).unwrap();
        let claimed = store.claim_next("w1").unwrap().unwrap();

        let stale = store.find_stale(now_millis() + 1).unwrap();
        assert_eq!(1, stale.len());
        assert_eq!(claimed.id, stale[0].id);
        assert!(store.find_stale(claimed.started_at.unwrap()).unwrap().is_empty());

        store.complete(claimed.id, "w1").unwrap();
        assert_eq!(1, store.purge_completed_before(now_millis() + 1).unwrap());
        assert!(store.find_by_id(claimed.id).unwrap().is_none());
    }

    #[test]
    fn oldest_pending_age() {
        let store = store();
        assert!(store.oldest_pending_age_ms(now_millis()).unwrap().is_none());

        let old = item_at(1, 1000);
        let newer = item_at(1, 5000);
        store.enqueue(&old).unwrap();
        store.enqueue(&newer).unwrap();

        assert_eq!(Some(9000), store.oldest_pending_age_ms(10_000).unwrap());
    }
}
