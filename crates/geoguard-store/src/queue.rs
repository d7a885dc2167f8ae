//! Local Durable Queue.
//!
//! Samples whose remote write failed are appended here and survive restarts.
//! The queue keeps the newest `capacity` entries per account; appending past
//! the bound evicts the oldest. Only the newest entry is ever re-sent, and
//! the whole queue is cleared once a re-delivery succeeds.

use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, OptionalExtension};

use geoguard_shared::types::now_ms;
use geoguard_shared::PositionSample;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::PendingQueueEntry;

const ENTRY_COLUMNS: &str =
    "id, latitude, longitude, accuracy_meters, captured_at_ms, enqueued_at_ms";

impl Database {
    /// Append a sample and evict entries beyond `capacity`, atomically.
    pub fn enqueue_pending(
        &self,
        account: &str,
        sample: &PositionSample,
        enqueued_at_ms: i64,
        capacity: usize,
    ) -> Result<PendingQueueEntry> {
        if capacity == 0 {
            return Err(StoreError::InvalidCapacity(capacity));
        }

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO pending_samples
                (account, latitude, longitude, accuracy_meters, captured_at_ms, enqueued_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                account,
                sample.latitude,
                sample.longitude,
                sample.accuracy_meters,
                sample.captured_at_ms,
                enqueued_at_ms,
            ],
        )?;
        let id = tx.last_insert_rowid();

        let evicted = tx.execute(
            "DELETE FROM pending_samples
             WHERE account = ?1
               AND id NOT IN (
                   SELECT id FROM pending_samples
                   WHERE account = ?1
                   ORDER BY id DESC
                   LIMIT ?2
               )",
            params![account, capacity as i64],
        )?;
        tx.commit()?;

        if evicted > 0 {
            tracing::debug!(account, evicted, "evicted oldest pending samples");
        }

        Ok(PendingQueueEntry {
            id,
            sample: *sample,
            enqueued_at_ms,
        })
    }

    pub fn latest_pending(&self, account: &str) -> Result<Option<PendingQueueEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM pending_samples
             WHERE account = ?1 ORDER BY id DESC LIMIT 1"
        );
        let entry = self
            .conn()
            .query_row(&sql, params![account], row_to_entry)
            .optional()?;
        Ok(entry)
    }

    /// All pending entries, oldest first.
    pub fn list_pending(&self, account: &str) -> Result<Vec<PendingQueueEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM pending_samples
             WHERE account = ?1 ORDER BY id ASC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![account], row_to_entry)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub fn pending_count(&self, account: &str) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM pending_samples WHERE account = ?1",
            params![account],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Remove every pending entry of the account. Returns how many were removed.
    pub fn clear_pending(&self, account: &str) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM pending_samples WHERE account = ?1",
            params![account],
        )?;
        Ok(removed)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingQueueEntry> {
    Ok(PendingQueueEntry {
        id: row.get(0)?,
        sample: PositionSample {
            latitude: row.get(1)?,
            longitude: row.get(2)?,
            accuracy_meters: row.get(3)?,
            captured_at_ms: row.get(4)?,
        },
        enqueued_at_ms: row.get(5)?,
    })
}

/// Account-scoped, cloneable handle on the pending queue.
#[derive(Clone)]
pub struct PendingQueue {
    db: Arc<Mutex<Database>>,
    account: String,
    capacity: usize,
}

impl PendingQueue {
    pub fn new(db: Arc<Mutex<Database>>, account: impl Into<String>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(StoreError::InvalidCapacity(capacity));
        }
        Ok(Self {
            db,
            account: account.into(),
            capacity,
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Same queue, different account (the database is shared).
    pub fn for_account(&self, account: impl Into<String>) -> Self {
        Self {
            db: self.db.clone(),
            account: account.into(),
            capacity: self.capacity,
        }
    }

    pub fn enqueue(&self, sample: &PositionSample) -> Result<PendingQueueEntry> {
        self.lock()?
            .enqueue_pending(&self.account, sample, now_ms(), self.capacity)
    }

    pub fn peek_latest(&self) -> Result<Option<PositionSample>> {
        Ok(self
            .lock()?
            .latest_pending(&self.account)?
            .map(|entry| entry.sample))
    }

    /// Clear the queue after a confirmed re-delivery.
    pub fn drain(&self) -> Result<usize> {
        self.lock()?.clear_pending(&self.account)
    }

    pub fn len(&self) -> Result<usize> {
        self.lock()?.pending_count(&self.account)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn entries(&self) -> Result<Vec<PendingQueueEntry>> {
        self.lock()?.list_pending(&self.account)
    }

    pub fn save_last_known(&self, sample: &PositionSample) -> Result<()> {
        self.lock()?
            .save_last_known(&self.account, sample, now_ms())
    }

    pub fn last_known(&self) -> Result<Option<PositionSample>> {
        self.lock()?.last_known(&self.account)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_queue(dir: &tempfile::TempDir, capacity: usize) -> PendingQueue {
        let db = Database::open_at(&dir.path().join("queue.db")).unwrap();
        PendingQueue::new(Arc::new(Mutex::new(db)), "device-1:user-1", capacity).unwrap()
    }

    fn sample(i: i64) -> PositionSample {
        PositionSample::at(10.0 + i as f64 * 0.01, 77.0, Some(5.0), 1_000 + i)
    }

    #[test]
    fn test_enqueue_and_peek_latest() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open_queue(&dir, 10);

        assert!(queue.peek_latest().unwrap().is_none());
        queue.enqueue(&sample(1)).unwrap();
        queue.enqueue(&sample(2)).unwrap();

        assert_eq!(queue.len().unwrap(), 2);
        assert_eq!(queue.peek_latest().unwrap(), Some(sample(2)));
    }

    #[test]
    fn test_eleventh_entry_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open_queue(&dir, 10);

        for i in 0..11 {
            queue.enqueue(&sample(i)).unwrap();
            assert!(queue.len().unwrap() <= 10);
        }

        let entries = queue.entries().unwrap();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries.first().unwrap().sample, sample(1));
        assert_eq!(entries.last().unwrap().sample, sample(10));
    }

    #[test]
    fn test_drain_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open_queue(&dir, 10);

        queue.enqueue(&sample(1)).unwrap();
        queue.enqueue(&sample(2)).unwrap();
        assert_eq!(queue.drain().unwrap(), 2);
        assert!(queue.is_empty().unwrap());
        assert!(queue.peek_latest().unwrap().is_none());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let queue = open_queue(&dir, 10);
            queue.enqueue(&sample(7)).unwrap();
        }
        let queue = open_queue(&dir, 10);
        assert_eq!(queue.peek_latest().unwrap(), Some(sample(7)));
    }

    #[test]
    fn test_accounts_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open_queue(&dir, 2);
        let other = queue.for_account("device-1:user-2");

        queue.enqueue(&sample(1)).unwrap();
        other.enqueue(&sample(2)).unwrap();
        other.enqueue(&sample(3)).unwrap();
        other.enqueue(&sample(4)).unwrap();

        assert_eq!(queue.len().unwrap(), 1);
        assert_eq!(other.len().unwrap(), 2);
        other.drain().unwrap();
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("q.db")).unwrap();
        assert!(matches!(
            PendingQueue::new(Arc::new(Mutex::new(db)), "a", 0),
            Err(StoreError::InvalidCapacity(0))
        ));
    }
}
