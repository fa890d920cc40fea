//! # Bounded Store
//!
//! The single, capacity-limited history of pet records shared by the
//! ingestion task and every HTTP handler.
//!
//! ## Core Rules:
//!
//! 1.  **One Lock**: the sequence sits behind a private `Mutex`. Inserts,
//!     snapshots and restores all take it, so a reader never observes a
//!     half-applied insert and the duplicate check cannot race the push.
//!
//! 2.  **FIFO Eviction**: insertion order is recency order. When a push takes
//!     the length past `capacity`, the oldest record (index 0) is dropped.
//!
//! 3.  **Copy-out Reads**: `snapshot` clones the sequence under the lock and
//!     hands the copy out, so serialization happens after the lock is released.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::dedup;
use crate::core::record::PetRecord;

/// # Bounded Store
///
/// Share it behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct BoundedStore {
    records: Mutex<Vec<PetRecord>>,
    capacity: usize,
}

impl BoundedStore {
    /// Creates an empty store. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(Vec::with_capacity(capacity + 1)),
            capacity,
        }
    }

    // Every mutation is a single push, remove or assignment, so a poisoned
    // guard still holds a whole sequence.
    fn lock(&self) -> MutexGuard<'_, Vec<PetRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Insert If Absent
    ///
    /// Appends `record` unless a record with the same `(name, job_id)` is
    /// already stored. Returns whether the record was inserted.
    pub fn insert_if_absent(&self, record: PetRecord) -> bool {
        let mut records = self.lock();

        if dedup::contains_key(&records, &record) {
            log::debug!("Duplicate pet '{}' on job {} ignored.", record.name, record.job_id);
            return false;
        }

        records.push(record);
        if records.len() > self.capacity {
            let evicted = records.remove(0);
            log::debug!("Store full ({}). Evicted oldest pet '{}' ({}).", self.capacity, evicted.name, evicted.job_id);
        }
        true
    }

    /// A point-in-time copy of the stored records, oldest first.
    pub fn snapshot(&self) -> Vec<PetRecord> {
        self.lock().clone()
    }

    /// Replaces the whole content with `records`.
    ///
    /// When `records` is longer than the capacity only the newest entries
    /// (the tail) are kept. Later duplicates of an already kept key are
    /// dropped so the key invariant holds for hand-edited snapshots too.
    pub fn restore(&self, records: Vec<PetRecord>) {
        let mut deduped: Vec<PetRecord> = Vec::with_capacity(records.len());
        for record in records {
            if !dedup::contains_key(&deduped, &record) {
                deduped.push(record);
            }
        }
        let overflow = deduped.len().saturating_sub(self.capacity);
        deduped.drain(..overflow);

        *self.lock() = deduped;
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
