//! Fixed-capacity batching in front of a [`CardStore`]

use crate::error::Result;
use crate::store::CardStore;
use alchemist_common::CanonicalRecord;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};

/// Committed-record interval between liveness log lines
pub const MILESTONE_INTERVAL: u64 = 10_000;

/// Buffers records and upserts them one batch at a time.
///
/// All upserts of a batch run concurrently and the commit returns only once
/// every one has finished, or on the first failure. Batches never overlap.
pub struct BatchCommitter {
    store: Arc<dyn CardStore>,
    capacity: usize,
    buffer: Vec<CanonicalRecord>,
    committed: u64,
    batches: u64,
}

impl BatchCommitter {
    /// `capacity` is clamped to at least one record
    pub fn new(store: Arc<dyn CardStore>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            store,
            capacity,
            buffer: Vec::with_capacity(capacity),
            committed: 0,
            batches: 0,
        }
    }

    /// Buffer a record without committing. Returns `true` once the buffer is full.
    pub fn push(&mut self, record: CanonicalRecord) -> bool {
        self.buffer.push(record);
        self.buffer.len() >= self.capacity
    }

    /// Buffer a record, committing the batch if this fills it
    pub async fn add(&mut self, record: CanonicalRecord) -> Result<()> {
        if self.push(record) {
            self.commit().await?;
        }
        Ok(())
    }

    /// Commit whatever is buffered, even a partial batch
    pub async fn flush(&mut self) -> Result<u64> {
        self.commit().await?;
        Ok(self.committed)
    }

    /// Upsert the buffered records and clear the buffer.
    ///
    /// Returns the number of records in the committed batch; an empty buffer
    /// is a no-op and does not count as a batch.
    pub async fn commit(&mut self) -> Result<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }

        let batch = std::mem::take(&mut self.buffer);
        let store = self.store.as_ref();
        try_join_all(batch.iter().map(|record| store.upsert(record))).await?;

        let before = self.committed;
        self.committed += batch.len() as u64;
        self.batches += 1;
        debug!(
            batch = self.batches,
            records = batch.len(),
            total = self.committed,
            "Committed batch"
        );

        if self.committed / MILESTONE_INTERVAL > before / MILESTONE_INTERVAL {
            info!(records = self.committed, "Processed {} cards", self.committed);
        }

        self.buffer.reserve(self.capacity);
        Ok(batch.len())
    }

    /// Records successfully committed so far
    pub fn committed(&self) -> u64 {
        self.committed
    }

    pub fn batches_committed(&self) -> u64 {
        self.batches
    }

    /// Records buffered but not yet committed
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
