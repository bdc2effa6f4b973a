//! Write-back buffer: batches statements and flushes them to the store.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::PathError;
use super::event::QueueEvent;
use crate::store::{ResourceStore, Statement, StoreError, StoreResult};

/// A generated statement waiting to be flushed.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub event: QueueEvent,
    pub statement: Statement,
}

#[derive(Debug)]
pub struct FlushReport {
    pub batch: u64,
    pub results: StoreResult<Vec<StoreResult<()>>>,
}

/// Per-path verdict of a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    Written,
    Failed(PathError),
    Cancelled,
}

pub struct WriteBackBuffer {
    store: Arc<dyn ResourceStore>,
    pending: Vec<PendingWrite>,
    flushing: HashMap<u64, Vec<PendingWrite>>,
    batch_limit: usize,
    max_flushes: usize,
    next_batch: u64,
    reports: mpsc::UnboundedSender<FlushReport>,
    shutdown: CancellationToken,
}

impl WriteBackBuffer {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        batch_limit: usize,
        max_flushes: usize,
        reports: mpsc::UnboundedSender<FlushReport>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            pending: Vec::new(),
            flushing: HashMap::new(),
            batch_limit: batch_limit.max(1),
            max_flushes: max_flushes.max(1),
            next_batch: 0,
            reports,
            shutdown,
        }
    }

    pub fn push(&mut self, write: PendingWrite) {
        self.pending.push(write);
    }

    /// Statements buffered and not yet handed to the store.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.batch_limit
    }

    /// Statements currently being written by outstanding flushes.
    pub fn in_flight(&self) -> usize {
        self.flushing.values().map(Vec::len).sum()
    }

    pub fn flushes(&self) -> usize {
        self.flushing.len()
    }

    /// No further flush may start until one completes.
    pub fn is_saturated(&self) -> bool {
        self.flushing.len() >= self.max_flushes
    }

    /// Nothing buffered and nothing being written.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.flushing.is_empty()
    }

    /// Send up to one batch to the store. Returns the batch number.
    pub fn flush(&mut self) -> Option<u64> {
        if self.pending.is_empty() || self.is_saturated() {
            return None;
        }

        let take = self.pending.len().min(self.batch_limit);
        let batch: Vec<PendingWrite> = self.pending.drain(..take).collect();
        let statements: Vec<Statement> = batch.iter().map(|w| w.statement.clone()).collect();

        self.next_batch += 1;
        let id = self.next_batch;
        self.flushing.insert(id, batch);

        let store = Arc::clone(&self.store);
        let reports = self.reports.clone();
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            let results = store.apply_batch(&statements, &cancel).await;
            let _ = reports.send(FlushReport { batch: id, results });
        });
        Some(id)
    }

    /// Match a flush report back to the writes it carried.
    pub fn complete(&mut self, report: FlushReport) -> Vec<(PendingWrite, WriteResult)> {
        let Some(batch) = self.flushing.remove(&report.batch) else {
            return Vec::new();
        };

        match report.results {
            Ok(results) => {
                let mut results = results.into_iter();
                batch
                    .into_iter()
                    .map(|write| {
                        let verdict = match results.next() {
                            Some(Ok(())) => WriteResult::Written,
                            Some(Err(StoreError::Cancelled)) => WriteResult::Cancelled,
                            Some(Err(e)) => WriteResult::Failed(flush_error(&write, &e)),
                            None => WriteResult::Failed(PathError::Flush {
                                path: write.event.path.clone(),
                                reason: "store returned no result".to_string(),
                            }),
                        };
                        (write, verdict)
                    })
                    .collect()
            }
            Err(StoreError::Cancelled) => batch
                .into_iter()
                .map(|write| (write, WriteResult::Cancelled))
                .collect(),
            Err(e) => batch
                .into_iter()
                .map(|write| {
                    let verdict = WriteResult::Failed(flush_error(&write, &e));
                    (write, verdict)
                })
                .collect(),
        }
    }
}

fn flush_error(write: &PendingWrite, error: &StoreError) -> PathError {
    PathError::Flush {
        path: write.event.path.clone(),
        reason: error.to_string(),
    }
}
