//! Bounded in-memory store of finished results.
//!
//! Results are kept only until newer ones push them out, oldest first.
//! This is a convenience for callers that want to fetch a result again
//! shortly after a job finishes, not a durable record.

use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
};

use crate::result::{DocumentResult, JobStatus};

/// A compact view of one stored result.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub page_count: usize,
    pub confidence: f32,
    pub character_count: usize,
    pub elapsed_ms: u64,
}

/// Keeps the most recent finished results.
pub struct JobStore {
    capacity: usize,
    results: Mutex<VecDeque<DocumentResult>>,
}

impl JobStore {
    /// Create a store that keeps at most `capacity` results.
    ///
    /// A capacity of zero disables the store entirely.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            results: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a finished result, evicting the oldest if the store is full.
    pub fn insert(&self, result: DocumentResult) {
        if self.capacity == 0 {
            return;
        }
        let mut results = self.lock();
        while results.len() >= self.capacity {
            results.pop_front();
        }
        results.push_back(result);
    }

    /// Fetch a stored result by job ID.
    pub fn get(&self, job_id: &str) -> Option<DocumentResult> {
        self.lock()
            .iter()
            .find(|result| result.job_id == job_id)
            .cloned()
    }

    /// Summaries of the stored results, oldest first.
    pub fn list(&self) -> Vec<StoredSummary> {
        self.lock()
            .iter()
            .map(|result| StoredSummary {
                job_id: result.job_id.clone(),
                status: result.status,
                page_count: result.page_count,
                confidence: result.aggregate_confidence,
                character_count: result.character_count,
                elapsed_ms: result.elapsed_ms,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<DocumentResult>> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
