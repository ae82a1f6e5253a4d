//! Last observed state per job, used only to detect changes between polls.
//!
//! The store stays the source of truth. After a restart the cache is empty,
//! so a resumed job emits one baseline progress event on its first poll.

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSnapshot {
    pub status: Option<String>,
    pub progress: Option<i64>,
    /// Raw sub-events already ingested; the ingestion cursor.
    pub event_count: Option<usize>,
}

#[derive(Debug, Default)]
pub struct JobStateCache {
    entries: RwLock<HashMap<String, JobSnapshot>>,
}

impl JobStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_id: &str) -> Option<JobSnapshot> {
        match self.entries.read() {
            Ok(entries) => entries.get(job_id).cloned(),
            Err(_) => {
                log::warn!("Job state cache lock poisoned; treating {} as unseen", job_id);
                None
            }
        }
    }

    pub fn event_cursor(&self, job_id: &str) -> Option<usize> {
        self.get(job_id).and_then(|snapshot| snapshot.event_count)
    }

    /// True when status or progress differ from the cached values, or the
    /// job has never been seen.
    pub fn has_changed(&self, job_id: &str, status: &str, progress: Option<i64>) -> bool {
        match self.get(job_id) {
            Some(snapshot) => snapshot.status.as_deref() != Some(status) || snapshot.progress != progress,
            None => true,
        }
    }

    pub fn record(&self, job_id: &str, snapshot: JobSnapshot) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(job_id.to_string(), snapshot);
        }
    }

    pub fn remove(&self, job_id: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(job_id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
