// Background job tracking for fire-and-forget runs

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Unique identifier for background jobs
pub type JobId = u64;

/// Status of a background job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Finished { ok: usize, failed: usize },
}

/// Tracks tasks dispatched with `run_background`.
///
/// Results are not collected; the tracker only records per-job host counts
/// so callers can observe completion.
#[derive(Default)]
pub struct JobTracker {
    jobs: Mutex<HashMap<JobId, (String, JobStatus)>>,
    next_id: AtomicU64,
}

impl JobTracker {
    pub fn new() -> Self {
        JobTracker::default()
    }

    pub fn begin(&self, task_id: &str) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.jobs
            .lock()
            .insert(id, (task_id.to_string(), JobStatus::Running));
        id
    }

    pub fn finish(&self, id: JobId, ok: usize, failed: usize) {
        if let Some(entry) = self.jobs.lock().get_mut(&id) {
            entry.1 = JobStatus::Finished { ok, failed };
        }
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.lock().get(&id).map(|entry| entry.1.clone())
    }

    pub fn task_id(&self, id: JobId) -> Option<String> {
        self.jobs.lock().get(&id).map(|entry| entry.0.clone())
    }

    pub fn running(&self) -> usize {
        self.jobs
            .lock()
            .values()
            .filter(|entry| entry.1 == JobStatus::Running)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_lifecycle() {
        let tracker = JobTracker::new();
        let id = tracker.begin("task1");

        assert_eq!(tracker.status(id), Some(JobStatus::Running));
        assert_eq!(tracker.task_id(id).as_deref(), Some("task1"));
        assert_eq!(tracker.running(), 1);

        tracker.finish(id, 2, 1);
        assert_eq!(
            tracker.status(id),
            Some(JobStatus::Finished { ok: 2, failed: 1 })
        );
        assert_eq!(tracker.running(), 0);
    }

    #[test]
    fn test_ids_are_unique() {
        let tracker = JobTracker::new();
        let a = tracker.begin("t");
        let b = tracker.begin("t");
        assert_ne!(a, b);
    }
}
