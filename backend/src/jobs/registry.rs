//! Job registry - the state machine behind every preprocessing task.
//!
//! ```text
//! queued ──claim──▶ processing ──▶ completed
//!                        │
//!                        └───────▶ failed
//! ```
//!
//! A job is inserted as `queued` before its `task_id` is returned, so a
//! poller can never see an unknown id for a job it just submitted. The one
//! worker that wins [`JobRegistry::claim`] receives a [`JobHandle`], the
//! only way to write to that job afterwards. Readers get cloned snapshots
//! taken under the lock, never a half-updated record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::events::{JobEvent, JobEvents};
use crate::error::PreprocessError;
use crate::models::PreprocessOptions;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Allowed moves. Nothing leaves a terminal state and no state repeats.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Processing)
                | (JobState::Processing, JobState::Completed)
                | (JobState::Processing, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Processing => write!(f, "processing"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub output_file_id: String,
    pub rows_processed: usize,
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows_removed: usize,
    #[serde(default)]
    pub unresolved_columns: Vec<String>,
}

/// A preprocessing job as seen by readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub task_id: String,
    pub file_id: String,
    pub options: PreprocessOptions,
    pub state: JobState,
    pub progress_fraction: f64,
    pub rows_processed: usize,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    fn new(file_id: String, options: PreprocessOptions) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            file_id,
            options,
            state: JobState::Queued,
            progress_fraction: 0.0,
            rows_processed: 0,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    jobs: RwLock<HashMap<String, Job>>,
    events: JobEvents,
}

/// Shared, cloneable registry of jobs keyed by `task_id`.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    inner: Arc<Inner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry publishing to an existing event channel.
    pub fn with_events(events: JobEvents) -> Self {
        Self {
            inner: Arc::new(Inner { jobs: RwLock::default(), events }),
        }
    }

    pub fn events(&self) -> &JobEvents {
        &self.inner.events
    }

    // A panic while holding the lock cannot leave a job half-written: every
    // mutation below is a plain field assignment, so the data stays usable.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Job>> {
        self.inner.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Job>> {
        self.inner.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a new queued job and return its snapshot.
    pub fn create(&self, file_id: impl Into<String>, options: PreprocessOptions) -> Job {
        let job = Job::new(file_id.into(), options);
        self.write().insert(job.task_id.clone(), job.clone());
        self.inner.events.publish(JobEvent::from(&job));
        job
    }

    /// Consistent snapshot of one job.
    pub fn get(&self, task_id: &str) -> Option<Job> {
        self.read().get(task_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move a queued job to `processing` and hand out its only writer.
    ///
    /// Returns `None` when the job is unknown or already claimed.
    pub fn claim(&self, task_id: &str) -> Option<JobHandle> {
        let snapshot = {
            let mut jobs = self.write();
            let job = jobs.get_mut(task_id)?;
            if !job.state.can_transition_to(JobState::Processing) {
                return None;
            }
            job.state = JobState::Processing;
            job.started_at = Some(Utc::now());
            job.clone()
        };
        self.inner.events.publish(JobEvent::from(&snapshot));

        Some(JobHandle {
            registry: self.clone(),
            task_id: snapshot.task_id,
            file_id: snapshot.file_id,
            options: snapshot.options,
            finished: false,
        })
    }

    /// Apply `update` to a processing job and publish the result.
    fn update(&self, task_id: &str, update: impl FnOnce(&mut Job)) {
        let snapshot = {
            let mut jobs = self.write();
            let Some(job) = jobs.get_mut(task_id) else {
                return;
            };
            if job.state != JobState::Processing {
                return;
            }
            update(job);
            job.clone()
        };
        self.inner.events.publish(JobEvent::from(&snapshot));
    }
}

/// Exclusive write access to one processing job.
///
/// Not `Clone`: only the claiming worker can record progress or a result.
/// Dropping a handle without finishing (a panicking pipeline, for one)
/// marks the job failed so it never stays `processing` forever.
#[derive(Debug)]
pub struct JobHandle {
    registry: JobRegistry,
    task_id: String,
    file_id: String,
    options: PreprocessOptions,
    finished: bool,
}

impl JobHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn options(&self) -> &PreprocessOptions {
        &self.options
    }

    /// Record progress. Values are clamped to `[0, 1]` and never move backwards.
    pub fn progress(&self, fraction: f64, rows_processed: usize) {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        self.registry.update(&self.task_id, |job| {
            job.progress_fraction = job.progress_fraction.max(fraction);
            job.rows_processed = rows_processed;
        });
    }

    pub fn complete(mut self, result: JobResult) {
        self.finished = true;
        self.registry.update(&self.task_id, |job| {
            job.state = JobState::Completed;
            job.progress_fraction = 1.0;
            job.rows_processed = result.rows_processed;
            job.result = Some(result);
            job.finished_at = Some(Utc::now());
        });
    }

    pub fn fail(mut self, error: impl Into<String>) {
        self.finished = true;
        self.mark_failed(error.into());
    }

    fn mark_failed(&self, error: String) {
        self.registry.update(&self.task_id, |job| {
            job.state = JobState::Failed;
            job.error = Some(error);
            job.finished_at = Some(Utc::now());
        });
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.mark_failed(PreprocessError::Abandoned.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn result(output: &str) -> JobResult {
        JobResult {
            output_file_id: output.to_string(),
            rows_processed: 3,
            columns: vec!["a".into()],
            rows_removed: 0,
            unresolved_columns: vec![],
        }
    }

    #[test]
    fn test_transition_table() {
        use JobState::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        for terminal in [Completed, Failed] {
            assert!(terminal.is_terminal());
            for next in [Queued, Processing, Completed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(!Queued.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Queued));
    }

    #[test]
    fn test_job_visible_as_queued_immediately() {
        let registry = JobRegistry::new();
        let job = registry.create("file-1", PreprocessOptions::default());

        let seen = registry.get(&job.task_id).unwrap();
        assert_eq!(seen.state, JobState::Queued);
        assert_eq!(seen.progress_fraction, 0.0);
        assert!(seen.result.is_none());
    }

    #[test]
    fn test_claim_is_exclusive() {
        let registry = JobRegistry::new();
        let job = registry.create("file-1", PreprocessOptions::default());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let task_id = job.task_id.clone();
                thread::spawn(move || registry.claim(&task_id).map(|h| h.complete(result("out"))))
            })
            .collect();
        let winners = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();

        assert_eq!(winners, 1);
        assert_eq!(registry.get(&job.task_id).unwrap().state, JobState::Completed);
    }

    #[test]
    fn test_progress_is_monotonic_and_clamped() {
        let registry = JobRegistry::new();
        let job = registry.create("file-1", PreprocessOptions::default());
        let handle = registry.claim(&job.task_id).unwrap();

        handle.progress(0.5, 10);
        handle.progress(0.3, 12);
        assert_eq!(registry.get(&job.task_id).unwrap().progress_fraction, 0.5);
        handle.progress(7.0, 12);
        assert_eq!(registry.get(&job.task_id).unwrap().progress_fraction, 1.0);
        handle.fail("boom");
    }

    #[test]
    fn test_complete_stores_result() {
        let registry = JobRegistry::new();
        let job = registry.create("file-1", PreprocessOptions::default());
        registry.claim(&job.task_id).unwrap().complete(result("out-1"));

        let done = registry.get(&job.task_id).unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.progress_fraction, 1.0);
        assert_eq!(done.rows_processed, 3);
        assert_eq!(done.result.unwrap().output_file_id, "out-1");
        assert!(done.finished_at.is_some());
        // terminal: cannot be claimed again
        assert!(registry.claim(&job.task_id).is_none());
    }

    #[test]
    fn test_fail_records_error() {
        let registry = JobRegistry::new();
        let job = registry.create("file-1", PreprocessOptions::default());
        registry.claim(&job.task_id).unwrap().fail("Input file not found: file-1");

        let failed = registry.get(&job.task_id).unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.error.as_deref(), Some("Input file not found: file-1"));
        assert!(failed.result.is_none());
    }

    #[test]
    fn test_dropped_handle_fails_job() {
        let registry = JobRegistry::new();
        let job = registry.create("file-1", PreprocessOptions::default());
        drop(registry.claim(&job.task_id).unwrap());

        let job = registry.get(&job.task_id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("Worker stopped before the job finished"));
    }

    #[test]
    fn test_unknown_task() {
        let registry = JobRegistry::new();
        assert!(registry.get("nope").is_none());
        assert!(registry.claim("nope").is_none());
        assert!(registry.is_empty());
    }
}
