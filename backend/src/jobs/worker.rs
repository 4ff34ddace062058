//! Background workers executing preprocessing jobs.
//!
//! Task ids go through an unbounded queue shared by every worker. A worker
//! pops an id, claims the job in the registry (losing the claim means some
//! other worker already owns it) and runs the CPU-bound pipeline on the
//! blocking pool. Jobs are never retried.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::registry::{JobHandle, JobRegistry, JobResult};
use crate::error::{PreprocessError, PreprocessResult, ServiceError, ServiceResult};
use crate::parser;
use crate::store::{ArtifactStore, NewArtifact};
use crate::transform::run_pipeline_with_progress;

// Progress budget: loading, pipeline stages, writing the output.
const LOADED: f64 = 0.2;
const TRANSFORMED: f64 = 0.9;

/// Sending side of the work queue.
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<String>,
}

/// Receiving side of the work queue, consumed by [`spawn_workers`].
#[derive(Debug)]
pub struct JobReceiver {
    receiver: mpsc::UnboundedReceiver<String>,
}

/// Create a connected queue pair.
pub fn job_queue() -> (JobQueue, JobReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (JobQueue { sender }, JobReceiver { receiver })
}

impl JobQueue {
    pub fn push(&self, task_id: &str) -> ServiceResult<()> {
        self.sender
            .send(task_id.to_string())
            .map_err(|_| ServiceError::QueueClosed)
    }
}

/// Spawn `count` workers draining `receiver`. They stop once every
/// [`JobQueue`] has been dropped and the queue is empty.
pub fn spawn_workers(
    count: usize,
    receiver: JobReceiver,
    registry: JobRegistry,
    store: Arc<dyn ArtifactStore>,
) -> Vec<JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver.receiver));
    (0..count.max(1))
        .map(|id| {
            let receiver = Arc::clone(&receiver);
            let registry = registry.clone();
            let store = Arc::clone(&store);
            tokio::spawn(worker_loop(id, receiver, registry, store))
        })
        .collect()
}

async fn worker_loop(
    id: usize,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    registry: JobRegistry,
    store: Arc<dyn ArtifactStore>,
) {
    info!(worker = id, "worker started");
    loop {
        // the lock is released before the job runs
        let next = receiver.lock().await.recv().await;
        let Some(task_id) = next else {
            break;
        };

        let Some(handle) = registry.claim(&task_id) else {
            warn!(worker = id, %task_id, "job not claimable, skipping");
            continue;
        };
        debug!(worker = id, %task_id, "claimed job");

        let store = Arc::clone(&store);
        let outcome = tokio::task::spawn_blocking(move || execute_job(store.as_ref(), handle)).await;
        if let Err(e) = outcome {
            // the handle was dropped while unwinding, which already failed the job
            error!(worker = id, %task_id, error = %e, "job task aborted");
        }
    }
    info!(worker = id, "worker stopped");
}

/// Run one claimed job to a terminal state. Blocking.
pub fn execute_job(store: &dyn ArtifactStore, handle: JobHandle) {
    match run_job(store, &handle) {
        Ok(result) => handle.complete(result),
        Err(e) => handle.fail(e.to_string()),
    }
}

/// Load the full input, transform it and store the output.
///
/// The output is stored before the result is returned, so a job is only
/// ever marked completed with an artifact that can be opened. On error
/// nothing has been stored.
fn run_job(store: &dyn ArtifactStore, handle: &JobHandle) -> PreprocessResult<JobResult> {
    let input = store.metadata(handle.file_id())?;
    let reader = store.open(handle.file_id())?;
    let loaded = parser::read_table(reader, None)?;
    handle.progress(LOADED, loaded.table.row_count());

    let output = run_pipeline_with_progress(loaded.table, handle.options(), |stage| {
        let fraction = LOADED + stage.fraction() * (TRANSFORMED - LOADED);
        handle.progress(fraction, stage.rows);
    });

    let bytes = parser::write_csv(&output.table).map_err(PreprocessError::Write)?;
    let record = store.put(&bytes, NewArtifact::derived(&input, output.rows_processed as u64))?;

    Ok(JobResult {
        output_file_id: record.file_id,
        rows_processed: output.rows_processed,
        columns: output.table.headers,
        rows_removed: output.rows_removed,
        unresolved_columns: output.unresolved_columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::registry::JobState;
    use crate::models::{MissingStrategy, PreprocessOptions};
    use crate::store::MemoryArtifactStore;
    use std::time::Duration;

    async fn wait_terminal(registry: &JobRegistry, task_id: &str) -> crate::jobs::Job {
        for _ in 0..200 {
            let job = registry.get(task_id).unwrap();
            if job.state.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {task_id} did not finish");
    }

    #[test]
    fn test_execute_job_fill_mean() {
        let store = MemoryArtifactStore::new();
        let input = store.put(b"n\n1\nNA\n3\n", NewArtifact::default()).unwrap();
        let registry = JobRegistry::new();
        let options = PreprocessOptions {
            handle_missing: MissingStrategy::FillMean,
            ..PreprocessOptions::default()
        };
        let job = registry.create(&input.file_id, options);

        execute_job(&store, registry.claim(&job.task_id).unwrap());

        let done = registry.get(&job.task_id).unwrap();
        assert_eq!(done.state, JobState::Completed);
        let result = done.result.unwrap();
        assert_eq!(result.rows_processed, 3);
        assert_eq!(result.columns, vec!["n"]);
        assert_eq!(store.read_all(&result.output_file_id).unwrap(), b"n\n1\n2\n3\n");
    }

    #[test]
    fn test_missing_input_fails_without_output() {
        let store = MemoryArtifactStore::new();
        let registry = JobRegistry::new();
        let job = registry.create("gone", PreprocessOptions::default());

        execute_job(&store, registry.claim(&job.task_id).unwrap());

        let failed = registry.get(&job.task_id).unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert!(failed.error.unwrap().contains("gone"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_unparsable_input_fails() {
        let store = MemoryArtifactStore::new();
        let input = store.put(b"a,b\n1,2,3\n", NewArtifact::default()).unwrap();
        let registry = JobRegistry::new();
        let job = registry.create(&input.file_id, PreprocessOptions::default());

        execute_job(&store, registry.claim(&job.task_id).unwrap());

        assert_eq!(registry.get(&job.task_id).unwrap().state, JobState::Failed);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_workers_drain_queue() {
        let store = Arc::new(MemoryArtifactStore::new());
        let registry = JobRegistry::new();
        let (queue, receiver) = job_queue();
        let workers = spawn_workers(3, receiver, registry.clone(), store.clone());

        let input = store.put(b"a\n1\n1\n2\n", NewArtifact::default()).unwrap();
        let options = PreprocessOptions { remove_duplicates: true, ..PreprocessOptions::default() };
        let mut task_ids = Vec::new();
        for _ in 0..6 {
            let job = registry.create(&input.file_id, options.clone());
            queue.push(&job.task_id).unwrap();
            task_ids.push(job.task_id);
        }

        for task_id in &task_ids {
            let job = wait_terminal(&registry, task_id).await;
            assert_eq!(job.state, JobState::Completed);
            assert_eq!(job.result.unwrap().rows_removed, 1);
        }

        drop(queue);
        for worker in workers {
            worker.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_progress_events_are_monotonic() {
        let store = Arc::new(MemoryArtifactStore::new());
        let registry = JobRegistry::new();
        let mut events = registry.events().subscribe();
        let (queue, receiver) = job_queue();
        spawn_workers(1, receiver, registry.clone(), store.clone());

        let input = store.put(b"a,b\n1, x\n1, x\n,y\n", NewArtifact::default()).unwrap();
        let options = PreprocessOptions {
            remove_duplicates: true,
            trim_whitespace: true,
            handle_missing: MissingStrategy::FillMode,
            ..PreprocessOptions::default()
        };
        let job = registry.create(&input.file_id, options);
        queue.push(&job.task_id).unwrap();

        let mut last = -1.0;
        let mut states = Vec::new();
        loop {
            let event = events.recv().await.unwrap();
            assert!(event.progress >= last);
            last = event.progress;
            if states.last() != Some(&event.state) {
                states.push(event.state);
            }
            if event.state.is_terminal() {
                break;
            }
        }
        assert_eq!(
            states,
            vec![JobState::Queued, JobState::Processing, JobState::Completed]
        );
    }
}
