//! The cleansing service: the five operations every transport exposes.
//!
//! [`Cleanser`] ties the artifact store, the job registry and the work queue
//! together. `upload` and `analyze` are synchronous and bounded by the
//! sampling policy; `submit_preprocess` only enqueues, so job failures are
//! never returned from it and show up in `get_task_status` instead.
//!
//! `upload`, `analyze` and `open_download` block on IO and parsing. Async
//! callers run them on the blocking pool.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::analysis::{self, QualityReport};
use crate::config::Limits;
use crate::error::{AnalysisError, ServiceError, ServiceResult, StoreError, ValidationError};
use crate::jobs::{self, JobEvents, JobQueue, JobReceiver, JobRegistry, JobResult, JobState};
use crate::models::{PreprocessOptions, UploadedFile};
use crate::parser;
use crate::store::{is_valid_file_id, ArtifactStore, NewArtifact};

const MIB: f64 = 1024.0 * 1024.0;

// =============================================================================
// Operation outputs
// =============================================================================

/// Result of a successful upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub message: String,
    pub file_id: String,
    pub file_size_mb: f64,
    /// First rows as header -> value objects, `null` for missing cells.
    pub preview: Vec<Value>,
    pub quality_report: Value,
    pub is_large_file: bool,
}

/// Answer to a preprocessing submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub task_id: String,
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
}

/// Point-in-time view of a job for pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_processed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A stored artifact ready to be streamed out.
pub struct Download {
    pub file: UploadedFile,
    pub reader: Box<dyn Read + Send>,
}

// =============================================================================
// Service
// =============================================================================

/// Cheap to clone; every clone shares the same store, registry and queue.
#[derive(Clone)]
pub struct Cleanser {
    store: Arc<dyn ArtifactStore>,
    registry: JobRegistry,
    queue: JobQueue,
    limits: Arc<Limits>,
}

impl Cleanser {
    /// Build a service whose queue is drained by whoever takes the receiver.
    pub fn new(store: Arc<dyn ArtifactStore>, limits: Limits) -> (Self, JobReceiver) {
        let (queue, receiver) = jobs::job_queue();
        let service = Self {
            store,
            registry: JobRegistry::new(),
            queue,
            limits: Arc::new(limits),
        };
        (service, receiver)
    }

    /// Build a service and spawn `workers` background workers for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(store: Arc<dyn ArtifactStore>, limits: Limits, workers: usize) -> (Self, Vec<JoinHandle<()>>) {
        let (service, receiver) = Self::new(store, limits);
        let handles = service.spawn_workers(receiver, workers);
        (service, handles)
    }

    pub fn spawn_workers(&self, receiver: JobReceiver, workers: usize) -> Vec<JoinHandle<()>> {
        jobs::spawn_workers(workers, receiver, self.registry.clone(), Arc::clone(&self.store))
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn events(&self) -> &JobEvents {
        self.registry.events()
    }

    /// Checks that need no payload: declared size and file name.
    pub fn validate_upload(&self, declared_size: u64, file_name: Option<&str>) -> ServiceResult<()> {
        if declared_size > self.limits.max_upload_bytes {
            return Err(ValidationError::FileTooLarge {
                size: declared_size,
                max: self.limits.max_upload_bytes,
            }
            .into());
        }
        if let Some(name) = file_name {
            let is_csv = Path::new(name)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            if !is_csv {
                return Err(ValidationError::UnsupportedFileType(name.to_string()).into());
            }
        }
        Ok(())
    }

    /// Validate, analyze and store an upload.
    ///
    /// Nothing is stored unless the content parses and analyzes.
    pub fn upload(&self, bytes: &[u8], declared_size: u64, file_name: Option<&str>) -> ServiceResult<UploadOutcome> {
        self.validate_upload(declared_size.max(bytes.len() as u64), file_name)?;
        if bytes.is_empty() {
            return Err(ValidationError::EmptyUpload.into());
        }

        let byte_size = bytes.len() as u64;
        let analysis = analysis::analyze_source(bytes, byte_size, &self.limits)?;
        let preview = parser::preview_records(&analysis.table, self.limits.preview_rows);

        let record = self.store.put(
            bytes,
            NewArtifact::upload(
                file_name.map(str::to_string),
                Some(analysis.report.estimated_total_rows),
            ),
        )?;
        info!(
            file_id = %record.file_id,
            bytes = byte_size,
            name = file_name.unwrap_or("-"),
            "upload stored"
        );

        let quality_report = serde_json::to_value(&analysis.report).map_err(AnalysisError::from)?;
        Ok(UploadOutcome {
            message: "File uploaded successfully".to_string(),
            file_id: record.file_id,
            file_size_mb: analysis::round2(byte_size as f64 / MIB),
            preview,
            is_large_file: analysis.report.is_sampled,
            quality_report,
        })
    }

    /// Re-run quality analysis on a stored file.
    pub fn analyze(&self, file_id: &str) -> ServiceResult<QualityReport> {
        let file = self.metadata(file_id)?;
        let reader = self.store.open(file_id).map_err(|e| not_found_or(e, file_id))?;
        let analysis = analysis::analyze_source(reader, file.byte_size, &self.limits)?;
        Ok(analysis.report)
    }

    /// Register a queued job for `file_id` and enqueue it.
    ///
    /// The job is visible as `queued` before this returns.
    pub fn submit_preprocess(&self, file_id: &str, options: PreprocessOptions) -> ServiceResult<Submission> {
        let file = self.metadata(file_id)?;
        let job = self.registry.create(file_id, options);
        self.queue.push(&job.task_id)?;

        Ok(Submission {
            task_id: job.task_id,
            status: job.state,
            estimated_time: Some(estimated_time(file.byte_size).to_string()),
        })
    }

    /// Non-blocking point read of a job.
    pub fn get_task_status(&self, task_id: &str) -> ServiceResult<TaskStatus> {
        let job = self
            .registry
            .get(task_id)
            .ok_or_else(|| ServiceError::task_not_found(task_id))?;

        let in_flight = !job.state.is_terminal();
        Ok(TaskStatus {
            status: job.state,
            progress: in_flight.then_some(job.progress_fraction),
            rows_processed: in_flight.then_some(job.rows_processed),
            result: job.result,
            error: job.error,
        })
    }

    /// Open any stored artifact, uploaded or produced by a job.
    pub fn open_download(&self, file_id: &str) -> ServiceResult<Download> {
        let file = self.metadata(file_id)?;
        let reader = self.store.open(file_id).map_err(|e| not_found_or(e, file_id))?;
        Ok(Download { file, reader })
    }

    fn metadata(&self, file_id: &str) -> ServiceResult<UploadedFile> {
        if !is_valid_file_id(file_id) {
            return Err(ServiceError::file_not_found(file_id));
        }
        self.store.metadata(file_id).map_err(|e| not_found_or(e, file_id))
    }
}

fn not_found_or(err: StoreError, file_id: &str) -> ServiceError {
    match err {
        StoreError::NotFound(_) => ServiceError::file_not_found(file_id),
        other => ServiceError::Store(other),
    }
}

/// Rough wall-clock hint for a job on a file of `byte_size` bytes.
pub fn estimated_time(byte_size: u64) -> &'static str {
    let mb = byte_size as f64 / MIB;
    if mb < 5.0 {
        "A few seconds"
    } else if mb < 50.0 {
        "Under a minute"
    } else {
        "This may take several minutes for large files"
    }
}
