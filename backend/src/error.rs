//! Error types for the cleansing service.
//!
//! One error enum per layer, mirroring the order data flows through the system:
//!
//! - [`ParseError`] - the bytes are not delimited tabular text
//! - [`ValidationError`] - an upload is rejected before anything is stored
//! - [`AnalysisError`] - a quality report cannot be produced
//! - [`PreprocessError`] - a background job failed (only ever observed by polling)
//! - [`StoreError`] - the artifact store could not read or write a payload
//! - [`ServiceError`] - top-level error of the synchronous operations
//! - [`ClientError`] - the polling client gave up or the server refused
//!
//! Conversions are `#[from]` so `?` works across layer boundaries.

use thiserror::Error;

// =============================================================================
// Parsing Errors
// =============================================================================

/// Errors while decoding bytes into a table.
#[derive(Debug, Error)]
pub enum ParseError {
    /// No bytes, or only blank lines.
    #[error("CSV file is empty")]
    Empty,

    /// A header line exists but names no column.
    #[error("No headers found in CSV")]
    NoHeaders,

    /// Binary content (NUL bytes) where text was expected.
    #[error("Content is not delimited text")]
    NotText,

    /// A data row carries more fields than the header declares.
    #[error("Line {line}: expected {expected} fields, saw {found}")]
    RaggedRow {
        line: u64,
        expected: usize,
        found: usize,
    },

    /// Bytes that are neither UTF-8 nor consistent with the rest of the file.
    #[error("Line {line}: text mixes UTF-8 with another encoding")]
    MixedEncoding { line: u64 },

    /// Low-level CSV reader failure.
    #[error("Invalid CSV format: {0}")]
    Csv(String),

    /// Failed to read the source.
    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),
}

impl From<csv::Error> for ParseError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            match err.into_kind() {
                csv::ErrorKind::Io(io) => ParseError::Io(io),
                other => ParseError::Csv(format!("{other:?}")),
            }
        } else {
            ParseError::Csv(err.to_string())
        }
    }
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Synchronous rejections of an upload. Nothing is stored or enqueued.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Declared or actual size over the configured limit.
    #[error("File size {size} bytes exceeds the {max} byte limit")]
    FileTooLarge { size: u64, max: u64 },

    /// Only `.csv` names are accepted.
    #[error("Invalid file type '{0}'. Only CSV files are allowed")]
    UnsupportedFileType(String),

    /// Request carried no file.
    #[error("No file provided")]
    EmptyUpload,
}

// =============================================================================
// Analysis Errors
// =============================================================================

/// Errors while building a quality report.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The source is not parseable tabular data.
    #[error("Cannot analyze file: {0}")]
    Parse(#[from] ParseError),

    /// The table has zero columns.
    #[error("Table has no columns")]
    NoColumns,

    /// The stored artifact could not be read.
    #[error("Cannot analyze file: {0}")]
    Store(#[from] StoreError),

    /// The finished report could not be encoded as JSON.
    #[error("Cannot encode quality report: {0}")]
    Encode(#[from] serde_json::Error),
}

// =============================================================================
// Preprocess Errors
// =============================================================================

/// Failures inside a background job. Recorded in the job's `error` field.
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// Input artifact vanished between submission and execution.
    #[error("Input file not found: {0}")]
    ArtifactMissing(String),

    /// The full file could not be re-loaded.
    #[error("Failed to load input: {0}")]
    Load(#[from] ParseError),

    /// Reading or writing an artifact failed.
    #[error("Artifact store error: {0}")]
    Store(StoreError),

    /// Serializing the output table failed.
    #[error("Failed to write output: {0}")]
    Write(String),

    /// The worker let go of the job without finishing it (a panic in the pipeline).
    #[error("Worker stopped before the job finished")]
    Abandoned,
}

impl From<StoreError> for PreprocessError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => PreprocessError::ArtifactMissing(id),
            other => PreprocessError::Store(other),
        }
    }
}

// =============================================================================
// Store Errors
// =============================================================================

/// Artifact store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unknown file identifier.
    #[error("File not found: {0}")]
    NotFound(String),

    /// IO error.
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata record could not be (de)serialized.
    #[error("Store metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

// =============================================================================
// Service Errors (top-level)
// =============================================================================

/// Errors surfaced synchronously by [`crate::service::Cleanser`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Upload rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Analysis failed.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// Unknown file or task.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Store failure outside of analysis.
    #[error("Store error: {0}")]
    Store(StoreError),

    /// The work queue has no consumer left.
    #[error("Job queue is closed")]
    QueueClosed,
}

impl ServiceError {
    pub fn file_not_found(id: impl Into<String>) -> Self {
        ServiceError::NotFound { kind: "File", id: id.into() }
    }

    pub fn task_not_found(id: impl Into<String>) -> Self {
        ServiceError::NotFound { kind: "Task", id: id.into() }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ServiceError::file_not_found(id),
            other => ServiceError::Store(other),
        }
    }
}

// =============================================================================
// Client Errors
// =============================================================================

/// Errors from the polling client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure (connection refused, reset, timeout).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success answer from the server.
    #[error("Server returned {status}: {message}")]
    Server { status: u16, message: String },

    /// The job reached `failed`.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// The polling bound was exhausted before a terminal state.
    #[error("Gave up after {attempts} polls")]
    TimedOut { attempts: u32 },
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for parsing.
pub type ParseResult<T> = Result<T, ParseError>;

/// Result type for analysis.
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Result type for background preprocessing.
pub type PreprocessResult<T> = Result<T, PreprocessError>;

/// Result type for artifact storage.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result type for the polling client.
pub type ClientResult<T> = Result<T, ClientError>;
