//! # Cleanser - CSV data-quality analysis and background cleaning
//!
//! Cleanser ingests a CSV file, reports on its quality (types, missing values,
//! duplicates, numeric statistics) and cleans it asynchronously with a
//! configurable pipeline, producing a downloadable artifact.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//! │  Upload  │──▶│  Parser  │──▶│ Analysis │──▶│  Store   │──▶│ Download │
//! │ (≤100MB) │   │(auto-enc)│   │ (sample) │   │ (fs/mem) │   │          │
//! └──────────┘   └──────────┘   └──────────┘   └────┬─────┘   └──────────┘
//!                                                   │ ▲
//!                         submit ──▶ queue ──▶ worker ─┘ (pipeline)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cleanser::{Cleanser, Limits, MemoryArtifactStore, PreprocessOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (service, _workers) = Cleanser::start(Arc::new(MemoryArtifactStore::new()), Limits::default(), 2);
//!     let upload = service.upload(b"a,b\n1,\n2,2\n", 11, Some("data.csv")).unwrap();
//!     let task = service.submit_preprocess(&upload.file_id, PreprocessOptions::default()).unwrap();
//!     println!("{:?}", service.get_task_status(&task.task_id).unwrap().status);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per layer
//! - [`config`] - Limits and server settings
//! - [`models`] - Cells, tables, options, artifact metadata
//! - [`parser`] - CSV loading with encoding and delimiter detection
//! - [`analysis`] - Column profiling and quality reports
//! - [`transform`] - Cleaning steps and pipeline
//! - [`jobs`] - Job registry, workers and events
//! - [`store`] - Artifact storage
//! - [`service`] - The public operations
//! - [`api`] - HTTP API server
//! - [`client`] - HTTP client with bounded polling

// Core modules
pub mod config;
pub mod error;
pub mod models;

// Parsing
pub mod parser;

// Analysis
pub mod analysis;

// Transformation
pub mod transform;

// Jobs and storage
pub mod jobs;
pub mod store;

// Operations
pub mod service;

// HTTP
pub mod api;
pub mod client;

// =============================================================================
// Re-exports - Errors
// =============================================================================

pub use error::{
    AnalysisError, ClientError, ParseError, PreprocessError, ServiceError, StoreError,
    ValidationError,
};

// =============================================================================
// Re-exports - Models and configuration
// =============================================================================

pub use config::{Limits, Settings};
pub use models::{Cell, ColumnType, MissingStrategy, PreprocessOptions, Table, UploadedFile};

// =============================================================================
// Re-exports - Analysis and transformation
// =============================================================================

pub use analysis::{analyze_source, Accuracy, ColumnProfile, QualityReport, UniqueCount};
pub use transform::{run_pipeline, PipelineOutput};

// =============================================================================
// Re-exports - Jobs, storage, service
// =============================================================================

pub use jobs::{Job, JobResult, JobState};
pub use service::{Cleanser, Submission, TaskStatus, UploadOutcome};
pub use store::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};
