//! Runtime limits and server settings.
//!
//! [`Limits`] is plain data handed to the analyzer, the service and the
//! workers. [`Settings`] is what the `serve` command reads from flags and
//! `CLEANSER_*` environment variables (a `.env` file is loaded first).

use clap::Args;
use std::path::PathBuf;

const MIB: u64 = 1024 * 1024;

/// Size and sampling bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Uploads above this size are rejected.
    pub max_upload_bytes: u64,
    /// Files at or above this size are analyzed from a row sample.
    pub sampling_threshold_bytes: u64,
    /// Rows loaded when sampling.
    pub sample_rows: usize,
    /// Distinct values tracked per column before reporting high cardinality.
    pub cardinality_limit: usize,
    /// Non-missing values kept per column in a profile.
    pub sample_values: usize,
    /// Rows returned as an upload preview.
    pub preview_rows: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_upload_bytes: 100 * MIB,
            sampling_threshold_bytes: 50 * MIB,
            sample_rows: 100_000,
            cardinality_limit: 1000,
            sample_values: 5,
            preview_rows: 10,
        }
    }
}

/// Settings for the HTTP server.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Port to listen on
    #[arg(short, long, env = "CLEANSER_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Directory where uploaded and processed files are stored
    #[arg(long, env = "CLEANSER_DATA_DIR", default_value = "uploads")]
    pub data_dir: PathBuf,

    /// Number of background preprocessing workers
    #[arg(long, env = "CLEANSER_WORKERS", default_value_t = 2)]
    pub workers: usize,

    /// Maximum upload size in MiB
    #[arg(long, env = "CLEANSER_MAX_UPLOAD_MB", default_value_t = 100)]
    pub max_upload_mb: u64,

    /// Size in MiB from which analysis switches to sampling
    #[arg(long, env = "CLEANSER_SAMPLING_THRESHOLD_MB", default_value_t = 50)]
    pub sampling_threshold_mb: u64,

    /// Rows read when sampling a large file
    #[arg(long, env = "CLEANSER_SAMPLE_ROWS", default_value_t = 100_000)]
    pub sample_rows: usize,

    /// Allowed CORS origin (any origin when unset)
    #[arg(long, env = "CLEANSER_CORS_ORIGIN")]
    pub cors_origin: Option<String>,
}

impl Settings {
    /// Limits derived from these settings.
    pub fn limits(&self) -> Limits {
        Limits {
            max_upload_bytes: self.max_upload_mb * MIB,
            sampling_threshold_bytes: self.sampling_threshold_mb * MIB,
            sample_rows: self.sample_rows.max(1),
            ..Limits::default()
        }
    }

    /// Worker count, never zero.
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }
}
