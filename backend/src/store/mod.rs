//! Artifact store - durable storage for uploaded and processed files.
//!
//! Every artifact is addressed by an opaque `file_id`. The filesystem store
//! keeps two files per artifact in its data directory:
//!
//! ```text
//! uploads/
//! ├── 1b4e28ba-2fa1-11d2-883f-0016d3cca427.csv   payload
//! └── 1b4e28ba-2fa1-11d2-883f-0016d3cca427.json  UploadedFile metadata
//! ```
//!
//! Both are written to a temporary name, synced and renamed, payload first.
//! An artifact whose metadata file is absent does not exist.

pub mod memory;

use chrono::Utc;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::UploadedFile;

pub use memory::MemoryArtifactStore;

/// What the caller knows about a payload before it is stored.
#[derive(Debug, Clone, Default)]
pub struct NewArtifact {
    pub original_name: Option<String>,
    pub derived_from: Option<String>,
    pub row_count_estimate: Option<u64>,
}

impl NewArtifact {
    pub fn upload(original_name: Option<String>, row_count_estimate: Option<u64>) -> Self {
        Self { original_name, derived_from: None, row_count_estimate }
    }

    /// Metadata for a job output derived from `input`.
    pub fn derived(input: &UploadedFile, rows: u64) -> Self {
        Self {
            original_name: input.original_name.clone(),
            derived_from: Some(input.file_id.clone()),
            row_count_estimate: Some(rows),
        }
    }

    fn into_record(self, byte_size: u64) -> UploadedFile {
        UploadedFile {
            file_id: Uuid::new_v4().to_string(),
            byte_size,
            row_count_estimate: self.row_count_estimate,
            original_name: self.original_name,
            derived_from: self.derived_from,
            created_at: Utc::now(),
        }
    }
}

/// Storage for immutable artifacts.
///
/// `put` returns only once the payload is durable, so a file id handed to a
/// client or recorded in a job result can always be opened.
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes` under a fresh file id.
    fn put(&self, bytes: &[u8], artifact: NewArtifact) -> StoreResult<UploadedFile>;

    /// Open the payload of an artifact for reading.
    fn open(&self, file_id: &str) -> StoreResult<Box<dyn Read + Send>>;

    /// Metadata of an artifact.
    fn metadata(&self, file_id: &str) -> StoreResult<UploadedFile>;

    /// Read a whole payload into memory.
    fn read_all(&self, file_id: &str) -> StoreResult<Vec<u8>> {
        let mut bytes = Vec::new();
        self.open(file_id)?.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

/// File ids are generated here, but they also arrive from URLs. Only
/// characters that cannot form a path are accepted.
pub fn is_valid_file_id(file_id: &str) -> bool {
    !file_id.is_empty()
        && file_id.len() <= 64
        && file_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

// =============================================================================
// Filesystem store
// =============================================================================

/// Artifact store backed by a directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open_dir(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn payload_path(&self, file_id: &str) -> PathBuf {
        self.dir.join(format!("{file_id}.csv"))
    }

    fn metadata_path(&self, file_id: &str) -> PathBuf {
        self.dir.join(format!("{file_id}.json"))
    }

    fn checked_id<'a>(&self, file_id: &'a str) -> StoreResult<&'a str> {
        if is_valid_file_id(file_id) {
            Ok(file_id)
        } else {
            Err(StoreError::NotFound(file_id.to_string()))
        }
    }

    /// Write to `.<name>.tmp`, sync, then rename over `path`.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> StoreResult<()> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("artifact");
        let tmp_path = self.dir.join(format!(".{name}.tmp"));

        let mut tmp = fs::File::create(&tmp_path)?;
        tmp.write_all(bytes)?;
        tmp.sync_all()?;
        drop(tmp);

        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, bytes: &[u8], artifact: NewArtifact) -> StoreResult<UploadedFile> {
        let record = artifact.into_record(bytes.len() as u64);

        self.write_atomic(&self.payload_path(&record.file_id), bytes)?;
        let metadata = serde_json::to_vec_pretty(&record)?;
        self.write_atomic(&self.metadata_path(&record.file_id), &metadata)?;

        debug!(file_id = %record.file_id, bytes = record.byte_size, "stored artifact");
        Ok(record)
    }

    fn open(&self, file_id: &str) -> StoreResult<Box<dyn Read + Send>> {
        let file_id = self.checked_id(file_id)?;
        // existence is decided by the metadata record
        self.metadata(file_id)?;
        match fs::File::open(self.payload_path(file_id)) {
            Ok(file) => Ok(Box::new(std::io::BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(file_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn metadata(&self, file_id: &str) -> StoreResult<UploadedFile> {
        let file_id = self.checked_id(file_id)?;
        let content = match fs::read(self.metadata_path(file_id)) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(file_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&content)?)
    }
}
